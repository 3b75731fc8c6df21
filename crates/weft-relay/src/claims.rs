// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Turn-taking over plain events: per-conversation claim aggregation and
//! the time-bounded claim window.
//!
//! None of this is privileged fabric API: claims, defers, observes, and
//! responses are ordinary events the service routes like any other.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use weft_proto::now_ms;

/// Event type for a turn claim.
pub const CLAIM_EVENT: &str = "assistant.intent.claim";
/// Event type for yielding the turn.
pub const DEFER_EVENT: &str = "assistant.intent.defer";
/// Event type for silently observing.
pub const OBSERVE_EVENT: &str = "assistant.action.observe";
/// Event type for taking the turn.
pub const RESPOND_EVENT: &str = "assistant.intent.respond";

/// A claim on a conversation's next turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRecord {
    /// Claiming assistant key.
    pub assistant: String,
    /// Claim priority; strictly higher wins.
    pub priority: i64,
    /// When the claim was made (unix ms); earlier wins ties.
    pub claimed_at: u64,
    /// When the claim lapses (unix ms).
    pub expires_at: u64,
}

/// Result of a claim window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// True when no other claim beats the caller's.
    pub should_proceed: bool,
    /// The winning assistant when the caller lost.
    pub winning_assistant: Option<String>,
}

/// Per-conversation claim book.
#[derive(Default)]
pub struct ClaimBook {
    claims: Mutex<HashMap<String, Vec<ClaimRecord>>>,
}

impl ClaimBook {
    /// Empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or refresh) a claim for a conversation.
    pub fn register(&self, conversation_id: &str, record: ClaimRecord) {
        let mut claims = self.claims.lock();
        let entry = claims.entry(conversation_id.to_string()).or_default();
        entry.retain(|c| c.assistant != record.assistant);
        entry.push(record);
    }

    /// Drop every claim for a conversation (the turn is settled).
    pub fn clear(&self, conversation_id: &str) {
        self.claims.lock().remove(conversation_id);
    }

    /// The winning claim among unexpired ones: strictly highest priority,
    /// ties to the earliest `claimed_at`.
    pub fn winner(&self, conversation_id: &str, now: u64) -> Option<ClaimRecord> {
        let claims = self.claims.lock();
        claims
            .get(conversation_id)?
            .iter()
            .filter(|c| c.expires_at > now)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.claimed_at.cmp(&a.claimed_at))
            })
            .cloned()
    }

    /// Adjudicate the window for `assistant`: proceed unless some other
    /// claim beats it.
    pub fn adjudicate(&self, conversation_id: &str, assistant: &str, own_priority: i64) -> ClaimOutcome {
        let now = now_ms();
        match self.winner(conversation_id, now) {
            None => ClaimOutcome {
                should_proceed: true,
                winning_assistant: None,
            },
            Some(winner) if winner.assistant == assistant => ClaimOutcome {
                should_proceed: true,
                winning_assistant: None,
            },
            Some(winner) => {
                // The caller may not have registered its own claim; an
                // external claim only beats it with strictly greater
                // priority.
                if winner.priority > own_priority {
                    ClaimOutcome {
                        should_proceed: false,
                        winning_assistant: Some(winner.assistant),
                    }
                } else {
                    ClaimOutcome {
                        should_proceed: true,
                        winning_assistant: None,
                    }
                }
            }
        }
    }
}

/// Pull a claim out of an `assistant.intent.claim` event's data, if the
/// shape matches.
pub fn parse_claim(data: &Value) -> Option<(String, ClaimRecord)> {
    let conversation_id = data.get("conversationId")?.as_str()?.to_string();
    let assistant = data.get("assistantKey")?.as_str()?.to_string();
    let claim = data.get("claim")?;
    Some((
        conversation_id,
        ClaimRecord {
            assistant,
            priority: claim.get("priority")?.as_i64()?,
            claimed_at: claim.get("claimedAt")?.as_u64()?,
            expires_at: claim.get("expiresAt")?.as_u64()?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claim(assistant: &str, priority: i64, claimed_at: u64) -> ClaimRecord {
        ClaimRecord {
            assistant: assistant.into(),
            priority,
            claimed_at,
            expires_at: now_ms() + 60_000,
        }
    }

    #[test]
    fn higher_priority_wins_the_window() {
        let book = ClaimBook::new();
        let now = now_ms();
        book.register("c1", claim("A", 30, now));
        book.register("c1", claim("B", 70, now + 5));

        // A (30) loses to B (70); B proceeds.
        assert_eq!(
            book.adjudicate("c1", "A", 30),
            ClaimOutcome {
                should_proceed: false,
                winning_assistant: Some("B".into())
            }
        );
        assert_eq!(
            book.adjudicate("c1", "B", 70),
            ClaimOutcome {
                should_proceed: true,
                winning_assistant: None
            }
        );
    }

    #[test]
    fn ties_break_to_the_earliest_claim() {
        let book = ClaimBook::new();
        let now = now_ms();
        book.register("c1", claim("late", 50, now + 10));
        book.register("c1", claim("early", 50, now));
        let winner = book.winner("c1", now_ms()).unwrap();
        assert_eq!(winner.assistant, "early");
    }

    #[test]
    fn expired_claims_do_not_count() {
        let book = ClaimBook::new();
        let now = now_ms();
        book.register(
            "c1",
            ClaimRecord {
                assistant: "stale".into(),
                priority: 100,
                claimed_at: now.saturating_sub(1000),
                expires_at: now.saturating_sub(1),
            },
        );
        assert_eq!(
            book.adjudicate("c1", "fresh", 10),
            ClaimOutcome {
                should_proceed: true,
                winning_assistant: None
            }
        );
    }

    #[test]
    fn no_claims_means_proceed() {
        let book = ClaimBook::new();
        assert!(book.adjudicate("empty", "A", 0).should_proceed);
    }

    #[test]
    fn reregistering_replaces_an_assistants_claim() {
        let book = ClaimBook::new();
        let now = now_ms();
        book.register("c1", claim("A", 10, now));
        book.register("c1", claim("A", 90, now + 1));
        let winner = book.winner("c1", now_ms()).unwrap();
        assert_eq!(winner.priority, 90);
    }

    #[test]
    fn clear_settles_the_conversation() {
        let book = ClaimBook::new();
        book.register("c1", claim("A", 10, now_ms()));
        book.clear("c1");
        assert!(book.winner("c1", now_ms()).is_none());
    }

    #[test]
    fn claim_events_parse_round_trip() {
        let data = json!({
            "conversationId": "c1",
            "assistantKey": "B",
            "justification": "user asked a question",
            "claim": {"claimedAt": 100, "expiresAt": 200, "priority": 70}
        });
        let (conversation, record) = parse_claim(&data).unwrap();
        assert_eq!(conversation, "c1");
        assert_eq!(record.assistant, "B");
        assert_eq!(record.priority, 70);

        assert!(parse_claim(&json!({"nope": true})).is_none());
    }
}
