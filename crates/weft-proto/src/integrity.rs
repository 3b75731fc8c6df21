// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event integrity: keyed BLAKE3 over the committed fields.
//!
//! The commitment covers `{payload.type, payload.data, source, runId,
//! boundary, target}` and never `path`, which mutates during routing.
//! The key is derived from the shared network secret under a fixed,
//! version-pinned context string, so a forged hash requires the secret and
//! a reimplementation with the same secret interoperates.

use crate::canonical::canonical_json;
use crate::{Event, EventPayload, EventWrapper};
use serde_json::json;

/// Domain-separation context for key derivation. Changing this string is a
/// breaking change to the event ABI.
pub const HASH_CONTEXT: &str = "weft event integrity v1";

fn derive_key(secret: &str) -> [u8; 32] {
    blake3::derive_key(HASH_CONTEXT, secret.as_bytes())
}

fn commitment(payload: &EventPayload, wrapper: &EventWrapper) -> String {
    // Canonical encoding sorts the keys; the field set is the ABI.
    canonical_json(&json!({
        "type": payload.event_type,
        "data": payload.data,
        "source": wrapper.source,
        "runId": wrapper.run_id,
        "boundary": wrapper.boundary,
        "target": wrapper.target,
    }))
}

/// Compute the integrity hash for `(payload, wrapper)` as 64 lowercase hex
/// characters.
pub fn event_hash(payload: &EventPayload, wrapper: &EventWrapper, secret: &str) -> String {
    let key = derive_key(secret);
    blake3::keyed_hash(&key, commitment(payload, wrapper).as_bytes())
        .to_hex()
        .to_string()
}

/// Build a sealed event: compute the hash over the committed fields and
/// attach it.
pub fn seal(payload: EventPayload, wrapper: EventWrapper, secret: &str) -> Event {
    let hash = event_hash(&payload, &wrapper, secret);
    Event {
        payload,
        wrapper,
        hash,
    }
}

/// Verify an event's hash against its committed fields.
///
/// Recomputes with the same secret and compares through [`blake3::Hash`]
/// equality (constant time). Malformed hex is a verification failure, not
/// an error.
pub fn verify(event: &Event, secret: &str) -> bool {
    let Ok(expected) = blake3::Hash::from_hex(&event.hash) else {
        return false;
    };
    let key = derive_key(secret);
    let actual = blake3::keyed_hash(&key, commitment(&event.payload, &event.wrapper).as_bytes());
    actual == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Boundary;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn sample() -> Event {
        let payload = EventPayload {
            event_type: "message.new".into(),
            data: json!({"conversationId": "c1", "body": "hi"}),
        };
        let wrapper = EventWrapper::new("messaging", "r1", Boundary::Intra);
        seal(payload, wrapper, SECRET)
    }

    #[test]
    fn sealed_events_verify() {
        let event = sample();
        assert_eq!(event.hash.len(), 64);
        assert!(verify(&event, SECRET));
    }

    #[test]
    fn wrong_secret_fails() {
        let event = sample();
        assert!(!verify(&event, "other-secret"));
    }

    #[test]
    fn mutating_committed_fields_breaks_the_hash() {
        let mut event = sample();
        event.payload.data["body"] = json!("tampered");
        assert!(!verify(&event, SECRET));

        let mut event = sample();
        event.wrapper.source = "impostor".into();
        assert!(!verify(&event, SECRET));

        let mut event = sample();
        event.wrapper.target = Some("logging".into());
        assert!(!verify(&event, SECRET));

        let mut event = sample();
        event.wrapper.boundary = Boundary::Extra;
        assert!(!verify(&event, SECRET));
    }

    #[test]
    fn path_is_not_committed() {
        let mut event = sample();
        event.wrapper.path.push("assistants".into());
        event.wrapper.id = "different-id".into();
        event.wrapper.timestamp += 1000;
        assert!(verify(&event, SECRET));
    }

    #[test]
    fn malformed_hex_is_a_clean_failure() {
        let mut event = sample();
        event.hash = "not-hex".into();
        assert!(!verify(&event, SECRET));
        event.hash.clear();
        assert!(!verify(&event, SECRET));
    }

    #[test]
    fn hash_survives_a_wire_round_trip() {
        let event = sample();
        let bytes = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&bytes).unwrap();
        assert_eq!(
            event_hash(&parsed.payload, &parsed.wrapper, SECRET),
            event.hash
        );
        assert!(verify(&parsed, SECRET));
    }
}
