// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Authoritative in-memory directory: nodes, contracts, bridges, and the
//! entity → node bijection.
//!
//! One coarse `RwLock` over the whole state; reads dominate, and cleanup
//! and topology snapshots must never observe partially-updated state.
//! Contracts and bridges live in insertion-ordered vectors so fan-out and
//! discovery are deterministic.

use crate::FabricError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};
use weft_proto::{
    event_type_matches, now_ms, new_id, Boundary, Bridge, BridgeType, Contract, Node, NodeType,
    TopologySnapshot,
};

/// A standard communication pattern: when its `from` node first registers,
/// the matching contract is created automatically (deduplicated).
#[derive(Debug, Clone)]
pub struct AutoContractRule {
    /// Source node id the rule fires for.
    pub from: String,
    /// Target node id or `*`.
    pub to: String,
    /// Event-type patterns the contract allows.
    pub event_types: Vec<String>,
    /// Boundaries the contract covers.
    pub boundaries: Vec<Boundary>,
}

impl AutoContractRule {
    /// The default standard patterns: assistants broadcast their
    /// justification stream to everyone, and messaging feeds assistants.
    pub fn standard() -> Vec<Self> {
        vec![
            Self {
                from: "assistants".into(),
                to: "*".into(),
                event_types: vec!["assistant.intent.*".into(), "assistant.action.observe".into()],
                boundaries: vec![Boundary::Intra, Boundary::Inter],
            },
            Self {
                from: "messaging".into(),
                to: "assistants".into(),
                event_types: vec!["message.*".into()],
                boundaries: vec![Boundary::Intra],
            },
        ]
    }
}

/// Node registration request (upsert).
#[derive(Debug, Clone)]
pub struct RegisterNode {
    /// Stable node id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Participant kind.
    pub node_type: NodeType,
    /// Advertised capabilities.
    pub capabilities: Vec<String>,
    /// HTTP delivery endpoint.
    pub endpoint: Option<String>,
    /// Attached session, if registering over a live session.
    pub session_id: Option<String>,
    /// Entity identity to bind; `None` leaves any existing binding alone.
    pub entity_id: Option<String>,
    /// Free-form metadata.
    pub metadata: Option<Value>,
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, Node>,
    // Insertion order doubles as creation order for fan-out determinism.
    contracts: Vec<Contract>,
    bridges: Vec<Bridge>,
    // entity id -> node id (reverse index of Node::entity_id).
    entities: HashMap<String, String>,
}

/// The directory. All mutation goes through `&self` behind one lock.
pub struct Registry {
    node_timeout_ms: u64,
    auto_contracts: Vec<AutoContractRule>,
    state: RwLock<State>,
}

impl Registry {
    /// New registry with the given staleness timeout and auto-contract
    /// rule table.
    pub fn new(node_timeout_ms: u64, auto_contracts: Vec<AutoContractRule>) -> Self {
        Self {
            node_timeout_ms,
            auto_contracts,
            state: RwLock::new(State::default()),
        }
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Register or update a node. Re-registration preserves
    /// `registered_at` but refreshes the heartbeat and reachability.
    /// Returns the stored node and whether this was a first registration.
    pub fn register_node(&self, req: RegisterNode) -> (Node, bool) {
        let now = now_ms();
        let entity = req.entity_id.clone();
        let mut state = self.state.write();
        let first = !state.nodes.contains_key(&req.id);
        let node = match state.nodes.get_mut(&req.id) {
            Some(existing) => {
                existing.name = req.name;
                existing.node_type = req.node_type;
                existing.capabilities = req.capabilities;
                existing.endpoint = req.endpoint;
                existing.session_id = req.session_id;
                existing.last_heartbeat = now;
                if req.metadata.is_some() {
                    existing.metadata = req.metadata;
                }
                existing.clone()
            }
            None => {
                let node = Node {
                    id: req.id.clone(),
                    name: req.name,
                    node_type: req.node_type,
                    capabilities: req.capabilities,
                    endpoint: req.endpoint,
                    session_id: req.session_id,
                    registered_at: now,
                    last_heartbeat: now,
                    entity_id: None,
                    entity_bound_at: None,
                    metadata: req.metadata,
                };
                state.nodes.insert(req.id.clone(), node.clone());
                node
            }
        };
        if first {
            self.apply_auto_contracts(&mut state, &node.id, now);
            info!(node = %node.id, kind = node.node_type.as_str(), "node registered");
        }
        let node = match entity {
            Some(entity) => {
                Self::bind_entity_locked(&mut state, &node.id, &entity);
                state.nodes.get(&node.id).cloned().unwrap_or(node)
            }
            None => node,
        };
        (node, first)
    }

    fn apply_auto_contracts(&self, state: &mut State, node_id: &str, now: u64) {
        for rule in self.auto_contracts.iter().filter(|r| r.from == node_id) {
            let exists = state.contracts.iter().any(|c| {
                c.from == rule.from
                    && c.to == rule.to
                    && c.allowed_event_types == rule.event_types
                    && c.boundaries == rule.boundaries
            });
            if exists {
                continue;
            }
            debug!(from = %rule.from, to = %rule.to, "auto-contract created");
            state.contracts.push(Contract {
                id: new_id(),
                from: rule.from.clone(),
                to: rule.to.clone(),
                allowed_event_types: rule.event_types.clone(),
                boundaries: rule.boundaries.clone(),
                created_at: now,
                expires_at: None,
            });
        }
    }

    /// Refresh a node's heartbeat; false when the node is unknown.
    pub fn heartbeat(&self, node_id: &str) -> bool {
        let mut state = self.state.write();
        match state.nodes.get_mut(node_id) {
            Some(node) => {
                node.last_heartbeat = now_ms();
                true
            }
            None => false,
        }
    }

    /// Attach or detach a live session.
    pub fn update_session(&self, node_id: &str, session_id: Option<String>) -> bool {
        let mut state = self.state.write();
        match state.nodes.get_mut(node_id) {
            Some(node) => {
                node.session_id = session_id;
                true
            }
            None => false,
        }
    }

    /// Remove a node, cascading through contracts and the entity index.
    pub fn unregister_node(&self, node_id: &str) -> Result<Node, FabricError> {
        let mut state = self.state.write();
        let node = state
            .nodes
            .remove(node_id)
            .ok_or_else(|| FabricError::UnknownNode(node_id.to_string()))?;
        Self::cascade_node_removal(&mut state, &node);
        info!(node = %node.id, "node unregistered");
        Ok(node)
    }

    // Contracts from the node go; contracts targeting it go too, except
    // wildcard targets which are not attached to any one node.
    fn cascade_node_removal(state: &mut State, node: &Node) {
        state
            .contracts
            .retain(|c| c.from != node.id && (c.to != node.id || c.to == "*"));
        if let Some(entity) = &node.entity_id {
            state.entities.remove(entity);
        }
    }

    /// Look up a node by id.
    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.state.read().nodes.get(node_id).cloned()
    }

    /// All registered nodes (unspecified order).
    pub fn list_nodes(&self) -> Vec<Node> {
        self.state.read().nodes.values().cloned().collect()
    }

    /// Nodes advertising a capability.
    pub fn nodes_by_capability(&self, capability: &str) -> Vec<Node> {
        self.state
            .read()
            .nodes
            .values()
            .filter(|n| n.capabilities.iter().any(|c| c == capability))
            .cloned()
            .collect()
    }

    /// Nodes of a given kind.
    pub fn nodes_by_type(&self, node_type: NodeType) -> Vec<Node> {
        self.state
            .read()
            .nodes
            .values()
            .filter(|n| n.node_type == node_type)
            .cloned()
            .collect()
    }

    // ── Entities ───────────────────────────────────────────────────

    /// Bind an entity to a node. Rebinding moves the entity: the previous
    /// holder's binding is cleared in the same write.
    pub fn bind_entity(&self, node_id: &str, entity_id: &str) -> Result<(), FabricError> {
        let mut state = self.state.write();
        if !state.nodes.contains_key(node_id) {
            return Err(FabricError::UnknownNode(node_id.to_string()));
        }
        Self::bind_entity_locked(&mut state, node_id, entity_id);
        Ok(())
    }

    fn bind_entity_locked(state: &mut State, node_id: &str, entity_id: &str) {
        if let Some(previous) = state.entities.insert(entity_id.to_string(), node_id.to_string()) {
            if previous != node_id {
                if let Some(prev_node) = state.nodes.get_mut(&previous) {
                    prev_node.entity_id = None;
                    prev_node.entity_bound_at = None;
                }
            }
        }
        // A node holds at most one entity: drop its old reverse entry.
        if let Some(node) = state.nodes.get(node_id) {
            if let Some(old_entity) = node.entity_id.clone() {
                if old_entity != entity_id {
                    state.entities.remove(&old_entity);
                }
            }
        }
        if let Some(node) = state.nodes.get_mut(node_id) {
            node.entity_id = Some(entity_id.to_string());
            node.entity_bound_at = Some(now_ms());
        }
    }

    /// Clear a node's entity binding.
    pub fn unbind_entity(&self, node_id: &str) -> Result<(), FabricError> {
        let mut state = self.state.write();
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| FabricError::UnknownNode(node_id.to_string()))?;
        let old = node.entity_id.take();
        node.entity_bound_at = None;
        if let Some(entity) = old {
            state.entities.remove(&entity);
        }
        Ok(())
    }

    /// Resolve the node currently holding an entity.
    pub fn get_node_by_entity(&self, entity_id: &str) -> Option<Node> {
        let state = self.state.read();
        let node_id = state.entities.get(entity_id)?;
        state.nodes.get(node_id).cloned()
    }

    // ── Contracts ──────────────────────────────────────────────────

    /// Create a contract. The source must exist; the target may be absent
    /// or `*` (pre-registration is allowed). Identical contracts
    /// deduplicate to the existing one.
    pub fn create_contract(
        &self,
        from: &str,
        to: &str,
        allowed_event_types: Vec<String>,
        boundaries: Vec<Boundary>,
        expires_at: Option<u64>,
    ) -> Result<Contract, FabricError> {
        let mut state = self.state.write();
        if !state.nodes.contains_key(from) {
            return Err(FabricError::SourceNotFound(from.to_string()));
        }
        if let Some(existing) = state.contracts.iter().find(|c| {
            c.from == from
                && c.to == to
                && c.allowed_event_types == allowed_event_types
                && c.boundaries == boundaries
        }) {
            return Ok(existing.clone());
        }
        let contract = Contract {
            id: new_id(),
            from: from.to_string(),
            to: to.to_string(),
            allowed_event_types,
            boundaries,
            created_at: now_ms(),
            expires_at,
        };
        state.contracts.push(contract.clone());
        Ok(contract)
    }

    /// Delete a contract by id.
    pub fn delete_contract(&self, contract_id: &str) -> Result<(), FabricError> {
        let mut state = self.state.write();
        let before = state.contracts.len();
        state.contracts.retain(|c| c.id != contract_id);
        if state.contracts.len() == before {
            return Err(FabricError::UnknownContract(contract_id.to_string()));
        }
        Ok(())
    }

    /// First contract from `from` to `to`, if any.
    pub fn get_contract(&self, from: &str, to: &str) -> Option<Contract> {
        self.state
            .read()
            .contracts
            .iter()
            .find(|c| c.from == from && c.to == to)
            .cloned()
    }

    /// Contracts naming the node on either side.
    pub fn list_contracts_for(&self, node_id: &str) -> Vec<Contract> {
        self.state
            .read()
            .contracts
            .iter()
            .filter(|c| c.from == node_id || c.to == node_id)
            .cloned()
            .collect()
    }

    /// All contracts in creation order.
    pub fn list_contracts(&self) -> Vec<Contract> {
        self.state.read().contracts.clone()
    }

    /// Contract fan-out for an event from `source`: targets of contracts
    /// whose patterns match `event_type` under `boundary`, with `*`
    /// expanding to every registered node except the source, deduplicated
    /// in discovery order.
    pub fn resolve_targets(&self, source: &str, event_type: &str, boundary: Boundary) -> Vec<String> {
        let state = self.state.read();
        let mut targets: Vec<String> = Vec::new();
        let push = |id: &str, targets: &mut Vec<String>| {
            if !targets.iter().any(|t| t == id) {
                targets.push(id.to_string());
            }
        };
        for contract in state
            .contracts
            .iter()
            .filter(|c| c.from == source && c.permits(event_type, boundary))
        {
            if contract.to == "*" {
                let mut everyone: Vec<&String> =
                    state.nodes.keys().filter(|id| *id != source).collect();
                everyone.sort();
                for id in everyone {
                    push(id, &mut targets);
                }
            } else {
                push(&contract.to, &mut targets);
            }
        }
        targets
    }

    // ── Bridges ────────────────────────────────────────────────────

    /// Register an external connector.
    pub fn register_bridge(
        &self,
        name: String,
        bridge_type: BridgeType,
        endpoint: String,
        event_types: Vec<String>,
    ) -> Bridge {
        let bridge = Bridge {
            id: new_id(),
            name,
            bridge_type,
            endpoint,
            event_types,
            active: true,
        };
        self.state.write().bridges.push(bridge.clone());
        bridge
    }

    /// Flip a bridge's active flag.
    pub fn set_bridge_active(&self, bridge_id: &str, active: bool) -> Result<Bridge, FabricError> {
        let mut state = self.state.write();
        let bridge = state
            .bridges
            .iter_mut()
            .find(|b| b.id == bridge_id)
            .ok_or_else(|| FabricError::UnknownBridge(bridge_id.to_string()))?;
        bridge.active = active;
        Ok(bridge.clone())
    }

    /// Remove a bridge.
    pub fn delete_bridge(&self, bridge_id: &str) -> Result<(), FabricError> {
        let mut state = self.state.write();
        let before = state.bridges.len();
        state.bridges.retain(|b| b.id != bridge_id);
        if state.bridges.len() == before {
            return Err(FabricError::UnknownBridge(bridge_id.to_string()));
        }
        Ok(())
    }

    /// All bridges in registration order.
    pub fn list_bridges(&self) -> Vec<Bridge> {
        self.state.read().bridges.clone()
    }

    /// Active bridges accepting an event type.
    pub fn find_bridges_for(&self, event_type: &str) -> Vec<Bridge> {
        self.state
            .read()
            .bridges
            .iter()
            .filter(|b| {
                b.active
                    && b.event_types
                        .iter()
                        .any(|p| event_type_matches(p, event_type))
            })
            .cloned()
            .collect()
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Remove nodes whose heartbeat is older than the timeout, cascading
    /// like [`Registry::unregister_node`]. Returns removed ids.
    pub fn cleanup_stale(&self) -> Vec<String> {
        let now = now_ms();
        let mut state = self.state.write();
        let stale: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| now.saturating_sub(n.last_heartbeat) > self.node_timeout_ms)
            .cloned()
            .collect();
        for node in &stale {
            state.nodes.remove(&node.id);
            Self::cascade_node_removal(&mut state, node);
            info!(node = %node.id, "stale node removed");
        }
        stale.into_iter().map(|n| n.id).collect()
    }

    /// Remove contracts whose expiry has passed. Returns removed ids.
    pub fn cleanup_expired_contracts(&self) -> Vec<String> {
        let now = now_ms();
        let mut state = self.state.write();
        let (expired, live): (Vec<Contract>, Vec<Contract>) = state
            .contracts
            .drain(..)
            .partition(|c| c.expires_at.is_some_and(|t| t < now));
        state.contracts = live;
        expired.into_iter().map(|c| c.id).collect()
    }

    /// Consistent snapshot of the whole directory under one read lock.
    pub fn topology(&self) -> TopologySnapshot {
        let state = self.state.read();
        TopologySnapshot {
            nodes: state.nodes.values().cloned().collect(),
            contracts: state.contracts.clone(),
            bridges: state.bridges.clone(),
            timestamp: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str) -> RegisterNode {
        RegisterNode {
            id: id.into(),
            name: id.into(),
            node_type: NodeType::Service,
            capabilities: vec![],
            endpoint: None,
            session_id: None,
            entity_id: None,
            metadata: None,
        }
    }

    fn registry() -> Registry {
        Registry::new(90_000, vec![])
    }

    #[test]
    fn reregistration_preserves_registered_at() {
        let reg = registry();
        let (first, created) = reg.register_node(service("messaging"));
        assert!(created);
        let (second, created) = reg.register_node(RegisterNode {
            endpoint: Some("http://messaging:8080/events".into()),
            ..service("messaging")
        });
        assert!(!created);
        assert_eq!(second.registered_at, first.registered_at);
        assert_eq!(
            second.endpoint.as_deref(),
            Some("http://messaging:8080/events")
        );
    }

    #[test]
    fn heartbeat_unknown_node_is_false() {
        let reg = registry();
        assert!(!reg.heartbeat("ghost"));
        reg.register_node(service("messaging"));
        assert!(reg.heartbeat("messaging"));
    }

    #[test]
    fn unregister_cascades_contracts_but_keeps_foreign_wildcards() {
        let reg = registry();
        reg.register_node(service("messaging"));
        reg.register_node(service("assistants"));
        reg.register_node(service("logging"));
        reg.create_contract(
            "messaging",
            "assistants",
            vec!["message.*".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();
        reg.create_contract(
            "logging",
            "messaging",
            vec!["*".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();
        reg.create_contract(
            "assistants",
            "*",
            vec!["assistant.intent.*".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();

        reg.unregister_node("messaging").unwrap();
        let remaining = reg.list_contracts();
        // from==messaging and to==messaging both dropped; the wildcard
        // broadcast from assistants is untouched.
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].from, "assistants");
        assert_eq!(remaining[0].to, "*");
    }

    #[test]
    fn contract_requires_source_and_dedups() {
        let reg = registry();
        assert_eq!(
            reg.create_contract("ghost", "x", vec![], vec![], None),
            Err(FabricError::SourceNotFound("ghost".into()))
        );
        reg.register_node(service("messaging"));
        let a = reg
            .create_contract(
                "messaging",
                "assistants",
                vec!["message.new".into()],
                vec![Boundary::Intra],
                None,
            )
            .unwrap();
        let b = reg
            .create_contract(
                "messaging",
                "assistants",
                vec!["message.new".into()],
                vec![Boundary::Intra],
                None,
            )
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(reg.list_contracts().len(), 1);
    }

    #[test]
    fn entity_binding_is_a_bijection_and_rebinds_atomically() {
        let reg = registry();
        reg.register_node(service("asst1"));
        reg.register_node(service("asst2"));

        reg.bind_entity("asst1", "ent_X").unwrap();
        assert_eq!(reg.get_node_by_entity("ent_X").map(|n| n.id), Some("asst1".into()));

        // Rebinding moves the entity and clears the previous holder.
        reg.bind_entity("asst2", "ent_X").unwrap();
        assert_eq!(reg.get_node_by_entity("ent_X").map(|n| n.id), Some("asst2".into()));
        assert_eq!(reg.get_node("asst1").and_then(|n| n.entity_id), None);

        // Binding a different entity to a node drops its old one.
        reg.bind_entity("asst2", "ent_Y").unwrap();
        assert!(reg.get_node_by_entity("ent_X").is_none());
        assert_eq!(reg.get_node_by_entity("ent_Y").map(|n| n.id), Some("asst2".into()));

        reg.unbind_entity("asst2").unwrap();
        assert!(reg.get_node_by_entity("ent_Y").is_none());
    }

    #[test]
    fn registration_can_bind_an_entity() {
        let reg = registry();
        let (node, _) = reg.register_node(RegisterNode {
            entity_id: Some("ent_X".into()),
            ..service("asst1")
        });
        assert_eq!(node.entity_id.as_deref(), Some("ent_X"));
        assert_eq!(
            reg.get_node_by_entity("ent_X").map(|n| n.id),
            Some("asst1".into())
        );

        // Re-registration without an entity keeps the binding.
        let (node, _) = reg.register_node(service("asst1"));
        assert_eq!(node.entity_id.as_deref(), Some("ent_X"));
    }

    #[test]
    fn entity_unbound_when_node_removed() {
        let reg = registry();
        reg.register_node(service("asst1"));
        reg.bind_entity("asst1", "ent_X").unwrap();
        reg.unregister_node("asst1").unwrap();
        assert!(reg.get_node_by_entity("ent_X").is_none());
    }

    #[test]
    fn stale_nodes_are_reaped_with_their_contracts() {
        let reg = Registry::new(0, vec![]);
        reg.register_node(service("messaging"));
        reg.register_node(service("assistants"));
        reg.create_contract(
            "messaging",
            "assistants",
            vec!["message.*".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();

        // Timeout of zero: anything with a heartbeat in the past is stale.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut removed = reg.cleanup_stale();
        removed.sort();
        assert_eq!(removed, vec!["assistants".to_string(), "messaging".to_string()]);
        assert!(reg.list_nodes().is_empty());
        assert!(reg.list_contracts().is_empty());
    }

    #[test]
    fn expired_contracts_are_evicted() {
        let reg = registry();
        reg.register_node(service("messaging"));
        let expired = reg
            .create_contract(
                "messaging",
                "assistants",
                vec!["*".into()],
                vec![Boundary::Intra],
                Some(now_ms().saturating_sub(1)),
            )
            .unwrap();
        reg.create_contract(
            "messaging",
            "logging",
            vec!["*".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();
        let removed = reg.cleanup_expired_contracts();
        assert_eq!(removed, vec![expired.id]);
        assert_eq!(reg.list_contracts().len(), 1);
    }

    #[test]
    fn wildcard_fanout_excludes_source_and_dedups() {
        let reg = registry();
        for id in ["assistants", "messaging", "logging", "integrations"] {
            reg.register_node(service(id));
        }
        reg.create_contract(
            "assistants",
            "*",
            vec!["assistant.intent.claim".into()],
            vec![Boundary::Intra, Boundary::Inter],
            None,
        )
        .unwrap();
        reg.create_contract(
            "assistants",
            "messaging",
            vec!["assistant.intent.*".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();

        let targets = reg.resolve_targets("assistants", "assistant.intent.claim", Boundary::Intra);
        assert_eq!(
            targets,
            vec![
                "integrations".to_string(),
                "logging".to_string(),
                "messaging".to_string()
            ]
        );
    }

    #[test]
    fn fanout_respects_patterns_and_boundaries() {
        let reg = registry();
        reg.register_node(service("messaging"));
        reg.register_node(service("assistants"));
        reg.create_contract(
            "messaging",
            "assistants",
            vec!["message.new".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();

        assert_eq!(
            reg.resolve_targets("messaging", "message.new", Boundary::Intra),
            vec!["assistants".to_string()]
        );
        assert!(reg
            .resolve_targets("messaging", "message.updated", Boundary::Intra)
            .is_empty());
        assert!(reg
            .resolve_targets("messaging", "message.new", Boundary::Extra)
            .is_empty());
    }

    #[test]
    fn auto_contracts_fire_once_on_first_registration() {
        let reg = Registry::new(90_000, AutoContractRule::standard());
        reg.register_node(service("assistants"));
        let contracts = reg.list_contracts();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].from, "assistants");
        assert_eq!(contracts[0].to, "*");

        // Re-registration does not duplicate.
        reg.register_node(service("assistants"));
        assert_eq!(reg.list_contracts().len(), 1);

        // A different standard node brings its own pattern.
        reg.register_node(service("messaging"));
        assert_eq!(reg.list_contracts().len(), 2);
    }

    #[test]
    fn bridges_discovered_by_event_type_when_active() {
        let reg = registry();
        let bridge = reg.register_bridge(
            "slack".into(),
            BridgeType::Webhook,
            "https://hooks.example.com/slack".into(),
            vec!["message.*".into()],
        );
        assert_eq!(reg.find_bridges_for("message.new").len(), 1);
        assert!(reg.find_bridges_for("assistant.intent.claim").is_empty());

        reg.set_bridge_active(&bridge.id, false).unwrap();
        assert!(reg.find_bridges_for("message.new").is_empty());

        reg.delete_bridge(&bridge.id).unwrap();
        assert!(reg.list_bridges().is_empty());
    }

    #[test]
    fn topology_snapshot_is_complete() {
        let reg = registry();
        reg.register_node(service("messaging"));
        reg.register_node(service("assistants"));
        reg.create_contract("messaging", "assistants", vec!["*".into()], vec![Boundary::Intra], None)
            .unwrap();
        let topo = reg.topology();
        assert_eq!(topo.nodes.len(), 2);
        assert_eq!(topo.contracts.len(), 1);
        assert!(topo.bridges.is_empty());
        assert!(topo.timestamp > 0);
    }
}
