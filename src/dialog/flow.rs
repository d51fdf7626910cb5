//! Dialog flow definitions.
//!
//! A flow is a directed graph of nodes, read-only at runtime. Every
//! registry is validated at startup: entry nodes exist, every
//! transition target exists, transfer targets name real flows, and
//! every node is reachable from its flow's entry. An invalid definition
//! is a construction error, so runtime transitions cannot dangle.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Wildcard intent key.
pub const WILDCARD: &str = "*";

/// Name of the global fallback flow.
pub const FALLBACK_FLOW: &str = "fallback";

/// Errors from flow validation.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow '{flow}' has no node '{node}'")]
    MissingNode { flow: String, node: String },

    #[error("flow '{flow}' node '{node}' transitions to undefined node '{target}'")]
    DanglingTransition {
        flow: String,
        node: String,
        target: String,
    },

    #[error("flow '{flow}' node '{node}' transfers to undefined flow '{target}'")]
    DanglingTransfer {
        flow: String,
        node: String,
        target: String,
    },

    #[error("flow '{flow}' node '{node}' is unreachable from entry")]
    Unreachable { flow: String, node: String },

    #[error("registry has no '{FALLBACK_FLOW}' flow")]
    MissingFallbackFlow,
}

/// A slot the node needs before its action can run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSpec {
    /// Slot name; also the prompt template suffix.
    pub name: String,
    /// Entity type that fills this slot.
    pub entity_type: String,
}

/// The node's primary action once its slots are filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeAction {
    Respond { template: String },
    CallService { service: String, method: String },
    TransferToFlow { flow: String },
    End,
}

/// One dialog node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub name: String,
    pub action: NodeAction,

    /// Slots required before the action runs, in prompt order.
    #[serde(default)]
    pub required_slots: Vec<SlotSpec>,

    /// Intent → target node, in declaration order. `*` matches any
    /// intent without its own entry.
    #[serde(default)]
    pub transitions: Vec<(String, String)>,

    /// Suggestion chips offered with this node's response.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl FlowNode {
    /// First transition matching the intent; declaration order breaks
    /// ties, wildcard catches the rest.
    pub fn transition_for(&self, intent: &str) -> Option<&str> {
        self.transitions
            .iter()
            .find(|(key, _)| key == intent)
            .or_else(|| self.transitions.iter().find(|(key, _)| key == WILDCARD))
            .map(|(_, target)| target.as_str())
    }
}

/// A named dialog state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub entry: String,
    pub nodes: Vec<FlowNode>,
}

impl Flow {
    pub fn node(&self, name: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Validated, read-only collection of flows.
#[derive(Debug)]
pub struct FlowRegistry {
    flows: HashMap<String, Flow>,
}

impl FlowRegistry {
    /// Build and validate. Any structural defect is fatal here so it
    /// cannot surface mid-conversation.
    pub fn new(flows: Vec<Flow>) -> Result<Self, FlowError> {
        let registry = Self {
            flows: flows.into_iter().map(|f| (f.name.clone(), f)).collect(),
        };
        registry.validate()?;
        Ok(registry)
    }

    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.get(name)
    }

    pub fn fallback(&self) -> &Flow {
        self.flows
            .get(FALLBACK_FLOW)
            .expect("validated registry always carries the fallback flow")
    }

    fn validate(&self) -> Result<(), FlowError> {
        if !self.flows.contains_key(FALLBACK_FLOW) {
            return Err(FlowError::MissingFallbackFlow);
        }

        for flow in self.flows.values() {
            let names: HashSet<&str> = flow.nodes.iter().map(|n| n.name.as_str()).collect();
            if !names.contains(flow.entry.as_str()) {
                return Err(FlowError::MissingNode {
                    flow: flow.name.clone(),
                    node: flow.entry.clone(),
                });
            }

            for node in &flow.nodes {
                for (_, target) in &node.transitions {
                    if !names.contains(target.as_str()) {
                        return Err(FlowError::DanglingTransition {
                            flow: flow.name.clone(),
                            node: node.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
                if let NodeAction::TransferToFlow { flow: target } = &node.action {
                    if !self.flows.contains_key(target) {
                        return Err(FlowError::DanglingTransfer {
                            flow: flow.name.clone(),
                            node: node.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }

            // Reachability from the entry node.
            let mut seen: HashSet<&str> = HashSet::new();
            let mut queue: VecDeque<&str> = VecDeque::new();
            seen.insert(flow.entry.as_str());
            queue.push_back(flow.entry.as_str());
            while let Some(current) = queue.pop_front() {
                let node = flow.node(current).expect("checked above");
                for (_, target) in &node.transitions {
                    if seen.insert(target.as_str()) {
                        queue.push_back(target.as_str());
                    }
                }
            }
            for node in &flow.nodes {
                if !seen.contains(node.name.as_str()) {
                    return Err(FlowError::Unreachable {
                        flow: flow.name.clone(),
                        node: node.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The built-in tourism conversation.
    pub fn tourism_default() -> Self {
        let standard: Vec<(String, String)> = [
            ("greeting", "greet"),
            ("farewell", "end"),
            ("thanks", "thanks"),
            ("attraction_info", "attraction_info"),
            ("find_nearby", "nearby"),
            ("restaurant_search", "restaurants"),
            ("hotel_search", "hotels"),
            ("event_search", "events"),
            ("price_query", "attraction_info"),
            ("practical_info", "free_answer"),
            ("weather_query", "weather"),
            ("booking", "booking"),
            (WILDCARD, "free_answer"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();

        let chips = |keys: &[&str]| keys.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let node = |name: &str, action: NodeAction, slots: Vec<SlotSpec>, suggestions: Vec<String>| {
            FlowNode {
                name: name.to_string(),
                action,
                required_slots: slots,
                transitions: standard.clone(),
                suggestions,
            }
        };

        let slot = |name: &str, entity_type: &str| SlotSpec {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
        };

        let main = Flow {
            name: "main".into(),
            entry: "start".into(),
            nodes: vec![
                node(
                    "start",
                    NodeAction::Respond {
                        template: "welcome".into(),
                    },
                    vec![],
                    chips(&["chip.attractions", "chip.practical", "chip.events"]),
                ),
                node(
                    "greet",
                    NodeAction::Respond {
                        template: "welcome".into(),
                    },
                    vec![],
                    chips(&["chip.attractions", "chip.practical", "chip.events"]),
                ),
                node(
                    "thanks",
                    NodeAction::Respond {
                        template: "thanks".into(),
                    },
                    vec![],
                    chips(&["chip.attractions", "chip.events"]),
                ),
                node(
                    "attraction_info",
                    NodeAction::CallService {
                        service: "knowledge".into(),
                        method: "describe".into(),
                    },
                    vec![slot("attraction", "attraction")],
                    chips(&["chip.nearby", "chip.prices", "chip.events"]),
                ),
                node(
                    "nearby",
                    NodeAction::CallService {
                        service: "knowledge".into(),
                        method: "nearby".into(),
                    },
                    vec![slot("place", "destination")],
                    chips(&["chip.restaurants", "chip.hotels"]),
                ),
                node(
                    "restaurants",
                    NodeAction::CallService {
                        service: "knowledge".into(),
                        method: "search_restaurants".into(),
                    },
                    vec![],
                    chips(&["chip.nearby", "chip.attractions"]),
                ),
                node(
                    "hotels",
                    NodeAction::CallService {
                        service: "knowledge".into(),
                        method: "search_hotels".into(),
                    },
                    vec![],
                    chips(&["chip.nearby", "chip.attractions"]),
                ),
                node(
                    "events",
                    NodeAction::CallService {
                        service: "knowledge".into(),
                        method: "search_events".into(),
                    },
                    vec![],
                    chips(&["chip.attractions", "chip.practical"]),
                ),
                node(
                    "weather",
                    NodeAction::CallService {
                        service: "weather".into(),
                        method: "current".into(),
                    },
                    vec![slot("place", "destination")],
                    chips(&["chip.attractions", "chip.events"]),
                ),
                node(
                    "booking",
                    NodeAction::Respond {
                        template: "booking_handoff".into(),
                    },
                    vec![slot("attraction", "attraction"), slot("date", "date")],
                    chips(&["chip.prices", "chip.practical"]),
                ),
                node(
                    "free_answer",
                    NodeAction::CallService {
                        service: "rag".into(),
                        method: "answer".into(),
                    },
                    vec![],
                    chips(&["chip.attractions", "chip.practical"]),
                ),
                node("end", NodeAction::End, vec![], vec![]),
            ],
        };

        let fallback = Flow {
            name: FALLBACK_FLOW.into(),
            entry: "start".into(),
            nodes: vec![FlowNode {
                name: "start".into(),
                action: NodeAction::Respond {
                    template: "fallback".into(),
                },
                required_slots: vec![],
                transitions: vec![(WILDCARD.into(), "start".into())],
                suggestions: chips(&["chip.attractions", "chip.practical"]),
            }],
        };

        Self::new(vec![main, fallback]).expect("built-in flows are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_flow(name: &str) -> Flow {
        Flow {
            name: name.into(),
            entry: "start".into(),
            nodes: vec![FlowNode {
                name: "start".into(),
                action: NodeAction::Respond {
                    template: "t".into(),
                },
                required_slots: vec![],
                transitions: vec![(WILDCARD.into(), "start".into())],
                suggestions: vec![],
            }],
        }
    }

    #[test]
    fn test_builtin_flows_validate() {
        let registry = FlowRegistry::tourism_default();
        assert!(registry.flow("main").is_some());
        assert!(registry.flow(FALLBACK_FLOW).is_some());
    }

    #[test]
    fn test_missing_fallback_rejected() {
        let err = FlowRegistry::new(vec![minimal_flow("main")]).unwrap_err();
        assert!(matches!(err, FlowError::MissingFallbackFlow));
    }

    #[test]
    fn test_dangling_transition_rejected() {
        let mut flow = minimal_flow("main");
        flow.nodes[0]
            .transitions
            .push(("greeting".into(), "ghost".into()));
        let err =
            FlowRegistry::new(vec![flow, minimal_flow(FALLBACK_FLOW)]).unwrap_err();
        assert!(matches!(err, FlowError::DanglingTransition { .. }));
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let mut flow = minimal_flow("main");
        flow.nodes.push(FlowNode {
            name: "island".into(),
            action: NodeAction::End,
            required_slots: vec![],
            transitions: vec![],
            suggestions: vec![],
        });
        let err =
            FlowRegistry::new(vec![flow, minimal_flow(FALLBACK_FLOW)]).unwrap_err();
        assert!(matches!(err, FlowError::Unreachable { .. }));
    }

    #[test]
    fn test_dangling_transfer_rejected() {
        let mut flow = minimal_flow("main");
        flow.nodes[0].action = NodeAction::TransferToFlow {
            flow: "nowhere".into(),
        };
        let err =
            FlowRegistry::new(vec![flow, minimal_flow(FALLBACK_FLOW)]).unwrap_err();
        assert!(matches!(err, FlowError::DanglingTransfer { .. }));
    }

    #[test]
    fn test_transition_declaration_order_and_wildcard() {
        let node = FlowNode {
            name: "n".into(),
            action: NodeAction::End,
            required_slots: vec![],
            transitions: vec![
                ("greeting".into(), "a".into()),
                ("greeting".into(), "b".into()),
                (WILDCARD.into(), "c".into()),
            ],
            suggestions: vec![],
        };
        // First declaration wins for a duplicate intent key.
        assert_eq!(node.transition_for("greeting"), Some("a"));
        assert_eq!(node.transition_for("unheard_of"), Some("c"));
    }

    #[test]
    fn test_no_wildcard_no_match() {
        let node = FlowNode {
            name: "n".into(),
            action: NodeAction::End,
            required_slots: vec![],
            transitions: vec![("greeting".into(), "a".into())],
            suggestions: vec![],
        };
        assert_eq!(node.transition_for("booking"), None);
    }
}
