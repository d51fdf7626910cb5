//! Dialog management: a state machine over flows, intents and slots.
//!
//! The current flow and node live on the session. Each turn looks up
//! the transition for the detected intent at the current node (wildcard
//! when nothing specific matches, global fallback flow when there is no
//! wildcard), fills slots from the turn's entities, prompts for the
//! first missing required slot, and otherwise emits the target node's
//! primary action.

pub mod action;
pub mod flow;
pub mod slots;

pub use action::DialogAction;
pub use flow::{Flow, FlowError, FlowNode, FlowRegistry, NodeAction, SlotSpec, FALLBACK_FLOW};

use crate::config::DialogConfig;
use crate::nlu::types::NluResult;
use crate::session::context::DialogState;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Bound on chained flow transfers within one turn.
const MAX_TRANSFERS: usize = 4;

pub struct DialogManager {
    flows: FlowRegistry,
    config: DialogConfig,
}

/// The manager's verdict for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogOutcome {
    pub action: DialogAction,
    /// Suggestion chips from the node that produced the action.
    pub suggestions: Vec<String>,
}

impl DialogManager {
    pub fn new(flows: FlowRegistry, config: DialogConfig) -> Self {
        Self { flows, config }
    }

    pub fn with_defaults(config: DialogConfig) -> Self {
        Self::new(FlowRegistry::tourism_default(), config)
    }

    /// Advance the state machine one turn and produce the next action.
    pub fn next_action(
        &self,
        nlu: &NluResult,
        state: &mut DialogState,
        current_turn: u64,
    ) -> DialogOutcome {
        slots::expire_slots(state, current_turn, self.config.slot_ttl_turns);
        slots::fill_from_entities(state, &nlu.entities, current_turn);

        // A stale or foreign state resets to the main flow.
        let flow = match self.flows.flow(&state.flow) {
            Some(flow) => flow,
            None => {
                warn!(flow = %state.flow, "unknown flow on session, resetting");
                state.flow = "main".into();
                state.node = "start".into();
                self.flows.flow("main").unwrap_or_else(|| self.flows.fallback())
            }
        };
        let node = match flow.node(&state.node) {
            Some(node) => node,
            None => {
                warn!(flow = %flow.name, node = %state.node, "unknown node on session, resetting");
                state.node = flow.entry.clone();
                flow.node(&flow.entry).expect("validated entry")
            }
        };

        // Transition on the intent; a node without a wildcard sends
        // unknown intents to the global fallback flow.
        let mut target = match node.transition_for(&nlu.intent) {
            Some(target) => {
                state.flow = flow.name.clone();
                state.node = target.to_string();
                flow.node(target).expect("validated transition")
            }
            None => {
                debug!(intent = %nlu.intent, "no transition, entering fallback flow");
                let fallback = self.flows.fallback();
                state.flow = fallback.name.clone();
                state.node = fallback.entry.clone();
                fallback.node(&fallback.entry).expect("validated entry")
            }
        };

        // Follow declarative transfers to their destination flow.
        let mut hops = 0;
        while let NodeAction::TransferToFlow { flow: next_flow } = &target.action {
            hops += 1;
            if hops > MAX_TRANSFERS {
                warn!("transfer chain exceeded bound, entering fallback flow");
                let fallback = self.flows.fallback();
                target = fallback.node(&fallback.entry).expect("validated entry");
                state.flow = fallback.name.clone();
                state.node = fallback.entry.clone();
                break;
            }
            let next = self.flows.flow(next_flow).expect("validated transfer");
            target = next.node(&next.entry).expect("validated entry");
            state.flow = next.name.clone();
            state.node = next.entry.clone();
        }

        // Prompt for the first missing required slot, in declaration
        // order; the node stays current so the answer lands here.
        for spec in &target.required_slots {
            if !state.slots.contains_key(&spec.entity_type) {
                debug!(slot = %spec.name, "prompting for missing slot");
                return DialogOutcome {
                    action: DialogAction::Prompt {
                        slot: spec.name.clone(),
                    },
                    suggestions: target.suggestions.clone(),
                };
            }
        }

        let action = match &target.action {
            NodeAction::Respond { template } => DialogAction::Respond {
                template: template.clone(),
                params: slot_params(state),
            },
            NodeAction::CallService { service, method } => DialogAction::CallService {
                service: service.clone(),
                method: method.clone(),
                params: json!({
                    "slots": state.slots,
                    "intent": nlu.intent,
                    "language": nlu.language,
                }),
            },
            NodeAction::TransferToFlow { flow } => DialogAction::TransferToFlow {
                flow: flow.clone(),
            },
            NodeAction::End => {
                // The conversation restarts cleanly if the user comes
                // back on the same session.
                state.flow = "main".into();
                state.node = "start".into();
                state.slots.clear();
                DialogAction::EndConversation
            }
        };

        DialogOutcome {
            action,
            suggestions: target.suggestions.clone(),
        }
    }
}

/// Slot values as template parameters.
fn slot_params(state: &DialogState) -> HashMap<String, String> {
    state
        .slots
        .iter()
        .filter_map(|(name, _)| {
            slots::slot_text(state, name).map(|text| (name.clone(), text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlu::types::{NluEntity, NluResult};

    fn manager() -> DialogManager {
        DialogManager::with_defaults(DialogConfig::default())
    }

    fn nlu(intent: &str) -> NluResult {
        NluResult {
            language: "en".into(),
            language_confidence: 1.0,
            intent: intent.into(),
            confidence: 0.9,
            entities: vec![],
            utterance_hash: String::new(),
        }
    }

    fn nlu_with_entity(intent: &str, entity_type: &str, id: i64, value: &str) -> NluResult {
        let mut result = nlu(intent);
        result.entities.push(NluEntity {
            entity_type: entity_type.into(),
            surface: value.into(),
            canonical_id: Some(id),
            canonical_value: Some(value.into()),
            span: (0, value.len()),
        });
        result
    }

    #[test]
    fn test_greeting_responds_with_suggestions() {
        let manager = manager();
        let mut state = DialogState::default();
        let outcome = manager.next_action(&nlu("greeting"), &mut state, 1);

        assert!(matches!(
            outcome.action,
            DialogAction::Respond { ref template, .. } if template == "welcome"
        ));
        assert!(!outcome.suggestions.is_empty());
        assert_eq!(state.node, "greet");
    }

    #[test]
    fn test_missing_slot_prompts_in_declaration_order() {
        let manager = manager();
        let mut state = DialogState::default();
        let outcome = manager.next_action(&nlu("attraction_info"), &mut state, 1);

        assert_eq!(
            outcome.action,
            DialogAction::Prompt {
                slot: "attraction".into()
            }
        );
        // The node advanced so the follow-up answer lands here.
        assert_eq!(state.node, "attraction_info");
    }

    #[test]
    fn test_filled_slot_runs_primary_action() {
        let manager = manager();
        let mut state = DialogState::default();
        let outcome = manager.next_action(
            &nlu_with_entity("attraction_info", "attraction", 7, "Pyramids of Giza"),
            &mut state,
            1,
        );

        match outcome.action {
            DialogAction::CallService {
                service, method, params,
            } => {
                assert_eq!(service, "knowledge");
                assert_eq!(method, "describe");
                assert_eq!(params["slots"]["attraction"]["value"]["id"], 7);
            }
            other => panic!("expected service call, got {other:?}"),
        }
    }

    #[test]
    fn test_slot_survives_across_turns_for_followup() {
        let manager = manager();
        let mut state = DialogState::default();

        manager.next_action(
            &nlu_with_entity("attraction_info", "attraction", 7, "Pyramids"),
            &mut state,
            1,
        );
        // Next turn asks about prices with no new entity; the slot is
        // still filled so no prompt is needed.
        let outcome = manager.next_action(&nlu("price_query"), &mut state, 2);
        assert!(matches!(outcome.action, DialogAction::CallService { .. }));
    }

    #[test]
    fn test_slot_expires_after_ttl() {
        let manager = manager();
        let mut state = DialogState::default();
        manager.next_action(
            &nlu_with_entity("attraction_info", "attraction", 7, "Pyramids"),
            &mut state,
            1,
        );

        let outcome = manager.next_action(&nlu("attraction_info"), &mut state, 12);
        assert_eq!(
            outcome.action,
            DialogAction::Prompt {
                slot: "attraction".into()
            }
        );
    }

    #[test]
    fn test_unknown_intent_takes_wildcard() {
        let manager = manager();
        let mut state = DialogState::default();
        let outcome = manager.next_action(&nlu("fallback"), &mut state, 1);

        match outcome.action {
            DialogAction::CallService { service, method, .. } => {
                assert_eq!(service, "rag");
                assert_eq!(method, "answer");
            }
            other => panic!("expected rag call, got {other:?}"),
        }
    }

    #[test]
    fn test_farewell_ends_and_resets() {
        let manager = manager();
        let mut state = DialogState::default();
        state.node = "greet".into();

        let outcome = manager.next_action(&nlu("farewell"), &mut state, 1);
        assert_eq!(outcome.action, DialogAction::EndConversation);
        assert_eq!(state.flow, "main");
        assert_eq!(state.node, "start");
    }

    #[test]
    fn test_corrupt_state_resets_to_main() {
        let manager = manager();
        let mut state = DialogState {
            flow: "ghost-flow".into(),
            node: "nowhere".into(),
            slots: Default::default(),
        };
        let outcome = manager.next_action(&nlu("greeting"), &mut state, 1);
        assert_eq!(state.flow, "main");
        assert!(matches!(outcome.action, DialogAction::Respond { .. }));
    }
}
