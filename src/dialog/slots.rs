//! Slot filling and expiry.
//!
//! Slots are named by entity type and live on the session's dialog
//! state. Entities from each turn fill matching slots; a slot filled
//! more than the configured number of turns ago is cleared before the
//! transition is evaluated.

use crate::nlu::types::NluEntity;
use crate::session::context::{DialogState, SlotValue};
use serde_json::json;
use tracing::debug;

/// Clear slots whose fill turn is out of the retention window.
pub fn expire_slots(state: &mut DialogState, current_turn: u64, ttl_turns: u64) {
    let before = state.slots.len();
    state
        .slots
        .retain(|_, slot| current_turn.saturating_sub(slot.filled_at_turn) < ttl_turns);
    let dropped = before - state.slots.len();
    if dropped > 0 {
        debug!(dropped, "expired dialog slots");
    }
}

/// Populate slots from this turn's entities. Slots are keyed by entity
/// type; the first entity of a type wins within one turn, and a newer
/// turn overwrites older fills of the same type.
pub fn fill_from_entities(state: &mut DialogState, entities: &[NluEntity], current_turn: u64) {
    for entity in entities {
        let slot_name = entity.entity_type.clone();
        if let Some(existing) = state.slots.get(&slot_name) {
            if existing.filled_at_turn == current_turn {
                continue;
            }
        }
        let text = entity
            .canonical_value
            .clone()
            .unwrap_or_else(|| entity.surface.clone());
        state.slots.insert(
            slot_name,
            SlotValue {
                value: json!({
                    "id": entity.canonical_id,
                    "text": text,
                }),
                entity_type: entity.entity_type.clone(),
                filled_at_turn: current_turn,
            },
        );
    }
}

/// The display text of a filled slot.
pub fn slot_text(state: &DialogState, name: &str) -> Option<String> {
    state
        .slots
        .get(name)
        .and_then(|slot| slot.value.get("text"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

/// The canonical id of a filled slot, when resolution succeeded.
pub fn slot_id(state: &DialogState, name: &str) -> Option<i64> {
    state
        .slots
        .get(name)
        .and_then(|slot| slot.value.get("id"))
        .and_then(|v| v.as_i64())
}
