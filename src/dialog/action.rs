//! Dialog actions.

use serde_json::Value;
use std::collections::HashMap;

/// What the dialog manager wants done with this turn.
///
/// Knowledge lookups and RAG answering ride the `CallService` shape
/// under the reserved service names `knowledge` and `rag`; the
/// orchestrator routes those internally instead of through the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogAction {
    /// Render a response template with parameters.
    Respond {
        template: String,
        params: HashMap<String, String>,
    },

    /// Ask the user for a missing slot value.
    Prompt { slot: String },

    /// Invoke a named service method.
    CallService {
        service: String,
        method: String,
        params: Value,
    },

    /// Hand the conversation to another flow.
    TransferToFlow { flow: String },

    /// Close the conversation.
    EndConversation,
}
