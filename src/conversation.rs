use crate::constants::{REASONING_PLACEHOLDER_TEXT, TOOL_THOUGHT_FIELD};
use crate::envelope::{ConversationEvent, OutputItemKind};
use crate::partial_json::extract_string_field;
use crate::types::{ActiveToolCall, Message, MessageId};
use tokio::sync::mpsc;

/// Per-character progress notifications for an embedding UI. Delivery is
/// best-effort; a dropped receiver never stalls reconstruction.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    MessageOpened { message: MessageId },
    TextChar { message: MessageId, ch: char },
    ReasoningChar { message: MessageId, ch: char },
    ThoughtReplaced { message: MessageId },
    MessageClosed { message: MessageId },
}

/// Rebuilds the ordered message list for one conversation turn from the
/// envelope sequence. Owns every piece of mutable turn state: the message
/// list, the single open tool call, the single reasoning placeholder, and
/// the side-buffered reasoning summary awaiting its concrete item.
pub struct ConversationReconstructor {
    messages: Vec<Message>,
    active_tool_call: Option<ActiveToolCall>,
    reasoning_placeholder: Option<MessageId>,
    current_reasoning_summary: String,
    error: Option<String>,
    updates: Option<mpsc::UnboundedSender<StreamUpdate>>,
}

impl Default for ConversationReconstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationReconstructor {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            active_tool_call: None,
            reasoning_placeholder: None,
            current_reasoning_summary: String::new(),
            error: None,
            updates: None,
        }
    }

    /// Attaches an observer channel for per-character updates.
    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<StreamUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn active_tool_call(&self) -> Option<&ActiveToolCall> {
        self.active_tool_call.as_ref()
    }

    pub fn has_reasoning_placeholder(&self) -> bool {
        self.reasoning_placeholder.is_some()
    }

    /// Records a user message ahead of the turn's streamed reply.
    pub fn push_user_message(&mut self, content: impl Into<String>) -> MessageId {
        let message = Message::user(content);
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Applies one decoded envelope. Returns true when the event terminates
    /// the turn (currently only the `error` envelope).
    pub fn apply(&mut self, event: ConversationEvent) -> bool {
        match event {
            ConversationEvent::Heartbeat => false,
            ConversationEvent::OutputTextDelta { delta } => {
                self.append_text(&delta);
                false
            }
            ConversationEvent::ReasoningSummaryDelta { delta } => {
                self.append_reasoning(&delta);
                false
            }
            ConversationEvent::OutputItemAdded {
                item_type,
                function_name,
            } => {
                self.open_item(item_type, function_name);
                false
            }
            ConversationEvent::FunctionCallArgumentsDelta { delta } => {
                self.append_tool_arguments(&delta);
                false
            }
            ConversationEvent::FunctionCallArgumentsDone => {
                self.close_tool_call();
                false
            }
            ConversationEvent::Error { error } => {
                self.fail(error);
                true
            }
        }
    }

    /// Natural stream end with no prior error envelope: unwind any open
    /// placeholder state and retire streaming flags.
    pub fn finish(&mut self) {
        self.remove_placeholder();
        self.close_tool_call();
        self.close_last_message();
    }

    /// Transport-level failure or protocol `error` envelope. The turn ends;
    /// the session survives.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.remove_placeholder();
        if let Some(call) = self.active_tool_call.take() {
            self.set_streaming(call.thought_message, false);
        }
        self.close_last_message();
        self.error = Some(error.into());
    }

    fn append_text(&mut self, delta: &str) {
        if self.last_open_assistant().is_none() {
            // The producer should have opened a message item first; recover
            // rather than drop the text.
            tracing::warn!("[TURN] output_text.delta with no open message; opening one");
            self.open_message();
        }
        let updates = self.updates.clone();
        if let Some(message) = self.last_open_assistant() {
            let id = message.id;
            for ch in delta.chars() {
                message.content.push(ch);
                if let Some(tx) = &updates {
                    let _ = tx.send(StreamUpdate::TextChar { message: id, ch });
                }
            }
        }
    }

    fn append_reasoning(&mut self, delta: &str) {
        self.current_reasoning_summary.push_str(delta);
        let updates = self.updates.clone();
        if let Some(message) = self.messages.last_mut().filter(|m| m.is_streaming) {
            let id = message.id;
            let summary = message.reasoning_summary.get_or_insert_with(String::new);
            for ch in delta.chars() {
                summary.push(ch);
                if let Some(tx) = &updates {
                    let _ = tx.send(StreamUpdate::ReasoningChar { message: id, ch });
                }
            }
        }
    }

    fn open_item(&mut self, item_type: OutputItemKind, function_name: Option<String>) {
        match item_type {
            OutputItemKind::Reasoning => {
                // Idempotent: a second reasoning item while the placeholder
                // is live does nothing.
                if self.reasoning_placeholder.is_some() {
                    return;
                }
                let mut message = Message::assistant();
                message.content = REASONING_PLACEHOLDER_TEXT.to_string();
                let id = message.id;
                self.messages.push(message);
                self.reasoning_placeholder = Some(id);
                self.notify(StreamUpdate::MessageOpened { message: id });
            }
            OutputItemKind::Message => {
                self.remove_placeholder();
                self.open_message();
            }
            OutputItemKind::FunctionCall => {
                self.remove_placeholder();
                if self.active_tool_call.is_some() {
                    tracing::warn!("[TURN] function_call item while a call is open; closing stale call");
                    self.close_tool_call();
                }
                let name = match function_name {
                    Some(n) => n,
                    None => {
                        tracing::warn!("[TURN] function_call item without function_name");
                        String::new()
                    }
                };
                let mut thought = Message::assistant();
                thought.function_name = Some(name.clone());
                thought.reasoning_summary = self.take_reasoning_summary();
                let id = thought.id;
                self.messages.push(thought);
                self.active_tool_call = Some(ActiveToolCall {
                    function_name: name,
                    raw_arguments: String::new(),
                    thought_message: id,
                });
                self.notify(StreamUpdate::MessageOpened { message: id });
            }
        }
    }

    fn open_message(&mut self) {
        let mut message = Message::assistant();
        message.reasoning_summary = self.take_reasoning_summary();
        let id = message.id;
        self.messages.push(message);
        self.notify(StreamUpdate::MessageOpened { message: id });
    }

    fn append_tool_arguments(&mut self, delta: &str) {
        let (thought_id, extracted) = match self.active_tool_call.as_mut() {
            Some(call) => {
                call.raw_arguments.push_str(delta);
                (
                    call.thought_message,
                    extract_string_field(&call.raw_arguments, TOOL_THOUGHT_FIELD),
                )
            }
            None => {
                tracing::warn!("[TURN] function_call_arguments.delta with no open call; dropping");
                return;
            }
        };
        if let Some(thought) = extracted {
            self.replace_thought(thought_id, thought);
        }
    }

    fn close_tool_call(&mut self) {
        let Some(call) = self.active_tool_call.take() else {
            return;
        };
        // Final extraction pass over the now-complete argument blob.
        if let Some(thought) = extract_string_field(&call.raw_arguments, TOOL_THOUGHT_FIELD) {
            self.replace_thought(call.thought_message, thought);
        }
        self.set_streaming(call.thought_message, false);
        self.notify(StreamUpdate::MessageClosed {
            message: call.thought_message,
        });
    }

    /// The thought field is re-derived from the whole accumulated blob on
    /// each delta, so the companion message's content is replaced, not
    /// appended.
    fn replace_thought(&mut self, id: MessageId, thought: String) {
        let mut changed = false;
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            if message.content != thought {
                message.content = thought;
                changed = true;
            }
        }
        if changed {
            self.notify(StreamUpdate::ThoughtReplaced { message: id });
        }
    }

    fn remove_placeholder(&mut self) {
        let Some(id) = self.reasoning_placeholder.take() else {
            return;
        };
        // Placeholder text is discarded; the side-buffered reasoning summary
        // survives to be transplanted onto the next concrete item.
        self.messages.retain(|m| m.id != id);
        self.notify(StreamUpdate::MessageClosed { message: id });
    }

    fn take_reasoning_summary(&mut self) -> Option<String> {
        if self.current_reasoning_summary.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.current_reasoning_summary))
    }

    fn close_last_message(&mut self) {
        let updates = self.updates.clone();
        if let Some(message) = self.messages.last_mut() {
            if message.is_streaming {
                message.is_streaming = false;
                if let Some(tx) = &updates {
                    let _ = tx.send(StreamUpdate::MessageClosed { message: message.id });
                }
            }
        }
    }

    fn set_streaming(&mut self, id: MessageId, streaming: bool) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.is_streaming = streaming;
        }
    }

    fn last_open_assistant(&mut self) -> Option<&mut Message> {
        self.messages
            .last_mut()
            .filter(|m| m.sender == crate::types::Sender::Assistant && m.is_streaming)
    }

    fn notify(&self, update: StreamUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(kind: OutputItemKind, name: Option<&str>) -> ConversationEvent {
        ConversationEvent::OutputItemAdded {
            item_type: kind,
            function_name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_reasoning_placeholder_idempotent() {
        let mut recon = ConversationReconstructor::new();
        recon.apply(added(OutputItemKind::Reasoning, None));
        recon.apply(added(OutputItemKind::Reasoning, None));
        assert_eq!(recon.messages().len(), 1);
        assert_eq!(recon.messages()[0].content, REASONING_PLACEHOLDER_TEXT);
    }

    #[test]
    fn test_at_most_one_open_invariant() {
        let mut recon = ConversationReconstructor::new();
        recon.apply(added(OutputItemKind::Reasoning, None));
        assert!(recon.has_reasoning_placeholder());
        assert!(recon.active_tool_call().is_none());

        recon.apply(added(OutputItemKind::FunctionCall, Some("grep")));
        assert!(!recon.has_reasoning_placeholder());
        assert!(recon.active_tool_call().is_some());

        recon.apply(ConversationEvent::FunctionCallArgumentsDone);
        assert!(recon.active_tool_call().is_none());
    }

    #[test]
    fn test_heartbeat_is_inert() {
        let mut recon = ConversationReconstructor::new();
        assert!(!recon.apply(ConversationEvent::Heartbeat));
        assert!(recon.messages().is_empty());
    }

    #[test]
    fn test_text_delta_without_open_message_recovers() {
        let mut recon = ConversationReconstructor::new();
        recon.apply(ConversationEvent::OutputTextDelta {
            delta: "hi".to_string(),
        });
        assert_eq!(recon.messages().len(), 1);
        assert_eq!(recon.messages()[0].content, "hi");
    }

    #[test]
    fn test_arguments_delta_without_open_call_dropped() {
        let mut recon = ConversationReconstructor::new();
        recon.apply(ConversationEvent::FunctionCallArgumentsDelta {
            delta: "{\"thought\":\"x\"}".to_string(),
        });
        assert!(recon.messages().is_empty());
        assert!(recon.active_tool_call().is_none());
    }

    #[test]
    fn test_thought_replaced_not_appended() {
        let mut recon = ConversationReconstructor::new();
        recon.apply(added(OutputItemKind::FunctionCall, Some("write_file")));
        recon.apply(ConversationEvent::FunctionCallArgumentsDelta {
            delta: "{\"thought\":\"Wri".to_string(),
        });
        assert_eq!(recon.messages()[0].content, "Wri");
        recon.apply(ConversationEvent::FunctionCallArgumentsDelta {
            delta: "te file\"}".to_string(),
        });
        assert_eq!(recon.messages()[0].content, "Write file");
    }

    #[test]
    fn test_error_envelope_terminates_turn() {
        let mut recon = ConversationReconstructor::new();
        recon.apply(added(OutputItemKind::Message, None));
        recon.apply(ConversationEvent::OutputTextDelta {
            delta: "part".to_string(),
        });
        let terminal = recon.apply(ConversationEvent::Error {
            error: "upstream failed".to_string(),
        });
        assert!(terminal);
        assert_eq!(recon.error(), Some("upstream failed"));
        assert!(!recon.messages().last().expect("message").is_streaming);
    }

    #[test]
    fn test_stale_tool_call_closed_before_new_one() {
        let mut recon = ConversationReconstructor::new();
        recon.apply(added(OutputItemKind::FunctionCall, Some("grep")));
        recon.apply(added(OutputItemKind::FunctionCall, Some("read_file")));
        assert_eq!(recon.messages().len(), 2);
        assert!(!recon.messages()[0].is_streaming);
        let call = recon.active_tool_call().expect("open call");
        assert_eq!(call.function_name, "read_file");
    }
}
