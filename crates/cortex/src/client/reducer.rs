//! Local conversation view and the reducer that updates it.
//!
//! `apply` is a pure function: the same view and event always produce the
//! same result, with no I/O. The consumer feeds it events in arrival order.

use cortex_protocol::{FALLBACK_MESSAGE, Message};

/// A client's copy of one thread's messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationView {
    pub messages: Vec<Message>,
}

impl ConversationView {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// The trailing message, if it is an assistant reply.
    pub fn trailing_assistant(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_assistant())
    }

    fn trailing_assistant_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut().filter(|m| m.is_assistant())
    }
}

/// Things that happen to a view during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// The user sent a message; a reply placeholder follows it.
    Submitted(String),
    /// A fragment of the reply arrived.
    Token(String),
    /// The stream ended with an error frame or broke.
    Failed,
    /// The user stopped the stream.
    Cancelled,
    /// The stream ended normally.
    Completed,
    /// A whole replacement reply arrived from a regenerate call.
    Regenerated(String),
}

/// Apply one event to a view.
pub fn apply(mut view: ConversationView, event: ViewEvent) -> ConversationView {
    match event {
        ViewEvent::Submitted(text) => {
            view.messages.push(Message::user(text));
            view.messages.push(Message::assistant(""));
        }
        ViewEvent::Token(fragment) => match view.trailing_assistant_mut() {
            Some(message) => message.content.push_str(&fragment),
            None => view.messages.push(Message::assistant(fragment)),
        },
        ViewEvent::Failed => set_trailing_assistant(&mut view, FALLBACK_MESSAGE),
        ViewEvent::Cancelled => {
            if view
                .trailing_assistant()
                .is_some_and(|m| m.content.is_empty())
            {
                view.messages.pop();
            }
        }
        ViewEvent::Completed => {
            if view
                .trailing_assistant()
                .is_some_and(|m| m.content.is_empty())
            {
                set_trailing_assistant(&mut view, FALLBACK_MESSAGE);
            }
        }
        ViewEvent::Regenerated(reply) => set_trailing_assistant(&mut view, &reply),
    }
    view
}

/// Replace the trailing assistant message's content, or append one.
fn set_trailing_assistant(view: &mut ConversationView, content: &str) {
    match view.trailing_assistant_mut() {
        Some(message) => message.content = content.to_string(),
        None => view.messages.push(Message::assistant(content)),
    }
}
