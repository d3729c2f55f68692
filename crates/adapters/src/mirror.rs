use std::sync::Arc;

use book_core::{Message, MessageLog};
use log::{debug, warn};

/// Copies requests and answers to the optional message log and the debug log.
#[derive(Clone, Default)]
pub(crate) struct Mirror {
    log: Option<Arc<MessageLog>>,
}

impl Mirror {
    pub(crate) fn new(log: Option<Arc<MessageLog>>) -> Self {
        Self { log }
    }

    pub(crate) fn request(&self, model: &str, messages: &[Message], tokens: usize) {
        debug!("request to {model}: {} messages, ~{tokens} tokens", messages.len());
        for message in messages {
            debug!("{}: {}", message.role, message.content);
        }
        self.write("message", messages, tokens);
    }

    pub(crate) fn answer(&self, answer: &Message, tokens: usize) {
        debug!("answer: {}", answer.content);
        self.write("answer", std::slice::from_ref(answer), tokens);
    }

    fn write(&self, label: &str, messages: &[Message], tokens: usize) {
        if let Some(log) = &self.log {
            if let Err(err) = log.write_messages(label, messages, tokens) {
                warn!("failed to write {}: {}", log.path().display(), err);
            }
        }
    }
}
