use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use thiserror::Error;
use tiktoken_rs::CoreBPE;

use crate::message::Message;

const TOKENS_PER_MESSAGE: usize = 3;
const REPLY_PRIMING_TOKENS: usize = 3;

static ENCODERS: Lazy<Mutex<HashMap<String, Arc<CoreBPE>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenBudgetError {
    #[error(
        "request for `{model}` needs {input_tokens} input tokens but the context window is {context_window}"
    )]
    ContextExceeded {
        model: String,
        input_tokens: usize,
        context_window: usize,
    },
    #[error("failed to load token encoding: {0}")]
    Encoding(String),
}

/// Resolved limits for a single request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenBudget {
    pub input_tokens: usize,
    pub max_output_tokens: u32,
}

impl TokenBudget {
    pub fn for_messages(
        model: &str,
        context_window: usize,
        messages: &[Message],
    ) -> Result<Self, TokenBudgetError> {
        let input_tokens = estimate_message_tokens(model, messages)?;
        let max_output_tokens = output_budget(model, context_window, input_tokens)?;
        Ok(Self {
            input_tokens,
            max_output_tokens,
        })
    }
}

/// Remaining room in the context window once the input is accounted for.
pub fn output_budget(
    model: &str,
    context_window: usize,
    input_tokens: usize,
) -> Result<u32, TokenBudgetError> {
    if input_tokens >= context_window {
        return Err(TokenBudgetError::ContextExceeded {
            model: model.to_string(),
            input_tokens,
            context_window,
        });
    }
    let remaining = context_window - input_tokens;
    Ok(u32::try_from(remaining).unwrap_or(u32::MAX))
}

pub fn estimate_message_tokens(model: &str, messages: &[Message]) -> Result<usize, TokenBudgetError> {
    let encoder = encoder_for(model)?;
    let mut total = 0;
    for message in messages {
        total += TOKENS_PER_MESSAGE;
        total += encoder.encode_with_special_tokens(message.role.as_str()).len();
        total += encoder.encode_with_special_tokens(&message.content).len();
    }
    Ok(total + REPLY_PRIMING_TOKENS)
}

pub fn count_text_tokens(model: &str, text: &str) -> Result<usize, TokenBudgetError> {
    Ok(encoder_for(model)?.encode_with_special_tokens(text).len())
}

fn encoder_for(model: &str) -> Result<Arc<CoreBPE>, TokenBudgetError> {
    let mut cache = ENCODERS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(encoder) = cache.get(model) {
        return Ok(Arc::clone(encoder));
    }

    let encoder = match tiktoken_rs::get_bpe_from_model(model) {
        Ok(encoder) => encoder,
        Err(_) => {
            log::debug!("no token encoding registered for `{model}`, using cl100k_base");
            tiktoken_rs::cl100k_base()
                .map_err(|err| TokenBudgetError::Encoding(err.to_string()))?
        }
    };
    let encoder = Arc::new(encoder);
    cache.insert(model.to_string(), Arc::clone(&encoder));
    Ok(encoder)
}
