use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::types::{ChatClient, ChatRequest};
use super::LlmError;

/// What a `ScriptedChatClient` saw for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub user_text: Option<String>,
    pub has_image: bool,
}

/// Mock chat client replaying per-model scripted replies.
///
/// Each model has a queue of replies; the last entry repeats once the queue
/// is down to one. Models without a script fail with a 404.
#[derive(Default)]
pub struct ScriptedChatClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, LlmError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply for `model`.
    pub fn reply(self, model: &str, text: &str) -> Self {
        self.push(model, Ok(text.to_string()));
        self
    }

    /// Queue a failure for `model`.
    pub fn fail(self, model: &str, error: LlmError) -> Self {
        self.push(model, Err(error));
        self
    }

    fn push(&self, model: &str, reply: Result<String, LlmError>) {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.calls().iter().filter(|c| c.model == model).count()
    }
}

impl ChatClient for ScriptedChatClient {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedCall {
                model: request.model.to_string(),
                user_text: request.user_text.map(String::from),
                has_image: request.image_png.is_some(),
            });

        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        match scripts.get_mut(request.model) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::ResponseParsing("empty script".into()))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(LlmError::ResponseParsing("empty script".into()))),
            None => Err(LlmError::Api {
                status: 404,
                body: format!("model '{}' not found", request.model),
            }),
        }
    }
}
