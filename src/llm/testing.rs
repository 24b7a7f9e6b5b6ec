//! Scripted language model used by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CompletionRequest, LanguageModel, LanguageModelError};

enum Scripted {
    Reply(String),
    Failure(String),
    Empty,
}

/// Replays queued replies in order and records every request it receives.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn replying(replies: &[&str]) -> Self {
        let model = Self::new();
        for reply in replies {
            model.push_reply(reply);
        }
        model
    }

    fn push(&self, scripted: Scripted) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(scripted);
    }

    pub(crate) fn push_reply(&self, reply: &str) {
        self.push(Scripted::Reply(reply.to_string()));
    }

    pub(crate) fn push_failure(&self, message: &str) {
        self.push(Scripted::Failure(message.to_string()));
    }

    /// Queue a blank completion, as returned when reasoning exhausts the token budget.
    pub(crate) fn push_empty(&self) {
        self.push(Scripted::Empty);
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LanguageModelError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request);
        match self.replies.lock().expect("replies lock").pop_front() {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Failure(message)) => Err(LanguageModelError::GenerationFailed(message)),
            Some(Scripted::Empty) | None => Err(LanguageModelError::EmptyCompletion),
        }
    }
}
