use crate::llm::{LlmClient, LlmError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// Model double that records prompts and answers from a script.
pub(crate) struct ScriptedLlm {
    responder: Option<Responder>,
    yields: bool,
    queue: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    /// Answer every prompt with `responder`.
    pub(crate) fn replying<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Some(Box::new(responder)),
            yields: false,
            queue: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Answer prompts with `responses` in order; fail once exhausted.
    pub(crate) fn sequence(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            responder: None,
            yields: false,
            queue: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Like [`ScriptedLlm::replying`], but every call yields to the scheduler before answering.
    pub(crate) fn replying_slowly<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Some(Box::new(responder)),
            yields: true,
            queue: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Prompts received so far, in call order.
    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Prompts containing `marker`.
    pub(crate) fn prompts_containing(&self, marker: &str) -> Vec<String> {
        self.prompts()
            .into_iter()
            .filter(|prompt| prompt.contains(marker))
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.yields {
            tokio::task::yield_now().await;
        }
        if let Some(responder) = &self.responder {
            return responder(prompt);
        }
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::GenerationFailed("script exhausted".into())))
    }
}

/// Failure value used by scripted responders.
pub(crate) fn unavailable() -> LlmError {
    LlmError::ProviderUnavailable("scripted outage".into())
}
