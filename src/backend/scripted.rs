//! A deterministic, queue-driven `Backend` used by this crate's own tests and
//! as a worked example of implementing the trait. Each call to `send` pops
//! the next scripted [`BackendResponse`] off an internal queue; an empty
//! queue yields a plain "no tool call" response with zero cost.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use super::{Backend, BackendError, BackendResponse};
use crate::message::Message;

pub struct ScriptedBackend {
    model: String,
    queue: Mutex<VecDeque<BackendResponse>>,
}

impl ScriptedBackend {
    pub fn new(model: impl Into<String>, script: Vec<BackendResponse>) -> Self {
        ScriptedBackend {
            model: model.into(),
            queue: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn send(&self, _messages: &[Message]) -> Result<BackendResponse, BackendError> {
        let mut queue = self.queue.lock().await;
        Ok(queue.pop_front().unwrap_or_default())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
