//! Scripted provider for tests and simulations

use super::client::{Credential, InvokeOutcome, InvokeParams, ModelEndpointClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Provider whose answers are queued per model id ahead of time.
///
/// Models with nothing queued answer `Ok("<model_id> ok")`. Every call is
/// logged as `model_id@account_id`.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<InvokeOutcome>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next answer for a model
    pub fn push(&self, model_id: impl Into<String>, outcome: InvokeOutcome) -> &Self {
        self.scripts
            .lock()
            .entry(model_id.into())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ModelEndpointClient for ScriptedClient {
    async fn invoke(
        &self,
        credential: &Credential,
        model_id: &str,
        _prompt: &str,
        _params: &InvokeParams,
    ) -> InvokeOutcome {
        self.calls
            .lock()
            .push(format!("{}@{}", model_id, credential.account_id));

        self.scripts
            .lock()
            .get_mut(model_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| InvokeOutcome::Ok(format!("{} ok", model_id)))
    }
}
