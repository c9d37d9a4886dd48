//! Recording push provider.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use pushgate_core::{
    provider::{NotifyError, Provider},
    storage::NotifyTarget,
};

/// One call a [`RecordingProvider`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// CSV payload
    pub payload: String,
    /// Device it was addressed to
    pub target: NotifyTarget,
}

/// Provider that records every call and answers from a script.
///
/// Unscripted calls succeed. Clones share the same record and script.
#[derive(Debug, Clone, Default)]
pub struct RecordingProvider {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    script: Arc<Mutex<VecDeque<Result<(), NotifyError>>>>,
    fail_all: Arc<Mutex<Option<NotifyError>>>,
}

impl RecordingProvider {
    /// Provider that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next call with `outcome`.
    pub fn push_outcome(&self, outcome: Result<(), NotifyError>) {
        self.script.lock().push_back(outcome);
    }

    /// Answer every unscripted call with `err` from now on.
    pub fn fail_with(&self, err: NotifyError) {
        *self.fail_all.lock() = Some(err);
    }

    /// Everything received so far.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Shareable handle for a `ProviderRegistry`.
    pub fn as_provider(&self) -> Arc<dyn Provider> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, payload: &str, target: &NotifyTarget) -> Result<(), NotifyError> {
        self.deliveries
            .lock()
            .push(Delivery { payload: payload.to_string(), target: target.clone() });

        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        match self.fail_all.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
