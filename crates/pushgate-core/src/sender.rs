//! Batching sender.
//!
//! Every `notification_rate` the sender drains the buffer, packs each
//! ephemeral id's records into one CSV payload, resolves the devices behind
//! the ephemeral ids, and fans the payloads out to the providers, one task
//! per device.
//!
//! # Retry rules
//!
//! - Records past the per-recipient cap or the payload budget go back into
//!   the buffer for the next cycle.
//! - If resolving devices fails, nothing was sent yet, so every drained
//!   record goes back into the buffer.
//! - Once dispatch starts nothing is requeued. A provider failure either
//!   prunes the token or is logged; the next round reaches the device anyway.
//! - A single record too large for an empty payload can never be sent and
//!   is dropped with a warning.

use std::{collections::HashMap, sync::Arc, time::Duration};

use pushgate_proto::csv::{NOTIFICATION_DATA_KEY, build_notification_csv};
use tokio::{task::JoinSet, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    buffer::{NotificationBuffer, NotificationRecord},
    provider::{NotifyError, ProviderRegistry},
    storage::{self, NotifyTarget, Storage},
};

/// Sender tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    /// Time between cycles
    pub notification_rate: Duration,
    /// Most records packed for one ephemeral id per cycle
    pub max_notifications: usize,
    /// Provider payload limit in bytes, including the data key
    pub max_payload_bytes: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            notification_rate: Duration::from_secs(30),
            max_notifications: 20,
            max_payload_bytes: 4096,
        }
    }
}

impl SenderConfig {
    /// Bytes left for the CSV body once the data key is accounted for.
    pub fn csv_budget(&self) -> usize {
        self.max_payload_bytes.saturating_sub(NOTIFICATION_DATA_KEY.len())
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records taken from the buffer
    pub drained: usize,
    /// Devices resolved
    pub targets: usize,
    /// Payloads the providers accepted
    pub delivered: usize,
    /// Tokens pruned as invalid
    pub invalidated: usize,
    /// Transient delivery failures
    pub failed: usize,
    /// Records put back into the buffer
    pub requeued: usize,
    /// Records dropped because they can never fit a payload
    pub dropped: usize,
    /// Devices whose app has no provider
    pub skipped: usize,
}

enum Dispatch {
    Delivered,
    Invalidated,
    Failed,
}

/// Drains the buffer and dispatches to providers.
#[derive(Debug)]
pub struct Sender<S> {
    buffer: Arc<NotificationBuffer>,
    storage: Arc<S>,
    providers: ProviderRegistry,
    config: SenderConfig,
}

impl<S: Storage> Sender<S> {
    /// Create a sender.
    pub fn new(
        buffer: Arc<NotificationBuffer>,
        storage: Arc<S>,
        providers: ProviderRegistry,
        config: SenderConfig,
    ) -> Self {
        Self { buffer, storage, providers, config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Run one drain-and-dispatch cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let drained = self.buffer.swap();
        if drained.is_empty() {
            return CycleReport::default();
        }

        let mut report = CycleReport {
            drained: drained.values().map(Vec::len).sum(),
            ..CycleReport::default()
        };

        let ephemeral_ids: Vec<i64> = drained.keys().copied().collect();
        let resolved =
            storage::blocking(&self.storage, move |s| s.get_to_notify(&ephemeral_ids)).await;
        let targets = match resolved {
            Ok(targets) => targets,
            Err(err) => {
                warn!(error = %err, records = report.drained, "resolving targets failed, requeueing cycle");
                report.requeued = report.drained;
                self.buffer.extend(drained.into_values().flatten());
                return report;
            },
        };

        let mut payloads = HashMap::with_capacity(drained.len());
        let mut unsent = Vec::new();
        let cap = self.config.max_notifications.max(1);
        for (ephemeral_id, mut records) in drained {
            if records.len() > cap {
                unsent.extend(records.split_off(cap));
            }

            let (csv, mut rest) = build_notification_csv(records, self.config.csv_budget());
            if csv.is_empty() && !rest.is_empty() {
                let oversized = rest.remove(0);
                warn!(
                    ephemeral_id,
                    round_id = oversized.round_id,
                    budget = self.config.csv_budget(),
                    "dropping notification larger than the payload budget"
                );
                report.dropped += 1;
            }
            unsent.extend(rest);

            if !csv.is_empty() {
                payloads.insert(ephemeral_id, Arc::<str>::from(csv));
            }
        }

        report.targets = targets.len();
        let mut tasks = JoinSet::new();
        for target in targets {
            let Some(payload) = payloads.get(&target.ephemeral_id).cloned() else {
                continue;
            };
            let Some(provider) = self.providers.get(&target.app) else {
                warn!(app = %target.app, "no provider for app, skipping device");
                report.skipped += 1;
                continue;
            };

            let storage = Arc::clone(&self.storage);
            tasks.spawn(async move {
                let outcome = provider.notify(&payload, &target).await;
                match outcome {
                    Ok(()) => Dispatch::Delivered,
                    Err(err) => handle_failure(&storage, provider.name(), target, &err).await,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Dispatch::Delivered) => report.delivered += 1,
                Ok(Dispatch::Invalidated) => report.invalidated += 1,
                Ok(Dispatch::Failed) => report.failed += 1,
                Err(err) => {
                    warn!(error = %err, "dispatch task failed");
                    report.failed += 1;
                },
            }
        }

        report.requeued += unsent.len();
        self.requeue(unsent);

        debug!(?report, "sender cycle complete");
        report
    }

    fn requeue(&self, records: Vec<NotificationRecord>) {
        if !records.is_empty() {
            self.buffer.extend(records);
        }
    }

    /// Run cycles every `notification_rate` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.notification_rate);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(rate = ?self.config.notification_rate, "sender started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            self.run_cycle().await;
        }
        info!("sender stopped");
    }
}

async fn handle_failure<S: Storage>(
    storage: &Arc<S>,
    provider: &'static str,
    target: NotifyTarget,
    err: &NotifyError,
) -> Dispatch {
    if err.token_valid() {
        warn!(provider, app = %target.app, error = %err, "delivery failed");
        return Dispatch::Failed;
    }

    info!(provider, app = %target.app, error = %err, "pruning invalid token");
    let token = target.token;
    if let Err(storage_err) = storage::blocking(storage, move |s| s.delete_token(&token)).await {
        warn!(provider, error = %storage_err, "failed to prune invalid token");
    }
    Dispatch::Invalidated
}
