//! Service wiring.
//!
//! [`NotificationService`] owns one instance of every component and shares
//! the buffer, dedup map, storage and directory between them. Nothing is
//! global, so tests can run several services side by side.

use std::{sync::Arc, time::Duration};

use pushgate_proto::{Request, Response};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    buffer::NotificationBuffer,
    dedup::{self, CLEAN_INTERVAL, DEDUP_TTL, RoundDedup},
    directory::Directory,
    env::Environment,
    intake::{AuthContext, Intake, IntakeOutcome},
    provider::ProviderRegistry,
    registration::{Registrar, RegistrarConfig},
    scheduler::{EphemeralScheduler, SchedulerConfig},
    sender::{Sender, SenderConfig},
    storage::Storage,
    time::TimeModel,
};

/// Everything tunable about the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Epoch schedule
    pub time: TimeModel,
    /// Sender cadence and payload limits
    pub sender: SenderConfig,
    /// Ephemeral creation and retention
    pub scheduler: SchedulerConfig,
    /// Registration replay window and legacy defaults
    pub registrar: RegistrarConfig,
    /// How long round ids are remembered
    pub dedup_ttl: Duration,
    /// How often the dedup map is swept
    pub clean_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let time = TimeModel::default();
        let scheduler = SchedulerConfig::for_model(&time);
        Self {
            time,
            sender: SenderConfig::default(),
            registrar: RegistrarConfig {
                creation_lead: scheduler.creation_lead,
                ..RegistrarConfig::default()
            },
            scheduler,
            dedup_ttl: DEDUP_TTL,
            clean_interval: CLEAN_INTERVAL,
        }
    }
}

/// The assembled notification service.
pub struct NotificationService<E, S, D> {
    env: E,
    buffer: Arc<NotificationBuffer>,
    dedup: Arc<RoundDedup>,
    intake: Intake<E>,
    registrar: Registrar<E, S, D>,
    sender: Arc<Sender<S>>,
    scheduler: Arc<EphemeralScheduler<E, S, D>>,
    clean_interval: Duration,
}

impl<E, S, D> NotificationService<E, S, D>
where
    E: Environment,
    S: Storage,
    D: Directory,
{
    /// Assemble a service.
    pub fn new(
        env: E,
        storage: Arc<S>,
        directory: Arc<D>,
        providers: ProviderRegistry,
        config: ServiceConfig,
    ) -> Self {
        let buffer = Arc::new(NotificationBuffer::new(config.sender.max_notifications));
        let dedup = Arc::new(RoundDedup::new(config.dedup_ttl));

        let intake = Intake::new(env.clone(), Arc::clone(&dedup), Arc::clone(&buffer));
        let registrar = Registrar::new(
            env.clone(),
            Arc::clone(&storage),
            Arc::clone(&directory),
            config.time,
            config.registrar,
        );
        let sender = Arc::new(Sender::new(
            Arc::clone(&buffer),
            Arc::clone(&storage),
            providers,
            config.sender,
        ));
        let scheduler = Arc::new(EphemeralScheduler::new(
            env.clone(),
            storage,
            directory,
            config.time,
            config.scheduler,
        ));

        Self {
            env,
            buffer,
            dedup,
            intake,
            registrar,
            sender,
            scheduler,
            clean_interval: config.clean_interval,
        }
    }

    /// Notification buffer shared by intake and sender.
    pub fn buffer(&self) -> &Arc<NotificationBuffer> {
        &self.buffer
    }

    /// Round dedup map.
    pub fn dedup(&self) -> &Arc<RoundDedup> {
        &self.dedup
    }

    /// Gateway intake.
    pub fn intake(&self) -> &Intake<E> {
        &self.intake
    }

    /// Registration handler.
    pub fn registrar(&self) -> &Registrar<E, S, D> {
        &self.registrar
    }

    /// Sender, for running cycles by hand.
    pub fn sender(&self) -> &Sender<S> {
        &self.sender
    }

    /// Ephemeral scheduler.
    pub fn scheduler(&self) -> &EphemeralScheduler<E, S, D> {
        &self.scheduler
    }

    /// Handle one RPC.
    pub fn handle(&self, request: Request, auth: &AuthContext) -> Response {
        let op = request.name();
        let result = match request {
            Request::NotificationBatch(batch) => {
                match self.intake.receive_notification_batch(batch, auth) {
                    Ok(IntakeOutcome::Accepted { records }) => {
                        debug!(records, "accepted batch");
                        Ok(())
                    },
                    Ok(IntakeOutcome::Duplicate) => Ok(()),
                    Err(err) => Err(err.to_string()),
                }
            },
            Request::RegisterForNotifications(req) => {
                self.registrar.register_for_notifications(&req).map_err(|e| e.to_string())
            },
            Request::UnregisterForNotifications(req) => {
                self.registrar.unregister_for_notifications(&req).map_err(|e| e.to_string())
            },
            Request::RegisterToken(req) => {
                self.registrar.register_token(&req).map_err(|e| e.to_string())
            },
            Request::RegisterTrackedId(req) => {
                self.registrar.register_tracked_id(&req).map_err(|e| e.to_string())
            },
            Request::UnregisterToken(req) => {
                self.registrar.unregister_token(&req).map_err(|e| e.to_string())
            },
            Request::UnregisterTrackedId(req) => {
                self.registrar.unregister_tracked_id(&req).map_err(|e| e.to_string())
            },
        };

        match result {
            Ok(()) => Response::Ok,
            Err(message) => {
                warn!(op, %message, "request rejected");
                Response::Error { message }
            },
        }
    }

    /// Spawn the background loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> ServiceHandle {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(4);

        let scheduler = Arc::clone(&self.scheduler);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { scheduler.run_creation(token).await }));

        let scheduler = Arc::clone(&self.scheduler);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { scheduler.run_deletion(token).await }));

        tasks.push(tokio::spawn(dedup::run_cleaner(
            Arc::clone(&self.dedup),
            self.env.clone(),
            self.clean_interval,
            cancel.clone(),
        )));

        let sender = Arc::clone(&self.sender);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { sender.run(token).await }));

        info!("notification service started");
        ServiceHandle { cancel, tasks }
    }
}

/// Running background loops.
#[derive(Debug)]
pub struct ServiceHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Token the loops watch; cancelling it has the same effect as
    /// [`stop`](Self::stop) without waiting.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every loop and wait for them to exit.
    ///
    /// Each loop checks cancellation at every suspension point, so this
    /// returns within one tick of the slowest loop's in-progress work.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!("notification service stopped");
    }
}
