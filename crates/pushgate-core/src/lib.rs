//! Pushgate core.
//!
//! Everything between the wire and the push providers: intake of gateway
//! batches, buffering, periodic dispatch, the rotating ephemeral registry,
//! and the registration protocol that populates it. I/O at the edges
//! (storage backends, provider HTTP clients, the listener) lives in
//! `pushgate-server`; here it is reached through traits so the same logic
//! runs against in-memory fakes in tests.
//!
//! # Pipeline
//!
//! ```text
//!  gateway ─► Intake ─► RoundDedup
//!               │
//!               ▼
//!       NotificationBuffer ─► Sender ─► Storage::get_to_notify ─► Provider
//!
//!  client ─► Registrar ─► Storage ◄─ EphemeralScheduler
//! ```
//!
//! # Components
//!
//! - [`mod@env`]: clock abstraction
//! - [`time`]: epochs, rotation phases and ephemeral ids
//! - [`storage`]: storage contract and in-memory store
//! - [`dedup`]: round deduplication
//! - [`buffer`]: double-buffered notification accumulator
//! - [`intake`]: gateway batch intake
//! - [`provider`]: push provider trait and registry
//! - [`sender`]: drain, pack and dispatch
//! - [`scheduler`]: ephemeral creation and expiry loops
//! - [`registration`]: signature-verified registration RPCs
//! - [`directory`]: permissioning key and address-space size
//! - [`service`]: wiring and lifecycle
//! - [`error`]: error types

pub mod buffer;
pub mod dedup;
pub mod directory;
pub mod env;
pub mod error;
pub mod intake;
pub mod provider;
pub mod registration;
pub mod scheduler;
pub mod sender;
pub mod service;
pub mod storage;
pub mod time;

pub use buffer::{NotificationBuffer, NotificationRecord};
pub use dedup::RoundDedup;
pub use directory::{Directory, NetworkState};
pub use env::{Environment, SystemEnv};
pub use error::{IntakeError, RegistrationError, StorageError};
pub use intake::{AuthContext, Intake, IntakeOutcome};
pub use provider::{NotifyError, Provider, ProviderRegistry};
pub use registration::Registrar;
pub use scheduler::{EphemeralScheduler, SchedulerConfig};
pub use sender::{CycleReport, Sender, SenderConfig};
pub use service::{NotificationService, ServiceConfig, ServiceHandle};
pub use storage::{MemoryStorage, Storage};
pub use time::TimeModel;
