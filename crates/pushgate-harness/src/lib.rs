//! Deterministic test harness for pushgate.
//!
//! Fakes for every edge of the core so tests can drive the whole pipeline
//! without sockets, disks or real push providers:
//!
//! - [`SimEnv`]: wall clock pinned to a start time and driven by tokio's
//!   (pausable) clock
//! - [`RecordingProvider`]: records payloads and answers from a script
//! - [`FlakyStorage`]: in-memory storage with switchable failures
//! - [`TestPermissioning`] / [`TestUser`]: seeded keys that sign requests
//!   exactly like real clients
//! - [`TestWorld`]: all of the above wired into a `NotificationService`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod flaky_storage;
pub mod identity;
pub mod providers;
pub mod sim_env;
pub mod world;

pub use flaky_storage::FlakyStorage;
pub use identity::{TestPermissioning, TestUser};
pub use providers::{Delivery, RecordingProvider};
pub use sim_env::SimEnv;
pub use world::{TestWorld, notification};
