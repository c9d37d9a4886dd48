//! A fully wired service with fakes at every edge.

use std::sync::Arc;

use pushgate_core::{
    directory::{DEFAULT_ADDRESS_SPACE_SIZE, Directory, NetworkState},
    env::Environment,
    intake::AuthContext,
    provider::ProviderRegistry,
    service::{NotificationService, ServiceConfig},
};
use pushgate_proto::{NotificationBatch, NotificationData, Request, Response};

use crate::{
    flaky_storage::FlakyStorage,
    identity::{TestPermissioning, TestUser},
    providers::RecordingProvider,
    sim_env::SimEnv,
};

/// Directory type used by [`TestWorld`].
pub type TestDirectory = NetworkState<FlakyStorage>;

/// Service type used by [`TestWorld`].
pub type TestService = NotificationService<SimEnv, FlakyStorage, TestDirectory>;

/// Service plus handles to everything it talks to.
///
/// Tokens registered under `"android"` and `"ios"` reach the recording
/// providers of the same name.
pub struct TestWorld {
    /// Shared clock
    pub env: SimEnv,
    /// Backing store
    pub storage: Arc<FlakyStorage>,
    /// Directory state
    pub directory: Arc<TestDirectory>,
    /// Permissioning service stand-in
    pub permissioning: TestPermissioning,
    /// Provider for `"android"` tokens
    pub android: RecordingProvider,
    /// Provider for `"ios"` tokens
    pub ios: RecordingProvider,
    /// The service under test
    pub service: TestService,
    config: ServiceConfig,
}

impl TestWorld {
    /// World with default configuration.
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    /// World with `config`.
    #[allow(clippy::expect_used)]
    pub fn with_config(config: ServiceConfig) -> Self {
        let env = SimEnv::default();
        let storage = Arc::new(FlakyStorage::new());
        let permissioning = TestPermissioning::from_seed(0);
        let directory = Arc::new(
            NetworkState::restore(
                permissioning.verifying_key(),
                DEFAULT_ADDRESS_SPACE_SIZE,
                Arc::clone(&storage),
            )
            .expect("memory storage does not fail"),
        );

        let android = RecordingProvider::new();
        let ios = RecordingProvider::new();
        let providers = ProviderRegistry::new()
            .with("android", android.as_provider())
            .with("ios", ios.as_provider());

        let service = NotificationService::new(
            env.clone(),
            Arc::clone(&storage),
            Arc::clone(&directory),
            providers,
            config.clone(),
        );

        Self { env, storage, directory, permissioning, android, ios, service, config }
    }

    /// Configuration the service was built with.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Deterministic user enrolled with this world's permissioning key.
    pub fn user(&self, seed: u64) -> TestUser {
        TestUser::new(seed, &self.permissioning)
    }

    /// Ephemeral id `intermediary_id` is reachable under right now.
    pub fn current_ephemeral(&self, intermediary_id: &[u8]) -> i64 {
        let (id, _) = self.config.time.current_ephemeral(
            intermediary_id,
            self.env.unix_time(),
            self.directory.address_space_size(),
        );
        id
    }

    /// Send `request` as an anonymous client.
    pub fn client_call(&self, request: Request) -> Response {
        self.service.handle(request, &AuthContext::client())
    }

    /// Push a batch as an authenticated gateway.
    pub fn gateway_push(&self, round_id: u64, notifications: Vec<NotificationData>) -> Response {
        self.service.handle(
            Request::NotificationBatch(NotificationBatch { round_id, notifications }),
            &AuthContext::gateway(),
        )
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// A notification item for `ephemeral_id` with recognizable contents.
pub fn notification(ephemeral_id: i64, tag: u8) -> NotificationData {
    NotificationData {
        ephemeral_id,
        identity_fingerprint: vec![tag; 25],
        message_hash: vec![tag.wrapping_add(1); 32],
    }
}
