//! Server configuration.
//!
//! One TOML file, every section optional:
//!
//! ```toml
//! listen_addr = "0.0.0.0:11420"
//!
//! [storage]
//! path = "/var/lib/pushgate/pushgate.redb"
//!
//! [notifications]
//! rate_secs = 30
//! per_batch = 20
//! max_payload = 4096
//!
//! [directory]
//! permissioning_key_pem = """
//! -----BEGIN PUBLIC KEY-----
//! ...
//! -----END PUBLIC KEY-----
//! """
//! address_space_size = 16
//!
//! [gateways]
//! trusted = ["10.0.0.5"]
//!
//! [fcm]
//! endpoint = "https://fcm.googleapis.com/v1/projects/example/messages:send"
//! credential_path = "/etc/pushgate/fcm.token"
//! credential_refresh_secs = 3000
//! ```
//!
//! Absent `storage.path` keeps everything in memory.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use pushgate_core::{
    directory::DEFAULT_ADDRESS_SPACE_SIZE,
    sender::SenderConfig,
    service::ServiceConfig,
};
use pushgate_proto::csv::{MAX_LINE_LEN, NOTIFICATION_DATA_KEY};
use serde::Deserialize;

use crate::error::ConfigError;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:11420";

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the framed RPC listener binds to
    pub listen_addr: SocketAddr,
    /// Persistence
    pub storage: StorageConfig,
    /// Sender cadence and payload limits
    pub notifications: NotificationsConfig,
    /// Permissioning key and address space
    pub directory: DirectoryConfig,
    /// Peers allowed to push notification batches
    pub gateways: GatewaysConfig,
    /// Apple push
    pub apns: Option<ApnsConfig>,
    /// Firebase push
    pub fcm: Option<FcmConfig>,
    /// Huawei push
    pub huawei: Option<HuaweiConfig>,
    /// Log filter
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 11420)),
            storage: StorageConfig::default(),
            notifications: NotificationsConfig::default(),
            directory: DirectoryConfig::default(),
            gateways: GatewaysConfig::default(),
            apns: None,
            fcm: None,
            huawei: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// redb database file; in-memory storage when absent
    pub path: Option<PathBuf>,
}

/// `[notifications]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationsConfig {
    /// Seconds between sender cycles
    pub rate_secs: u64,
    /// Records per ephemeral id per cycle
    pub per_batch: usize,
    /// Provider payload budget in bytes
    pub max_payload: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        let sender = SenderConfig::default();
        Self {
            rate_secs: sender.notification_rate.as_secs(),
            per_batch: sender.max_notifications,
            max_payload: sender.max_payload_bytes,
        }
    }
}

/// `[directory]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Ed25519 public key of the permissioning service (SPKI PEM)
    pub permissioning_key_pem: String,
    /// Address-space size used until the network reports one through
    /// `NetworkState::update_address_space_size`
    pub address_space_size: u8,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            permissioning_key_pem: String::new(),
            address_space_size: DEFAULT_ADDRESS_SPACE_SIZE,
        }
    }
}

/// `[gateways]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaysConfig {
    /// Source addresses treated as authenticated gateways
    pub trusted: Vec<IpAddr>,
}

/// `[apns]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApnsConfig {
    /// App tag tokens are registered under
    #[serde(default = "ApnsConfig::default_app")]
    pub app: String,
    /// APNS base URL
    #[serde(default = "ApnsConfig::default_endpoint")]
    pub endpoint: String,
    /// PKCS#8 PEM file holding the ES256 signing key
    pub key_path: PathBuf,
    /// Key id (`kid`)
    pub key_id: String,
    /// Developer team id (`iss`)
    pub team_id: String,
    /// Bundle id sent as `apns-topic`
    pub topic: String,
    /// Visible alert title
    #[serde(default = "ApnsConfig::default_title")]
    pub title: String,
    /// Visible alert body
    #[serde(default = "ApnsConfig::default_body")]
    pub body: String,
}

impl ApnsConfig {
    fn default_app() -> String {
        "ios".to_owned()
    }

    fn default_endpoint() -> String {
        "https://api.push.apple.com".to_owned()
    }

    fn default_title() -> String {
        "New messages".to_owned()
    }

    fn default_body() -> String {
        "You have new messages".to_owned()
    }
}

/// `[fcm]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FcmConfig {
    /// App tag tokens are registered under
    #[serde(default = "FcmConfig::default_app")]
    pub app: String,
    /// Full `messages:send` URL
    pub endpoint: String,
    /// File holding the bearer credential
    pub credential_path: PathBuf,
    /// Seconds a loaded credential is used before the file is read again
    #[serde(default = "FcmConfig::default_credential_refresh_secs")]
    pub credential_refresh_secs: u64,
}

impl FcmConfig {
    fn default_app() -> String {
        "android".to_owned()
    }

    /// OAuth access tokens live an hour; reload well before that.
    fn default_credential_refresh_secs() -> u64 {
        50 * 60
    }
}

/// `[huawei]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HuaweiConfig {
    /// App tag tokens are registered under
    #[serde(default = "HuaweiConfig::default_app")]
    pub app: String,
}

impl HuaweiConfig {
    fn default_app() -> String {
        "huawei".to_owned()
    }
}

/// `[logging]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_owned() }
    }
}

impl ServerConfig {
    /// Read and validate a config file.
    ///
    /// # Errors
    ///
    /// - `Read` if the file cannot be read
    /// - `Parse` if it is not valid TOML for this struct
    /// - `Invalid` if a value is out of range
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml(&text)
    }

    /// Parse and validate config text.
    ///
    /// # Errors
    ///
    /// - `Parse` if `text` is not valid TOML for this struct
    /// - `Invalid` if a value is out of range
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let n = &self.notifications;
        if n.rate_secs == 0 {
            return Err(ConfigError::Invalid("notifications.rate_secs must be positive".into()));
        }
        if n.per_batch == 0 {
            return Err(ConfigError::Invalid("notifications.per_batch must be positive".into()));
        }
        let min_payload = NOTIFICATION_DATA_KEY.len() + MAX_LINE_LEN;
        if n.max_payload < min_payload {
            return Err(ConfigError::Invalid(format!(
                "notifications.max_payload must be at least {min_payload} bytes"
            )));
        }
        if self.directory.address_space_size == 0 || self.directory.address_space_size > 64 {
            return Err(ConfigError::Invalid(
                "directory.address_space_size must be in 1..=64".into(),
            ));
        }
        if let Some(fcm) = &self.fcm
            && fcm.credential_refresh_secs == 0
        {
            return Err(ConfigError::Invalid("fcm.credential_refresh_secs must be positive".into()));
        }
        Ok(())
    }

    /// Core service settings derived from this config.
    pub fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.sender = SenderConfig {
            notification_rate: Duration::from_secs(self.notifications.rate_secs),
            max_notifications: self.notifications.per_batch,
            max_payload_bytes: self.notifications.max_payload,
        };
        config
    }
}
