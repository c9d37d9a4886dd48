//! Huawei Push Kit.

use async_trait::async_trait;
use pushgate_core::{
    provider::{NotifyError, Provider},
    storage::NotifyTarget,
};

/// Accepts Huawei tokens at registration but cannot deliver to them yet.
///
/// Every call fails transiently so the token survives until a real client
/// lands.
#[derive(Debug, Default)]
pub struct HuaweiProvider;

#[async_trait]
impl Provider for HuaweiProvider {
    fn name(&self) -> &'static str {
        "huawei"
    }

    async fn notify(&self, _payload: &str, _target: &NotifyTarget) -> Result<(), NotifyError> {
        Err(NotifyError::Transient("huawei delivery is not implemented".into()))
    }
}
