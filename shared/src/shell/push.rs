use async_trait::async_trait;

use crate::capabilities::{PermissionState, PushError};

/// Platform notification permission dialog.
#[async_trait]
pub trait PushPermissions: Send + Sync {
    async fn request_authorization(&self) -> Result<PermissionState, PushError>;
}
