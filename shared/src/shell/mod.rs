//! Native host side: the adapters that answer the core's capability requests
//! and the tokio runtime that drives the core.

pub mod attribution;
pub mod connectivity;
pub mod http;
pub mod push;
pub mod runtime;
pub mod store;

use std::sync::Arc;

pub use self::attribution::{AttributionError, AttributionSource};
pub use self::connectivity::{ConnectivityMonitor, ManualConnectivity};
pub use self::http::{ConfigService, OrganicValidator};
#[cfg(feature = "http")]
pub use self::http::{HttpConfigService, HttpOrganicValidator};
pub use self::push::PushPermissions;
pub use self::runtime::{LaunchHandle, LaunchRuntime, RuntimeClosed};
#[cfg(not(target_arch = "wasm32"))]
pub use self::store::SqliteKv;
pub use self::store::{resolve_kv, KeyValueStore, MemoryKv};

/// Everything outside the core that the runtime talks to.
#[derive(Clone)]
pub struct HostServices {
    pub store: Arc<dyn KeyValueStore>,
    pub attribution: Arc<dyn AttributionSource>,
    pub organic: Arc<dyn OrganicValidator>,
    pub remote_config: Arc<dyn ConfigService>,
    pub push: Arc<dyn PushPermissions>,
    pub connectivity: Arc<dyn ConnectivityMonitor>,
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
