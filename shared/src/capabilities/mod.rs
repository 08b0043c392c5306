mod http;
pub mod kv;
mod push;
mod timer;

pub use self::http::{
    HttpError, InstallValidation, InstallValidationOperation, RemoteConfig, RemoteConfigOperation,
};
pub use self::kv::{KeyNamespace, KvError, KvKey, LaunchKey};
pub use self::push::{PermissionState, Push, PushError, PushOperation, PushResult};
pub use self::timer::{Timer, TimerId, TimerOperation, TimerOutput, Timers};

pub use crux_core::render::Render;
pub use crux_kv::KeyValue;

use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub key_value: KeyValue<Event>,
    pub push: Push<Event>,
    pub remote_config: RemoteConfig<Event>,
    pub install_validation: InstallValidation<Event>,
    pub timers: Timers<Event>,
}
