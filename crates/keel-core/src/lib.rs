pub mod clock;
pub mod config;
pub mod duration;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    BreakerConfigFile, BreakerDefaults, CheckpointConfig, ConfigError, KeelConfig,
    RetentionConfig, ServerConfig,
};
pub use duration::{format_duration, parse_duration};
