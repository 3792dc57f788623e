//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the live
//! session, audio, chat path and relay, `AppPaths` for the platform config
//! directory, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, ChatConfig, LiveConfig, Modality, RelayConfig, API_KEY_ENV,
};
