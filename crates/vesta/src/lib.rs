pub mod api;
pub mod config;
pub mod engine;
pub mod runtime;
pub mod store;

pub use config::Config;
pub use config::Diagnostic;
pub use config::LogLevel;
pub use config::format_diagnostics;
pub use engine::Acknowledgment;
pub use engine::DeviceState;
pub use engine::Effect;
pub use engine::Engine;
pub use engine::Intent;
