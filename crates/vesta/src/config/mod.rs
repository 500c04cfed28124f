#[allow(clippy::module_inception)]
mod config;
mod diagnostics;
mod partial;

pub use config::*;
pub use diagnostics::Diagnostic;
pub use diagnostics::LoadError;
pub use diagnostics::format_diagnostics;
