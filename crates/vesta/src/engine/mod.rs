#[allow(clippy::module_inception)]
mod engine;
mod executor;
mod intent;
mod profile;
pub mod resolver;
mod schedule;
pub mod state;

pub use engine::Engine;
pub use executor::Acknowledgment;
pub use executor::Effect;
pub use executor::SimulationTimings;
pub use executor::format_when;
pub use intent::Action;
pub use intent::Intent;
pub use profile::Profile;
pub use profile::ProfileDefaults;
pub use profile::ProfileError;
pub use schedule::Payload;
pub use schedule::ScheduledAction;
pub use schedule::Transition;
pub use state::DeviceState;
