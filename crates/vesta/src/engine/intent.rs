//! Typed commands produced by the resolver.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;

/// Greeting spoken by a wake-up that carries no other action.
pub const WAKE_GREETING: &str = "Good morning! Time to rise and shine.";

/// A structured action attached to a scheduled entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    SetLights { room: String, value: u8 },
    Say { text: String },
}

/// A recognized user command.
///
/// Fields that the resolver could not extract are `None`; the executor
/// reports those instead of acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    LightsPower {
        room: String,
        on: bool,
    },
    LightsLevel {
        room: String,
        percent: u8,
    },
    SetThermostat {
        temp: i32,
    },
    QueryTemp,
    Coffee,
    CoffeeStop,
    WasherStart,
    WasherStop,
    WasherStatus,
    LockDoor {
        locked: bool,
    },
    TvPower {
        on: bool,
    },
    TvVolume {
        volume: i64,
    },
    ScheduleWake {
        time: Option<NaiveDateTime>,
        action: Action,
    },
    ScheduleGeneric {
        time: Option<NaiveDateTime>,
        command: Option<String>,
    },
    Unknown {
        raw: String,
    },
}

impl Intent {
    /// Short kind name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::LightsPower { .. } => "lightsPower",
            Intent::LightsLevel { .. } => "lightsLevel",
            Intent::SetThermostat { .. } => "setThermostat",
            Intent::QueryTemp => "queryTemp",
            Intent::Coffee => "coffee",
            Intent::CoffeeStop => "coffeeStop",
            Intent::WasherStart => "washerStart",
            Intent::WasherStop => "washerStop",
            Intent::WasherStatus => "washerStatus",
            Intent::LockDoor { .. } => "lockDoor",
            Intent::TvPower { .. } => "tvPower",
            Intent::TvVolume { .. } => "tvVolume",
            Intent::ScheduleWake { .. } => "scheduleWake",
            Intent::ScheduleGeneric { .. } => "scheduleGeneric",
            Intent::Unknown { .. } => "unknown",
        }
    }
}
