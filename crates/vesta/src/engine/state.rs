//! Simulated device state.
//!
//! A `DeviceState` is the full snapshot of one home: rooms holding optional
//! devices, plus the climate block. It is only ever mutated through the
//! setters below, which clamp their inputs and report whether the addressed
//! device exists.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;

/// State of a dimmable light.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LightState {
    pub power: bool,

    /// Brightness in percent (0-100).
    pub brightness: u8,
}

/// State of a television.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TvState {
    pub power: bool,

    /// Volume in percent (0-100).
    pub volume: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockState {
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CoffeeStatus {
    #[default]
    Idle,
    Brewing,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoffeeMakerState {
    pub power: bool,
    pub status: CoffeeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WasherStatus {
    #[default]
    Idle,
    Washing,
    Spinning,
    Done,
}

/// State of a washing machine.
///
/// `finished` mirrors `status == Done`; both are only changed together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WasherState {
    pub power: bool,
    pub status: WasherStatus,
    pub finished: bool,
}

/// A room and whichever devices it holds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Room {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lights: Option<LightState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv: Option<TvState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_lock: Option<LockState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coffee_maker: Option<CoffeeMakerState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub washer: Option<WasherState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ThermostatMode {
    #[default]
    Auto,
    Heat,
    Cool,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermostatState {
    /// Target temperature in whole degrees Fahrenheit.
    pub temperature: i32,
    #[serde(default)]
    pub mode: ThermostatMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    /// Measured temperature, one decimal place.
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Climate {
    pub thermostat: ThermostatState,
    pub sensor: SensorState,
}

/// Outcome of starting an appliance cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStart {
    /// The appliance was idle (or finished) and a new cycle began.
    Started,
    /// A cycle was already running; nothing changed.
    AlreadyRunning,
    /// No such appliance in this home.
    NotFound,
}

/// Largest step the sensor moves toward the target in one render tick.
const DRIFT_MAX_STEP: f64 = 0.2;

/// Fraction of the remaining gap the sensor closes per render tick.
const DRIFT_RATE: f64 = 0.05;

/// Half-width of the uniform noise added to every drift step.
const DRIFT_JITTER: f64 = 0.05;

/// Full simulated snapshot of all devices in one home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub rooms: BTreeMap<String, Room>,
    pub climate: Climate,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::default_home(72)
    }
}

impl DeviceState {
    /// The stock three-room home with the thermostat (and sensor) at `target`.
    pub fn default_home(target: i32) -> Self {
        let mut rooms = BTreeMap::new();
        rooms.insert(
            "living".to_string(),
            Room {
                lights: Some(LightState {
                    power: false,
                    brightness: 80,
                }),
                tv: Some(TvState {
                    power: false,
                    volume: 12,
                }),
                ..Room::default()
            },
        );
        rooms.insert(
            "bedroom".to_string(),
            Room {
                lights: Some(LightState {
                    power: false,
                    brightness: 30,
                }),
                smart_lock: Some(LockState { locked: true }),
                ..Room::default()
            },
        );
        rooms.insert(
            "kitchen".to_string(),
            Room {
                lights: Some(LightState {
                    power: false,
                    brightness: 60,
                }),
                coffee_maker: Some(CoffeeMakerState::default()),
                washer: Some(WasherState::default()),
                ..Room::default()
            },
        );

        Self {
            rooms,
            climate: Climate {
                thermostat: ThermostatState {
                    temperature: target,
                    mode: ThermostatMode::Auto,
                },
                sensor: SensorState {
                    current: f64::from(target),
                },
            },
        }
    }

    pub fn lights(&self, room: &str) -> Option<&LightState> {
        self.rooms.get(room)?.lights.as_ref()
    }

    pub fn tv(&self, room: &str) -> Option<&TvState> {
        self.rooms.get(room)?.tv.as_ref()
    }

    pub fn smart_lock(&self, room: &str) -> Option<&LockState> {
        self.rooms.get(room)?.smart_lock.as_ref()
    }

    /// The home's coffee maker, wherever it is installed.
    pub fn coffee_maker(&self) -> Option<&CoffeeMakerState> {
        self.rooms.values().find_map(|r| r.coffee_maker.as_ref())
    }

    /// The home's washer, wherever it is installed.
    pub fn washer(&self) -> Option<&WasherState> {
        self.rooms.values().find_map(|r| r.washer.as_ref())
    }

    fn coffee_maker_mut(&mut self) -> Option<&mut CoffeeMakerState> {
        self.rooms.values_mut().find_map(|r| r.coffee_maker.as_mut())
    }

    fn washer_mut(&mut self) -> Option<&mut WasherState> {
        self.rooms.values_mut().find_map(|r| r.washer.as_mut())
    }

    /// Switch a room's lights on or off. Returns false if the room has no lights.
    pub fn set_light(&mut self, room: &str, on: bool) -> bool {
        let Some(lights) = self.rooms.get_mut(room).and_then(|r| r.lights.as_mut()) else {
            return false;
        };
        lights.power = on;
        true
    }

    /// Set a room's brightness, clamped to 0-100. Lights are on iff brightness > 0.
    pub fn set_brightness(&mut self, room: &str, percent: i64) -> bool {
        let Some(lights) = self.rooms.get_mut(room).and_then(|r| r.lights.as_mut()) else {
            return false;
        };
        lights.brightness = clamp_percent(percent);
        lights.power = lights.brightness > 0;
        true
    }

    /// Set the thermostat target. Fractional degrees are floored.
    pub fn set_thermostat(&mut self, degrees: f64) {
        self.climate.thermostat.temperature = degrees.floor() as i32;
    }

    pub fn lock_door(&mut self, room: &str, locked: bool) -> bool {
        let Some(lock) = self
            .rooms
            .get_mut(room)
            .and_then(|r| r.smart_lock.as_mut())
        else {
            return false;
        };
        lock.locked = locked;
        true
    }

    pub fn set_tv(&mut self, room: &str, on: bool) -> bool {
        let Some(tv) = self.rooms.get_mut(room).and_then(|r| r.tv.as_mut()) else {
            return false;
        };
        tv.power = on;
        true
    }

    /// Set a TV's volume, clamped to 0-100.
    pub fn set_tv_volume(&mut self, room: &str, volume: i64) -> bool {
        let Some(tv) = self.rooms.get_mut(room).and_then(|r| r.tv.as_mut()) else {
            return false;
        };
        tv.volume = clamp_percent(volume);
        true
    }

    /// Begin brewing. A maker that is already brewing is left untouched.
    pub fn start_brewing(&mut self) -> CycleStart {
        let Some(maker) = self.coffee_maker_mut() else {
            return CycleStart::NotFound;
        };
        if maker.status == CoffeeStatus::Brewing {
            return CycleStart::AlreadyRunning;
        }
        maker.power = true;
        maker.status = CoffeeStatus::Brewing;
        CycleStart::Started
    }

    /// Brewing has completed. Ignored unless the maker is still brewing.
    pub fn finish_brewing(&mut self) {
        if let Some(maker) = self.coffee_maker_mut() {
            if maker.status == CoffeeStatus::Brewing {
                maker.status = CoffeeStatus::Ready;
                maker.power = false;
            }
        }
    }

    pub fn stop_coffee(&mut self) -> bool {
        let Some(maker) = self.coffee_maker_mut() else {
            return false;
        };
        maker.power = false;
        maker.status = CoffeeStatus::Idle;
        true
    }

    /// Begin a wash cycle. A washer that is powered and not finished is left untouched.
    pub fn start_washer(&mut self) -> CycleStart {
        let Some(washer) = self.washer_mut() else {
            return CycleStart::NotFound;
        };
        if washer.power && !washer.finished {
            return CycleStart::AlreadyRunning;
        }
        washer.power = true;
        washer.status = WasherStatus::Washing;
        washer.finished = false;
        CycleStart::Started
    }

    pub fn washer_spin(&mut self) {
        if let Some(washer) = self.washer_mut() {
            if washer.status == WasherStatus::Washing {
                washer.status = WasherStatus::Spinning;
            }
        }
    }

    pub fn washer_done(&mut self) {
        if let Some(washer) = self.washer_mut() {
            if matches!(washer.status, WasherStatus::Washing | WasherStatus::Spinning) {
                washer.status = WasherStatus::Done;
                washer.finished = true;
                washer.power = false;
            }
        }
    }

    /// Force the washer back to idle from any phase.
    pub fn stop_washer(&mut self) -> bool {
        let Some(washer) = self.washer_mut() else {
            return false;
        };
        washer.power = false;
        washer.status = WasherStatus::Idle;
        washer.finished = false;
        true
    }

    /// Move the sensor reading one step toward the thermostat target.
    pub fn simulate_drift<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let target = f64::from(self.climate.thermostat.temperature);
        let current = self.climate.sensor.current;
        let delta = ((target - current) * DRIFT_RATE).clamp(-DRIFT_MAX_STEP, DRIFT_MAX_STEP);
        let jitter = rng.gen_range(-DRIFT_JITTER..DRIFT_JITTER);
        self.climate.sensor.current = ((current + delta + jitter) * 10.0).round() / 10.0;
    }
}

fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}
