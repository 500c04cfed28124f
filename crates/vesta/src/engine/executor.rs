//! Applies resolved intents to a profile's home.

use chrono::Duration;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use super::intent::Action;
use super::intent::Intent;
use super::profile::Profile;
use super::schedule::Payload;
use super::schedule::ScheduleQueue;
use super::schedule::Transition;
use super::state::CycleStart;

/// Room holding the door lock that voice commands address.
const LOCK_ROOM: &str = "bedroom";

/// Room holding the TV that voice commands address.
const TV_ROOM: &str = "living";

/// Simulated appliance latencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTimings {
    pub coffee_brew: Duration,
    pub washer_spin: Duration,
    pub washer_done: Duration,
}

impl Default for SimulationTimings {
    fn default() -> Self {
        Self {
            coffee_brew: Duration::seconds(4),
            washer_spin: Duration::seconds(4),
            washer_done: Duration::seconds(8),
        }
    }
}

/// Observable side effect of executing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum Effect {
    None,
    Mutated,
    Scheduled(u64),
}

/// Reply to a command: plain text suitable for speech, plus what changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgment {
    pub text: String,
    pub effect: Effect,
}

impl Acknowledgment {
    pub fn say(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            effect: Effect::None,
        }
    }

    pub fn mutated(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            effect: Effect::Mutated,
        }
    }

    fn scheduled(text: impl Into<String>, id: u64) -> Self {
        Self {
            text: text.into(),
            effect: Effect::Scheduled(id),
        }
    }
}

/// Everything a command may touch: one profile's home and the shared queue.
pub struct Session<'a> {
    pub profile: &'a mut Profile,
    pub schedule: &'a mut ScheduleQueue,
    pub timings: &'a SimulationTimings,
}

impl Session<'_> {
    fn defer(&mut self, fires_at: NaiveDateTime, payload: Payload) -> u64 {
        self.schedule
            .push(fires_at, payload, Some(self.profile.id.clone()))
    }
}

/// Human-friendly rendering of a scheduled time, safe for speech.
pub fn format_when(when: NaiveDateTime) -> String {
    when.format("%A %-d %B at %-I:%M %p").to_string()
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

/// Execute one intent against the session.
pub fn execute(intent: Intent, session: &mut Session<'_>, now: NaiveDateTime) -> Acknowledgment {
    let state = &mut session.profile.state;

    match intent {
        Intent::LightsPower { room, on } => {
            if state.set_light(&room, on) {
                Acknowledgment::mutated(format!(
                    "Okay, turning {} the {} lights.",
                    on_off(on),
                    room
                ))
            } else {
                Acknowledgment::say(format!("I couldn't find {} lights.", room))
            }
        }
        Intent::LightsLevel { room, percent } => {
            if state.set_brightness(&room, i64::from(percent)) {
                Acknowledgment::mutated(format!("Set {} lights to {}%.", room, percent))
            } else {
                Acknowledgment::say(format!("I couldn't set brightness in {}.", room))
            }
        }
        Intent::SetThermostat { temp } => {
            state.set_thermostat(f64::from(temp));
            Acknowledgment::mutated(format!(
                "Thermostat set to {} degrees.",
                state.climate.thermostat.temperature
            ))
        }
        Intent::QueryTemp => Acknowledgment::say(format!(
            "It's currently {}°F, target is {}°F.",
            state.climate.sensor.current, state.climate.thermostat.temperature
        )),
        Intent::Coffee => match state.start_brewing() {
            CycleStart::Started => {
                let ready_at = now + session.timings.coffee_brew;
                session.defer(ready_at, Payload::Transition(Transition::CoffeeReady));
                Acknowledgment::mutated("Starting the coffee maker.")
            }
            CycleStart::AlreadyRunning => {
                Acknowledgment::say("The coffee maker is already brewing.")
            }
            CycleStart::NotFound => Acknowledgment::say("I couldn't find a coffee maker."),
        },
        Intent::CoffeeStop => {
            if !state.stop_coffee() {
                return Acknowledgment::say("I couldn't find a coffee maker.");
            }
            let profile_id = session.profile.id.clone();
            session
                .schedule
                .cancel_transitions(&profile_id, &[Transition::CoffeeReady]);
            Acknowledgment::mutated("Stopping the coffee maker.")
        }
        Intent::WasherStart => match state.start_washer() {
            CycleStart::Started => {
                let spin_at = now + session.timings.washer_spin;
                let done_at = now + session.timings.washer_done;
                session.defer(spin_at, Payload::Transition(Transition::WasherSpin));
                session.defer(done_at, Payload::Transition(Transition::WasherDone));
                Acknowledgment::mutated("Starting the washing machine.")
            }
            CycleStart::AlreadyRunning => {
                Acknowledgment::say("The washing machine is already running.")
            }
            CycleStart::NotFound => Acknowledgment::say("I couldn't find a washing machine."),
        },
        Intent::WasherStop => {
            if !state.stop_washer() {
                return Acknowledgment::say("I couldn't find a washing machine.");
            }
            let profile_id = session.profile.id.clone();
            session.schedule.cancel_transitions(
                &profile_id,
                &[Transition::WasherSpin, Transition::WasherDone],
            );
            Acknowledgment::mutated("Stopping the washing machine.")
        }
        Intent::WasherStatus => match state.washer() {
            Some(washer) if washer.finished => Acknowledgment::say(format!(
                "Washer status: {}, it's finished.",
                washer.status
            )),
            Some(washer) => Acknowledgment::say(format!("Washer status: {}.", washer.status)),
            None => Acknowledgment::say("I couldn't find a washing machine."),
        },
        Intent::LockDoor { locked } => {
            if state.lock_door(LOCK_ROOM, locked) {
                let verb = if locked { "Locked" } else { "Unlocked" };
                Acknowledgment::mutated(format!("{} the {} door.", verb, LOCK_ROOM))
            } else {
                Acknowledgment::say(format!("I couldn't find the {} door lock.", LOCK_ROOM))
            }
        }
        Intent::TvPower { on } => {
            if state.set_tv(TV_ROOM, on) {
                Acknowledgment::mutated(format!("Turning {} the TV.", on_off(on)))
            } else {
                Acknowledgment::say("I couldn't find the TV.")
            }
        }
        Intent::TvVolume { volume } => {
            if state.set_tv_volume(TV_ROOM, volume) {
                Acknowledgment::mutated(format!("Setting TV volume to {}.", volume))
            } else {
                Acknowledgment::say("I couldn't set the TV volume.")
            }
        }
        Intent::ScheduleWake { time, action } => {
            let Some(when) = time else {
                return Acknowledgment::say("I couldn't understand the time for your wake-up.");
            };
            let id = session.defer(when, Payload::Action(action));
            info!(id, fires_at = %when, "wake-up scheduled");
            Acknowledgment::scheduled(format!("Wake-up scheduled for {}.", format_when(when)), id)
        }
        Intent::ScheduleGeneric { time, command } => {
            let (Some(when), Some(command)) = (time, command) else {
                return Acknowledgment::say("I couldn't parse the schedule details.");
            };
            let id = session.defer(when, Payload::Command(command));
            info!(id, fires_at = %when, "command scheduled");
            Acknowledgment::scheduled(format!("Okay, I'll run that at {}.", format_when(when)), id)
        }
        Intent::Unknown { .. } => Acknowledgment::say("Sorry, I'm not sure how to do that yet."),
    }
}

/// Ack for a fired `SetLights`/`Say` action.
pub(crate) fn run_action(action: &Action, profile: &mut Profile) -> Acknowledgment {
    match action {
        Action::SetLights { room, value } => {
            if profile.state.set_brightness(room, i64::from(*value)) {
                Acknowledgment::mutated(format!(
                    "Okay, set {} lights to {}% as scheduled.",
                    room, value
                ))
            } else {
                Acknowledgment::say(format!("I couldn't set brightness in {}.", room))
            }
        }
        Action::Say { text } if text.is_empty() => Acknowledgment::say("It's time."),
        Action::Say { text } => Acknowledgment::say(text.clone()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::engine::profile::ProfileDefaults;
    use crate::engine::state::CoffeeStatus;
    use crate::engine::state::WasherStatus;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 14)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn profile() -> Profile {
        let mut rng = StdRng::seed_from_u64(3);
        Profile::new("Alex", ProfileDefaults::default(), &mut rng)
    }

    fn run(intent: Intent, profile: &mut Profile, queue: &mut ScheduleQueue) -> Acknowledgment {
        let timings = SimulationTimings::default();
        let mut session = Session {
            profile,
            schedule: queue,
            timings: &timings,
        };
        execute(intent, &mut session, now())
    }

    #[test]
    fn test_missing_room_reports_without_mutating() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();
        let before = profile.state.clone();

        let ack = run(
            Intent::LightsPower {
                room: "garage".to_string(),
                on: true,
            },
            &mut profile,
            &mut queue,
        );

        assert_eq!(ack, Acknowledgment::say("I couldn't find garage lights."));
        assert_eq!(profile.state, before);
    }

    #[test]
    fn test_thermostat_and_query() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();

        let ack = run(Intent::SetThermostat { temp: 68 }, &mut profile, &mut queue);
        assert_eq!(ack.text, "Thermostat set to 68 degrees.");
        assert_eq!(ack.effect, Effect::Mutated);

        profile.state.climate.sensor.current = 71.5;
        let ack = run(Intent::QueryTemp, &mut profile, &mut queue);
        assert_eq!(ack.text, "It's currently 71.5°F, target is 68°F.");
        assert_eq!(ack.effect, Effect::None);
    }

    #[test]
    fn test_coffee_start_schedules_one_ready_transition() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();

        let ack = run(Intent::Coffee, &mut profile, &mut queue);
        assert_eq!(ack.text, "Starting the coffee maker.");
        assert_eq!(queue.entries().len(), 1);
        assert_eq!(queue.entries()[0].fires_at, now() + Duration::seconds(4));

        let ack = run(Intent::Coffee, &mut profile, &mut queue);
        assert_eq!(ack.effect, Effect::None);
        assert_eq!(queue.entries().len(), 1);
        assert_eq!(
            profile.state.coffee_maker().unwrap().status,
            CoffeeStatus::Brewing
        );
    }

    #[test]
    fn test_coffee_stop_cancels_ready_transition() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();

        run(Intent::Coffee, &mut profile, &mut queue);
        let ack = run(Intent::CoffeeStop, &mut profile, &mut queue);

        assert_eq!(ack.text, "Stopping the coffee maker.");
        assert!(queue.entries().is_empty());
        assert_eq!(
            profile.state.coffee_maker().unwrap().status,
            CoffeeStatus::Idle
        );
    }

    #[test]
    fn test_washer_stop_cancels_pending_phases() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();

        run(Intent::WasherStart, &mut profile, &mut queue);
        assert_eq!(queue.pending().count(), 2);

        let ack = run(Intent::WasherStop, &mut profile, &mut queue);
        assert_eq!(ack.text, "Stopping the washing machine.");
        assert_eq!(queue.pending().count(), 0);
        let washer = profile.state.washer().unwrap();
        assert_eq!(washer.status, WasherStatus::Idle);
        assert!(!washer.finished);
    }

    #[test]
    fn test_washer_status_reports_finished() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();

        let ack = run(Intent::WasherStatus, &mut profile, &mut queue);
        assert_eq!(ack.text, "Washer status: idle.");

        profile.state.start_washer();
        profile.state.washer_done();
        let ack = run(Intent::WasherStatus, &mut profile, &mut queue);
        assert_eq!(ack.text, "Washer status: done, it's finished.");
    }

    #[test]
    fn test_schedule_failures_are_reported() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();

        let ack = run(
            Intent::ScheduleWake {
                time: None,
                action: Action::Say {
                    text: "hi".to_string(),
                },
            },
            &mut profile,
            &mut queue,
        );
        assert_eq!(ack.text, "I couldn't understand the time for your wake-up.");

        let ack = run(
            Intent::ScheduleGeneric {
                time: Some(now()),
                command: None,
            },
            &mut profile,
            &mut queue,
        );
        assert_eq!(ack.text, "I couldn't parse the schedule details.");
        assert!(queue.entries().is_empty());
    }

    #[test]
    fn test_generic_schedule_records_command_for_profile() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();
        let when = now() + Duration::hours(13);

        let ack = run(
            Intent::ScheduleGeneric {
                time: Some(when),
                command: Some("start coffee".to_string()),
            },
            &mut profile,
            &mut queue,
        );

        assert_eq!(ack.text, "Okay, I'll run that at Wednesday 14 October at 9:00 PM.");
        let entry = &queue.entries()[0];
        assert_eq!(ack.effect, Effect::Scheduled(entry.id));
        assert_eq!(entry.payload, Payload::Command("start coffee".to_string()));
        assert_eq!(entry.profile_id.as_deref(), Some(profile.id.as_str()));
    }

    #[test]
    fn test_unknown_apologizes() {
        let mut profile = profile();
        let mut queue = ScheduleQueue::default();
        let ack = run(
            Intent::Unknown {
                raw: "sing".to_string(),
            },
            &mut profile,
            &mut queue,
        );
        assert_eq!(ack, Acknowledgment::say("Sorry, I'm not sure how to do that yet."));
    }
}
