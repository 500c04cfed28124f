use chrono::NaiveDateTime;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::executor;
use super::executor::Acknowledgment;
use super::executor::Effect;
use super::executor::Session;
use super::executor::SimulationTimings;
use super::profile::Profile;
use super::profile::ProfileDefaults;
use super::profile::ProfileError;
use super::profile::ProfileStore;
use super::resolver;
use super::resolver::ResolveContext;
use super::schedule::Payload;
use super::schedule::ScheduleQueue;
use super::schedule::ScheduledAction;
use super::schedule::Transition;
use super::state::DeviceState;
use crate::store;
use crate::store::SnapshotStore;
use crate::store::StoreError;

/// vesta engine
///
/// The session object every command runs against: the profiles (and which
/// one is active), the schedule queue shared by all profiles, and the store
/// they are persisted to. All mutation goes through `&mut self`; callers that
/// share an engine between tasks serialize access themselves.
pub struct Engine {
    profiles: ProfileStore,
    schedule: ScheduleQueue,
    store: Box<dyn SnapshotStore>,

    /// Defaults for profiles created after startup.
    defaults: ProfileDefaults,
    timings: SimulationTimings,

    /// Source of profile ids and sensor jitter.
    rng: StdRng,
}

impl Engine {
    /// Load an engine from `store`, seeding fresh profiles if none are stored.
    pub fn new(
        store: Box<dyn SnapshotStore>,
        defaults: ProfileDefaults,
        timings: SimulationTimings,
    ) -> Self {
        Self::with_rng(store, defaults, timings, StdRng::from_entropy())
    }

    pub fn with_rng(
        store: Box<dyn SnapshotStore>,
        defaults: ProfileDefaults,
        timings: SimulationTimings,
        mut rng: StdRng,
    ) -> Self {
        let stored: Vec<Profile> = load_or_warn(store.as_ref(), store::PROFILES_KEY);
        let entries = load_entries(store.as_ref());
        let active: Option<String> = load_or_warn(store.as_ref(), store::ACTIVE_PROFILE_KEY);

        let (mut profiles, seeded) = ProfileStore::load_or_seed(stored, &defaults, &mut rng);
        if let Some(id) = active {
            if let Err(e) = profiles.set_active(&id) {
                warn!("Stored active profile is gone: {}", e);
            }
        }

        let mut engine = Self {
            profiles,
            schedule: ScheduleQueue::from_entries(entries),
            store,
            defaults,
            timings,
            rng,
        };

        info!(
            profiles = engine.profiles.profiles().len(),
            pending = engine.schedule.pending().count(),
            active = %engine.profiles.active().name,
            "engine loaded"
        );
        if seeded {
            info!("No stored profiles, created defaults");
            engine.persist_or_warn();
        }
        engine
    }

    /// Resolve and execute one command against the active profile.
    pub fn handle_command(&mut self, text: &str, now: NaiveDateTime) -> Acknowledgment {
        let profile = self.profiles.active_mut();
        let intent = {
            let ctx = ResolveContext {
                default_room: &profile.defaults.room,
                now,
            };
            resolver::resolve(text, &ctx)
        };
        info!(kind = intent.kind(), profile = %profile.name, "handling command");

        let mut session = Session {
            profile,
            schedule: &mut self.schedule,
            timings: &self.timings,
        };
        let ack = executor::execute(intent, &mut session, now);
        debug!(text = %ack.text, effect = ?ack.effect, "command acknowledged");

        if matches!(ack.effect, Effect::Scheduled(_)) {
            self.persist_or_warn();
        }
        self.refresh();
        ack
    }

    /// Fire everything due at `now`, once each, and return what they said.
    ///
    /// Entries enqueued while firing (a scheduled command that schedules
    /// again) wait for the next tick.
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<Acknowledgment> {
        let due = self.schedule.take_due(now);
        let mut acks = Vec::new();
        for entry in &due {
            if let Some(ack) = self.fire(entry, now) {
                acks.push(ack);
            }
        }
        if due.iter().any(|e| !e.is_transition()) {
            self.persist_or_warn();
        }
        self.refresh();
        acks
    }

    fn fire(&mut self, entry: &ScheduledAction, now: NaiveDateTime) -> Option<Acknowledgment> {
        let Some(profile) = self.profiles.owner_mut(entry.profile_id.as_deref()) else {
            warn!(id = entry.id, "Scheduled entry belongs to a deleted profile, skipping");
            return None;
        };
        debug!(id = entry.id, what = %entry.describe(), "firing scheduled entry");

        match &entry.payload {
            Payload::Action(action) => Some(executor::run_action(action, profile)),
            Payload::Command(text) if !text.trim().is_empty() => {
                let intent = resolver::resolve(
                    text,
                    &ResolveContext {
                        default_room: &profile.defaults.room,
                        now,
                    },
                );
                let mut session = Session {
                    profile,
                    schedule: &mut self.schedule,
                    timings: &self.timings,
                };
                Some(executor::execute(intent, &mut session, now))
            }
            Payload::Transition(transition) => {
                match transition {
                    Transition::CoffeeReady => profile.state.finish_brewing(),
                    Transition::WasherSpin => profile.state.washer_spin(),
                    Transition::WasherDone => profile.state.washer_done(),
                }
                None
            }
            Payload::Command(_) | Payload::Empty => {
                Some(Acknowledgment::say("Scheduled item triggered."))
            }
        }
    }

    /// Advance ambient simulation by one step.
    fn refresh(&mut self) {
        self.profiles
            .active_mut()
            .state
            .simulate_drift(&mut self.rng);
    }

    /// Device state of the active profile.
    pub fn state(&self) -> &DeviceState {
        &self.profiles.active().state
    }

    pub fn schedules(&self) -> &[ScheduledAction] {
        self.schedule.entries()
    }

    /// Entries a user scheduled; appliance transitions are left out.
    pub fn user_schedules(&self) -> impl Iterator<Item = &ScheduledAction> {
        self.schedule.entries().iter().filter(|e| !e.is_transition())
    }

    /// Delete a user entry. Appliance transitions are only cancelled by
    /// stopping the appliance.
    pub fn remove_schedule(&mut self, id: u64) -> Option<ScheduledAction> {
        if self.user_schedules().all(|e| e.id != id) {
            return None;
        }
        let removed = self.schedule.remove(id)?;
        info!(id, "schedule entry removed");
        self.persist_or_warn();
        Some(removed)
    }

    pub fn profiles(&self) -> &[Profile] {
        self.profiles.profiles()
    }

    pub fn active_profile(&self) -> &Profile {
        self.profiles.active()
    }

    pub fn set_active_profile(&mut self, id: &str) -> Result<&Profile, ProfileError> {
        self.profiles.set_active(id)?;
        info!(profile = %self.profiles.active().name, "switched profile");
        self.persist_or_warn();
        Ok(self.profiles.active())
    }

    /// Create a profile with a fresh default home and make it active.
    pub fn add_profile(&mut self, name: &str) -> &Profile {
        let profile = Profile::new(name, self.defaults.clone(), &mut self.rng);
        info!(id = %profile.id, name, "profile created");
        self.profiles.add(profile);
        self.persist_or_warn();
        self.profiles.active()
    }

    /// Delete a profile along with everything it had scheduled.
    pub fn delete_profile(&mut self, id: &str) -> Result<Profile, ProfileError> {
        let removed = self.profiles.delete(id)?;
        let dropped = self.schedule.remove_for_profile(id);
        info!(id, dropped, "profile deleted");
        self.persist_or_warn();
        Ok(removed)
    }

    pub fn set_language(&mut self, id: &str, language: &str) -> Result<&Profile, ProfileError> {
        let profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        profile.defaults.language = language.to_string();
        info!(id, language, "profile language changed");
        self.persist_or_warn();
        self.profiles
            .get(id)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))
    }

    /// Write profiles, the active profile and the schedule to the store.
    pub fn persist(&self) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        store::save(store, store::PROFILES_KEY, self.profiles.profiles())?;
        store::save(store, store::ACTIVE_PROFILE_KEY, &self.profiles.active().id)?;
        store::save(store, store::SCHEDULES_KEY, self.schedule.entries())?;
        Ok(())
    }

    fn persist_or_warn(&self) {
        if let Err(e) = self.persist() {
            warn!("Failed to persist snapshot: {}", e);
        }
    }
}

fn load_or_warn<T>(store: &dyn SnapshotStore, key: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    store::load(store, key).unwrap_or_else(|e| {
        warn!("Discarding unreadable snapshot: {}", e);
        T::default()
    })
}

/// Decode the stored schedule entry by entry, so one bad entry does not
/// take the rest with it.
fn load_entries(store: &dyn SnapshotStore) -> Vec<ScheduledAction> {
    let raw: Vec<serde_json::Value> = load_or_warn(store, store::SCHEDULES_KEY);
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Dropping unreadable schedule entry: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use chrono::NaiveDate;

    use super::*;
    use crate::engine::state::CoffeeStatus;
    use crate::engine::state::WasherStatus;
    use crate::store::MemoryStore;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 14)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn engine_on(store: &MemoryStore) -> Engine {
        Engine::with_rng(
            Box::new(store.clone()),
            ProfileDefaults::default(),
            SimulationTimings::default(),
            StdRng::seed_from_u64(11),
        )
    }

    fn engine() -> Engine {
        engine_on(&MemoryStore::new())
    }

    #[test]
    fn test_fresh_store_seeds_and_persists_profiles() {
        let store = MemoryStore::new();
        let engine = engine_on(&store);

        assert_eq!(engine.profiles().len(), 2);
        let saved: Vec<Profile> = store::load(&store, store::PROFILES_KEY).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].name, "Alex");
    }

    #[test]
    fn test_corrupt_snapshot_falls_back_to_defaults() {
        let store = MemoryStore::new();
        store.write(store::PROFILES_KEY, "[{").unwrap();
        store.write(store::SCHEDULES_KEY, "nope").unwrap();

        let engine = engine_on(&store);

        assert_eq!(engine.profiles().len(), 2);
        assert!(engine.schedules().is_empty());
    }

    #[test]
    fn test_wake_scenario_fires_once_at_seven() {
        let mut engine = engine();

        let ack = engine.handle_command(
            "wake me up at 7am and turn on the kitchen lights to 50%",
            t0(),
        );
        let Effect::Scheduled(id) = ack.effect else {
            panic!("expected a scheduled entry, got {:?}", ack.effect);
        };
        let entry = &engine.schedules()[0];
        assert_eq!(entry.id, id);
        assert_eq!(entry.fires_at, t0() + Duration::hours(23));

        assert!(engine.tick(t0() + Duration::hours(22)).is_empty());

        let seven = t0() + Duration::hours(23);
        let acks = engine.tick(seven);
        assert_eq!(
            acks,
            vec![Acknowledgment::mutated(
                "Okay, set kitchen lights to 50% as scheduled."
            )]
        );
        let lights = engine.state().lights("kitchen").unwrap();
        assert_eq!(lights.brightness, 50);
        assert!(lights.power);

        assert!(engine.tick(seven + Duration::seconds(1)).is_empty());
        assert!(engine.schedules()[0].done);
    }

    #[test]
    fn test_washer_status_reports_finished_after_cycle() {
        let mut engine = engine();

        engine.handle_command("start the washing machine", t0());
        engine.tick(t0() + Duration::seconds(4));
        assert_eq!(
            engine.state().washer().unwrap().status,
            WasherStatus::Spinning
        );
        engine.tick(t0() + Duration::seconds(8));

        let ack = engine.handle_command("is the washer done", t0() + Duration::seconds(9));
        assert!(ack.text.contains("it's finished"), "{}", ack.text);
        assert!(engine.schedules().is_empty());
    }

    #[test]
    fn test_washer_stop_cancels_cycle() {
        let mut engine = engine();

        engine.handle_command("start the washer", t0());
        engine.handle_command("stop the washer", t0() + Duration::seconds(1));
        engine.tick(t0() + Duration::seconds(10));

        let washer = engine.state().washer().unwrap();
        assert_eq!(washer.status, WasherStatus::Idle);
        assert!(!washer.finished);
    }

    #[test]
    fn test_double_coffee_start_brews_once() {
        let mut engine = engine();

        engine.handle_command("start coffee", t0());
        engine.handle_command("start the coffee maker", t0() + Duration::seconds(1));
        assert_eq!(engine.schedules().len(), 1);

        engine.tick(t0() + Duration::seconds(4));
        assert_eq!(
            engine.state().coffee_maker().unwrap().status,
            CoffeeStatus::Ready
        );
    }

    #[test]
    fn test_scheduled_command_runs_against_its_profile() {
        let mut engine = engine();
        let alex = engine.active_profile().id.clone();

        engine.handle_command("at 9am, turn on the kitchen lights", t0());
        let sam = engine.profiles()[1].id.clone();
        engine.set_active_profile(&sam).unwrap();

        let acks = engine.tick(t0() + Duration::hours(1));
        assert_eq!(acks[0].text, "Okay, turning on the kitchen lights.");

        assert!(!engine.state().lights("kitchen").unwrap().power);
        engine.set_active_profile(&alex).unwrap();
        assert!(engine.state().lights("kitchen").unwrap().power);
    }

    #[test]
    fn test_recursive_schedule_waits_for_next_tick() {
        let mut engine = engine();

        engine.handle_command("at 8:30, at 8:31, say hi", t0());
        let first = engine.tick(t0() + Duration::minutes(40));
        assert_eq!(first.len(), 1);
        assert_eq!(engine.schedules().len(), 2);
        assert!(!engine.schedules()[1].done);
    }

    #[test]
    fn test_deleting_profile_drops_its_schedules() {
        let mut engine = engine();
        let sam = engine.profiles()[1].id.clone();
        engine.set_active_profile(&sam).unwrap();
        engine.handle_command("wake me up at 6am", t0());
        assert_eq!(engine.schedules().len(), 1);

        let removed = engine.delete_profile(&sam).unwrap();
        assert_eq!(removed.name, "Sam");
        assert!(engine.schedules().is_empty());
        assert_eq!(engine.active_profile().name, "Alex");
    }

    #[test]
    fn test_state_survives_restart() {
        let store = MemoryStore::new();
        let sam;
        {
            let mut engine = engine_on(&store);
            sam = engine.profiles()[1].id.clone();
            engine.set_active_profile(&sam).unwrap();
            engine.set_language(&sam, "fr-FR").unwrap();
            engine.handle_command("lock the door", t0());
            engine.handle_command("wake me up at 6am", t0());
            engine.persist().unwrap();
        }

        let engine = engine_on(&store);
        assert_eq!(engine.active_profile().id, sam);
        assert_eq!(engine.active_profile().defaults.language, "fr-FR");
        assert_eq!(engine.schedules().len(), 1);
    }

    #[test]
    fn test_language_of_unknown_profile_is_an_error() {
        let mut engine = engine();
        assert_eq!(
            engine.set_language("p_nobody", "de-DE").unwrap_err(),
            ProfileError::NotFound("p_nobody".to_string())
        );
    }

    #[test]
    fn test_malformed_stored_payload_fires_as_triggered() {
        let store = MemoryStore::new();
        let json = r#"[
            {"id": 0, "firesAt": "2026-10-14T07:00:00",
             "payload": {"kind": "action", "value": {"type": "say", "text": "good"}}},
            {"id": 1, "firesAt": "2026-10-14T07:30:00",
             "payload": {"kind": "action", "value": {"type": "setLights"}}},
            {"id": 2, "firesAt": "not a time"}
        ]"#;
        store.write(store::SCHEDULES_KEY, json).unwrap();

        let mut engine = engine_on(&store);
        assert_eq!(engine.schedules().len(), 2);

        let texts: Vec<String> = engine.tick(t0()).into_iter().map(|a| a.text).collect();
        assert_eq!(texts, ["good", "Scheduled item triggered."]);

        engine.handle_command("wake me up at 6am", t0());
        let saved: Vec<ScheduledAction> = store::load(&store, store::SCHEDULES_KEY).unwrap();
        assert_eq!(saved.len(), 3);
    }

    #[test]
    fn test_empty_payloads_fire_with_fallback_texts() {
        let mut engine = engine();
        let at = t0() + Duration::minutes(1);
        engine.schedule.push(at, Payload::Empty, None);
        engine.schedule.push(at, Payload::Command("  ".to_string()), None);
        engine.schedule.push(
            at,
            Payload::Action(crate::engine::Action::Say {
                text: String::new(),
            }),
            None,
        );

        let texts: Vec<String> = engine.tick(at).into_iter().map(|a| a.text).collect();
        assert_eq!(
            texts,
            [
                "Scheduled item triggered.",
                "Scheduled item triggered.",
                "It's time."
            ]
        );
    }

    #[test]
    fn test_appliance_transitions_cannot_be_removed() {
        let mut engine = engine();
        engine.handle_command("start coffee", t0());
        let ready = engine.schedules()[0].id;
        assert!(engine.schedules()[0].is_transition());
        assert_eq!(engine.user_schedules().count(), 0);

        assert_eq!(engine.remove_schedule(ready), None);
        engine.tick(t0() + Duration::hours(1));
        assert_eq!(
            engine.state().coffee_maker().unwrap().status,
            CoffeeStatus::Ready
        );
    }

    #[test]
    fn test_sensor_drifts_toward_target() {
        let mut engine = engine();
        engine.handle_command("set the thermostat to 80 degrees", t0());

        for secs in 1..=30 {
            engine.tick(t0() + Duration::seconds(secs));
        }

        let current = engine.state().climate.sensor.current;
        assert!(current > 74.0 && current <= 80.05, "{}", current);
    }
}
