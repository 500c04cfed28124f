//! Deferred actions.
//!
//! One flat queue holds both user-scheduled entries (wake-ups, "at 9pm, ..."
//! commands) and the appliance phase transitions that simulate coffee and
//! washer latency. Entries are polled, not timed: [`ScheduleQueue::take_due`]
//! hands back everything whose deadline has passed and marks it done, so an
//! entry fires at most once no matter how many polls follow its deadline.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use strum::Display;
use tracing::warn;

use super::intent::Action;

/// Appliance phase change driven by the queue instead of a free-running timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    #[strum(to_string = "coffee ready")]
    CoffeeReady,
    #[strum(to_string = "washer spin")]
    WasherSpin,
    #[strum(to_string = "washer done")]
    WasherDone,
}

/// What a scheduled entry does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Payload {
    Action(Action),

    /// Raw command text, resolved and executed when the entry fires.
    Command(String),

    Transition(Transition),

    /// Nothing usable was recorded; firing only announces the trigger.
    #[default]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledAction {
    pub id: u64,
    pub fires_at: NaiveDateTime,
    #[serde(default, deserialize_with = "lenient_payload")]
    pub payload: Payload,
    /// Profile whose home the entry acts on.
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub done: bool,
}

/// Payloads that no longer decode still fire, as [`Payload::Empty`].
fn lenient_payload<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(Payload::deserialize(&value).unwrap_or_else(|e| {
        warn!(%value, "Unreadable scheduled payload, keeping entry as empty: {}", e);
        Payload::Empty
    }))
}

impl ScheduledAction {
    /// Appliance transitions are internal bookkeeping rather than user routines.
    pub fn is_transition(&self) -> bool {
        matches!(self.payload, Payload::Transition(_))
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        match &self.payload {
            Payload::Action(Action::SetLights { room, value }) => {
                format!("Set {} lights to {}%", room, value)
            }
            Payload::Action(Action::Say { text }) => format!("Say: \"{}\"", text),
            Payload::Command(command) => format!("Run: \"{}\"", command),
            Payload::Transition(transition) => format!("Appliance: {}", transition),
            Payload::Empty => "Custom action".to_string(),
        }
    }
}

/// Ordered list of scheduled entries.
#[derive(Debug, Default)]
pub struct ScheduleQueue {
    entries: Vec<ScheduledAction>,
    next_id: u64,
}

impl ScheduleQueue {
    /// Rebuild a queue from a snapshot, keeping ids unique for new entries.
    pub fn from_entries(entries: Vec<ScheduledAction>) -> Self {
        let next_id = entries.iter().map(|e| e.id.saturating_add(1)).max().unwrap_or(0);
        Self { entries, next_id }
    }

    pub fn entries(&self) -> &[ScheduledAction] {
        &self.entries
    }

    /// Entries that have not fired yet.
    pub fn pending(&self) -> impl Iterator<Item = &ScheduledAction> {
        self.entries.iter().filter(|e| !e.done)
    }

    /// Append an entry and return its id.
    pub fn push(
        &mut self,
        fires_at: NaiveDateTime,
        payload: Payload,
        profile_id: Option<String>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.entries.push(ScheduledAction {
            id,
            fires_at,
            payload,
            profile_id,
            done: false,
        });
        id
    }

    /// Delete an entry outright.
    pub fn remove(&mut self, id: u64) -> Option<ScheduledAction> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Delete every entry belonging to a profile.
    pub fn remove_for_profile(&mut self, profile_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.profile_id.as_deref() != Some(profile_id));
        before - self.entries.len()
    }

    /// Drop pending transitions of the given kinds for one profile.
    ///
    /// Returns how many entries were cancelled.
    pub fn cancel_transitions(&mut self, profile_id: &str, kinds: &[Transition]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| {
            let cancel = !e.done
                && e.profile_id.as_deref() == Some(profile_id)
                && matches!(e.payload, Payload::Transition(t) if kinds.contains(&t));
            !cancel
        });
        before - self.entries.len()
    }

    /// Collect every pending entry with `fires_at <= now`, in list order,
    /// marking each done.
    ///
    /// Fired transitions are dropped from the queue; user entries stay (as
    /// done) until deleted.
    pub fn take_due(&mut self, now: NaiveDateTime) -> Vec<ScheduledAction> {
        let mut due = Vec::new();
        for entry in self.entries.iter_mut() {
            if !entry.done && entry.fires_at <= now {
                entry.done = true;
                due.push(entry.clone());
            }
        }
        if due.iter().any(ScheduledAction::is_transition) {
            self.entries.retain(|e| !(e.done && e.is_transition()));
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use chrono::NaiveDate;

    use super::*;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 14)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn say(text: &str) -> Payload {
        Payload::Action(Action::Say {
            text: text.to_string(),
        })
    }

    #[test]
    fn test_overdue_entry_fires_exactly_once() {
        let mut queue = ScheduleQueue::default();
        queue.push(t0() - Duration::hours(3), say("late"), None);

        let mut fired = 0;
        for secs in 0..10 {
            fired += queue.take_due(t0() + Duration::seconds(secs)).len();
        }

        assert_eq!(fired, 1);
        assert!(queue.entries()[0].done);
    }

    #[test]
    fn test_due_entries_fire_in_list_order() {
        let mut queue = ScheduleQueue::default();
        let a = queue.push(t0() + Duration::minutes(5), say("a"), None);
        let b = queue.push(t0() + Duration::minutes(1), say("b"), None);
        let c = queue.push(t0() + Duration::hours(2), say("c"), None);

        assert!(queue.take_due(t0()).is_empty());

        let due: Vec<u64> = queue
            .take_due(t0() + Duration::minutes(10))
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(due, vec![a, b]);
        assert_eq!(queue.pending().map(|e| e.id).collect::<Vec<_>>(), vec![c]);
    }

    #[test]
    fn test_fired_transitions_are_pruned() {
        let mut queue = ScheduleQueue::default();
        queue.push(t0(), Payload::Transition(Transition::CoffeeReady), None);
        queue.push(t0(), say("hello"), None);

        let due = queue.take_due(t0());
        assert_eq!(due.len(), 2);
        assert_eq!(queue.entries().len(), 1);
        assert!(!queue.entries()[0].is_transition());
    }

    #[test]
    fn test_cancel_transitions_is_scoped_to_profile_and_kind() {
        let mut queue = ScheduleQueue::default();
        let p = Some("p_a".to_string());
        let q = Some("p_b".to_string());
        queue.push(t0(), Payload::Transition(Transition::WasherSpin), p.clone());
        queue.push(t0(), Payload::Transition(Transition::WasherDone), p.clone());
        queue.push(t0(), Payload::Transition(Transition::CoffeeReady), p.clone());
        queue.push(t0(), Payload::Transition(Transition::WasherDone), q);

        let cancelled = queue.cancel_transitions(
            "p_a",
            &[Transition::WasherSpin, Transition::WasherDone],
        );

        assert_eq!(cancelled, 2);
        assert_eq!(queue.entries().len(), 2);
    }

    #[test]
    fn test_ids_stay_unique_after_reload() {
        let mut queue = ScheduleQueue::default();
        queue.push(t0(), say("a"), None);
        let b = queue.push(t0(), say("b"), None);
        queue.remove(0);

        let mut reloaded = ScheduleQueue::from_entries(queue.entries().to_vec());
        let c = reloaded.push(t0(), say("c"), None);
        assert!(c > b);
    }

    #[test]
    fn test_describe() {
        let mut queue = ScheduleQueue::default();
        queue.push(
            t0(),
            Payload::Action(Action::SetLights {
                room: "kitchen".to_string(),
                value: 50,
            }),
            None,
        );
        queue.push(t0(), Payload::Command("start coffee".to_string()), None);
        queue.push(t0(), say("hi"), None);
        queue.push(t0(), Payload::Transition(Transition::WasherSpin), None);
        queue.push(t0(), Payload::Empty, None);

        let listing = queue
            .entries()
            .iter()
            .map(ScheduledAction::describe)
            .collect::<Vec<_>>()
            .join("\n");
        insta::assert_snapshot!(listing, @r#"
        Set kitchen lights to 50%
        Run: "start coffee"
        Say: "hi"
        Appliance: washer spin
        Custom action
        "#);
    }

    #[test]
    fn test_snapshot_without_payload_loads_as_empty() {
        let json = r#"[{"id": 3, "firesAt": "2026-10-15T07:00:00", "done": false}]"#;
        let entries: Vec<ScheduledAction> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].payload, Payload::Empty);
        assert_eq!(entries[0].profile_id, None);
    }

    #[test]
    fn test_malformed_payload_keeps_the_entry() {
        let json = r#"[
            {"id": 1, "firesAt": "2026-10-15T07:00:00",
             "payload": {"kind": "action", "value": {"type": "say", "text": "good"}}},
            {"id": 2, "firesAt": "2026-10-15T07:00:00",
             "payload": {"kind": "action", "value": {"type": "setLights"}}},
            {"id": 3, "firesAt": "2026-10-15T07:00:00", "payload": "garbage"}
        ]"#;
        let entries: Vec<ScheduledAction> = serde_json::from_str(json).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].payload, say("good"));
        assert_eq!(entries[1].payload, Payload::Empty);
        assert_eq!(entries[2].payload, Payload::Empty);
    }

    #[test]
    fn test_next_id_saturates_at_max() {
        let entry = ScheduledAction {
            id: u64::MAX,
            fires_at: t0(),
            payload: Payload::Empty,
            profile_id: None,
            done: true,
        };
        let mut queue = ScheduleQueue::from_entries(vec![entry]);
        assert_eq!(queue.push(t0(), say("late"), None), u64::MAX);
    }
}
