//! Free-text command resolution.
//!
//! Text is normalized and then tested against an ordered rule table. The
//! first rule that produces an intent wins, so more specific phrasings (TV,
//! appliances) sit ahead of the generic lights patterns that would otherwise
//! swallow them. Resolution never fails: unmatched text becomes
//! [`Intent::Unknown`], and parameters that cannot be extracted are threaded
//! through as `None` for the executor to report.


use std::sync::LazyLock;

use chrono::Duration;
use chrono::NaiveDateTime;
use regex::Regex;
use tracing::debug;

use super::intent::Action;
use super::intent::Intent;
use super::intent::WAKE_GREETING;

/// Volume used when a volume phrase carries no readable number.
const DEFAULT_TV_VOLUME: i64 = 20;

/// Inputs the resolver needs besides the text itself.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Room assumed when the text names none (from the active profile).
    pub default_room: &'a str,

    /// Reference point for resolving times of day to the next occurrence.
    pub now: NaiveDateTime,
}

/// One utterance in the forms the rules match against.
struct Utterance {
    /// Lowercased, punctuation stripped, whitespace collapsed.
    text: String,

    /// Like `text` but with commas kept, for the comma-delimited schedule form.
    clause_text: String,
}

type RuleFn = fn(&Utterance, &ResolveContext<'_>) -> Option<Intent>;

/// Ordered rule table; first match wins.
const RULES: &[(&str, RuleFn)] = &[
    ("schedule_wake", schedule_wake),
    ("schedule_generic", schedule_generic),
    ("tv_power", tv_power),
    ("tv_volume", tv_volume),
    ("lock_door", lock_door),
    ("washer_start", washer_start),
    ("washer_stop", washer_stop),
    ("washer_status", washer_status),
    ("coffee_stop", coffee_stop),
    ("set_thermostat", set_thermostat),
    ("query_temp", query_temp),
    ("lights_power", lights_power),
    ("lights_level", lights_level),
    ("coffee", coffee),
];

macro_rules! regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pattern).unwrap());
    };
}

regex!(PUNCTUATION_RE, r"[.,!?]");
regex!(CLAUSE_PUNCTUATION_RE, r"[.!?]");
regex!(WHITESPACE_RE, r"\s+");

regex!(TIME_RE, r"(?i)(\d{1,2})(?::(\d{2}))?\s*(am|pm)?");
regex!(PERCENT_RE, r"(\d{1,3})\s*%|(?:to|at)\s*(\d{1,3})\s*percent?");
regex!(TEMP_UNIT_RE, r"(?i)(\d{2,3})\s*(?:°|deg|degrees?)");
regex!(TEMP_BARE_RE, r"set (?:the )?thermostat (?:to )?(\d{2,3})\b");

regex!(LIVING_RE, r"living(?: room)?");
regex!(BEDROOM_RE, r"bed(?:room)?");
regex!(KITCHEN_RE, r"kitchen");

regex!(WAKE_PREFIX_RE, r"^wake me up at");
regex!(WAKE_TIME_RE, r"^wake me up at (.+?)(?: and |$)");
regex!(
    WAKE_LIGHTS_RE,
    r"turn (?:on )?(?:the )?(.*?)(?: lights?)? (?:to|at) (\d{1,3})%"
);
regex!(SCHEDULE_PREFIX_RE, r"^at \d");
regex!(SCHEDULE_CLAUSE_RE, r"^at (.+?), ?(.*)$");

regex!(TV_POWER_RE, r"(?:turn|power|switch)\s+(on|off)\s+(?:the )?(?:tv|television|teevee)");
regex!(
    TV_VOLUME_RE,
    r"(?:set|change)\s+(?:the )?t(?:v|elevision)\s+(?:volume|sound).*\d{1,3}|tv .*volume.*\d{1,3}"
);
regex!(NUMBER_RE, r"\d{1,3}");

regex!(LOCK_RE, r"(?:lock|unlock)\s+(?:the )?(?:bedroom )?door");

regex!(
    WASHER_START_RE,
    r"(?:start|turn on|switch on)\s+(?:the )?(?:washing machine|washer|washing)"
);
regex!(
    WASHER_STOP_RE,
    r"(?:stop|turn off|switch off|cancel)\s+(?:the )?(?:washing machine|washer|washing)"
);
regex!(
    WASHER_STATUS_RE,
    r"(?:is|status|finished|done).*(?:washing machine|washer)|is the washer (?:finished|done)"
);

regex!(COFFEE_STOP_RE, r"(?:stop|cancel)\s+(?:the )?coffee(?: maker)?");
regex!(COFFEE_START_RE, r"start (?:the )?coffee(?: maker)?");

regex!(
    QUERY_TEMP_RE,
    r"what(?:'?| i)s the current temperature|temperature now|what(?:'?| i)s it (?:in|inside)"
);

regex!(
    LIGHTS_POWER_RE,
    r"(?:turn|switch)\s+(?P<state>on|off)\s+(?:the )?(?P<object>.*?)(?: (?:light|lights))?(?: in (?:the )?(?P<room>living(?: room)?|bed(?:room)?|kitchen))?$"
);
regex!(
    LIGHTS_LEVEL_RE,
    r"(?:dim|brighten|set|increase|decrease)\s+(?:the )?(?P<object>.*?)(?: light| lights)?(?: in (?:the )?(?P<room>living(?: room)?|bed(?:room)?|kitchen))?.*?(?:to|at)\s*(?P<level>\d{1,3})(?:\s*%|\s*percent)?"
);

/// Resolve free text into an intent. Never fails.
pub fn resolve(raw: &str, ctx: &ResolveContext<'_>) -> Intent {
    let utterance = Utterance {
        text: normalize(raw),
        clause_text: normalize_keeping_commas(raw),
    };

    for (name, rule) in RULES {
        if let Some(intent) = rule(&utterance, ctx) {
            debug!(rule = name, intent = intent.kind(), "resolved command");
            return intent;
        }
    }

    debug!(text = %utterance.text, "no rule matched");
    Intent::Unknown {
        raw: raw.to_string(),
    }
}

/// Lowercase, replace `. , ! ?` with spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    collapse(&PUNCTUATION_RE.replace_all(&text.to_lowercase(), " "))
}

fn normalize_keeping_commas(text: &str) -> String {
    collapse(&CLAUSE_PUNCTUATION_RE.replace_all(&text.to_lowercase(), " "))
}

fn collapse(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

/// Parse `H[:MM][am|pm]` into the next occurrence of that time of day after `now`.
///
/// Uses the 12-hour convention when a suffix is present (`12am` is midnight,
/// `12pm` is noon). Returns `None` for out-of-range hours or minutes.
pub fn parse_time(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let caps = TIME_RE.captures(text)?;
    let mut hours: u32 = caps[1].parse().ok()?;
    let minutes: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };

    let meridiem = caps.get(3).map(|m| m.as_str().to_lowercase());
    match meridiem.as_deref() {
        Some("pm") if hours < 12 => hours += 12,
        Some("am") if hours == 12 => hours = 0,
        _ => {}
    }

    if hours >= 24 || minutes >= 60 {
        return None;
    }

    let at = now.date().and_hms_opt(hours, minutes, 0)?;
    if at <= now {
        Some(at + Duration::days(1))
    } else {
        Some(at)
    }
}

/// Extract `NN%` or `to/at NN percent`, clamped to 0-100.
pub fn extract_percentage(text: &str) -> Option<u8> {
    let caps = PERCENT_RE.captures(text)?;
    let digits = caps.get(1).or_else(|| caps.get(2))?;
    let value: i64 = digits.as_str().parse().ok()?;
    Some(value.clamp(0, 100) as u8)
}

/// Extract a temperature given with a degree marker, or from
/// `set the thermostat to NN`.
pub fn extract_temperature(text: &str) -> Option<i32> {
    if let Some(caps) = TEMP_UNIT_RE.captures(text) {
        return caps[1].parse().ok();
    }
    TEMP_BARE_RE
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

/// Infer the room a phrase refers to, falling back to `default_room`.
pub fn guess_room(text: &str, default_room: &str) -> String {
    if LIVING_RE.is_match(text) {
        "living".to_string()
    } else if BEDROOM_RE.is_match(text) {
        "bedroom".to_string()
    } else if KITCHEN_RE.is_match(text) {
        "kitchen".to_string()
    } else {
        default_room.to_string()
    }
}

fn schedule_wake(u: &Utterance, ctx: &ResolveContext<'_>) -> Option<Intent> {
    if !WAKE_PREFIX_RE.is_match(&u.text) {
        return None;
    }

    let time = WAKE_TIME_RE
        .captures(&u.text)
        .and_then(|caps| parse_time(&caps[1], ctx.now));

    let action = WAKE_LIGHTS_RE
        .captures(&u.text)
        .and_then(|caps| {
            let value = extract_percentage(&caps[0])?;
            Some(Action::SetLights {
                room: guess_room(&caps[1], ctx.default_room),
                value,
            })
        })
        .unwrap_or_else(|| Action::Say {
            text: WAKE_GREETING.to_string(),
        });

    Some(Intent::ScheduleWake { time, action })
}

// Splits on the first comma only, so a command that itself contains a comma
// is cut short.
fn schedule_generic(u: &Utterance, ctx: &ResolveContext<'_>) -> Option<Intent> {
    if !SCHEDULE_PREFIX_RE.is_match(&u.text) {
        return None;
    }

    let caps = SCHEDULE_CLAUSE_RE.captures(&u.clause_text)?;
    let time = parse_time(&caps[1], ctx.now);
    let command = Some(caps[2].trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Some(Intent::ScheduleGeneric { time, command })
}

fn tv_power(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    let caps = TV_POWER_RE.captures(&u.text)?;
    Some(Intent::TvPower {
        on: &caps[1] == "on",
    })
}

fn tv_volume(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    if !TV_VOLUME_RE.is_match(&u.text) {
        return None;
    }
    let volume = NUMBER_RE
        .find(&u.text)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_TV_VOLUME);
    Some(Intent::TvVolume { volume })
}

fn lock_door(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    if !LOCK_RE.is_match(&u.text) {
        return None;
    }
    let locked = u.text.contains("lock") && !u.text.contains("unlock");
    Some(Intent::LockDoor { locked })
}

fn washer_start(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    WASHER_START_RE
        .is_match(&u.text)
        .then_some(Intent::WasherStart)
}

fn washer_stop(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    WASHER_STOP_RE
        .is_match(&u.text)
        .then_some(Intent::WasherStop)
}

fn washer_status(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    WASHER_STATUS_RE
        .is_match(&u.text)
        .then_some(Intent::WasherStatus)
}

fn coffee_stop(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    COFFEE_STOP_RE
        .is_match(&u.text)
        .then_some(Intent::CoffeeStop)
}

fn set_thermostat(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    if !u.text.contains("thermostat") {
        return None;
    }
    let temp = extract_temperature(&u.text)?;
    Some(Intent::SetThermostat { temp })
}

fn query_temp(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    QUERY_TEMP_RE
        .is_match(&u.text)
        .then_some(Intent::QueryTemp)
}

fn lights_power(u: &Utterance, ctx: &ResolveContext<'_>) -> Option<Intent> {
    let caps = LIGHTS_POWER_RE.captures(&u.text)?;
    let on = &caps["state"] == "on";
    let room = match caps.name("room") {
        Some(room) => guess_room(room.as_str(), ctx.default_room),
        None => guess_room(&caps[0], ctx.default_room),
    };
    Some(Intent::LightsPower { room, on })
}

fn lights_level(u: &Utterance, ctx: &ResolveContext<'_>) -> Option<Intent> {
    let caps = LIGHTS_LEVEL_RE.captures(&u.text)?;
    let level: i64 = caps["level"].parse().ok()?;
    let room = match caps.name("room") {
        Some(room) => guess_room(room.as_str(), ctx.default_room),
        None => guess_room(&caps[0], ctx.default_room),
    };
    Some(Intent::LightsLevel {
        room,
        percent: level.clamp(0, 100) as u8,
    })
}

fn coffee(u: &Utterance, _ctx: &ResolveContext<'_>) -> Option<Intent> {
    COFFEE_START_RE
        .is_match(&u.text)
        .then_some(Intent::Coffee)
}
