use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Duration;
use serde::Deserialize;
use toml::Spanned;
use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::ValidationError;
use super::diagnostics::format_diagnostics;
use super::partial::PartialConfig;
use crate::engine::ProfileDefaults;
use crate::engine::SimulationTimings;

/// Rooms present in every freshly created home.
const KNOWN_ROOMS: [&str; 3] = ["living", "bedroom", "kitchen"];

/// Plausible thermostat range, in degrees Fahrenheit.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<i64> = 40..=100;

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub home: HomeConfig,
    pub simulation: SimulationConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"vesta::api" = "debug"`
    pub overrides: HashMap<String, LogLevel>,
}

/// Defaults for profiles created by this process.
#[derive(Debug)]
pub struct HomeConfig {
    pub default_room: String,
    pub language: String,
    pub temperature: i32,
}

impl Default for HomeConfig {
    fn default() -> Self {
        let defaults = ProfileDefaults::default();
        Self {
            default_room: defaults.room,
            language: defaults.language,
            temperature: defaults.temperature,
        }
    }
}

#[derive(Debug)]
pub struct SimulationConfig {
    pub coffee_brew_secs: u64,
    pub washer_spin_secs: u64,
    pub washer_done_secs: u64,

    /// Scheduler poll period
    pub tick_millis: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            coffee_brew_secs: 4,
            washer_spin_secs: 4,
            washer_done_secs: 8,
            tick_millis: 1000,
        }
    }
}

#[derive(Debug)]
pub struct StoreConfig {
    /// Directory holding the JSON snapshots
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".vesta"),
        }
    }
}

#[derive(Debug)]
pub struct ApiConfig {
    pub listen: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{}", format_diagnostics(.0))]
    Invalid(Vec<Diagnostic>),
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Files listed earlier win over later ones; a field set in two files is
    /// a merge error. Returns the config with any warnings, or every error
    /// found across merging and validation.
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;

        let (partial, diagnostics) = PartialConfig::merge(configs);

        Self::from_partial(partial, diagnostics)
    }

    /// Convert a merged PartialConfig to a Config, validating all fields
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let mut validator = Validator {
            partial: &partial,
            errors: Vec::new(),
        };

        let logging = partial
            .logging
            .clone()
            .map(|logging| LoggingConfig {
                level: logging.level.map(|s| *s.get_ref()).unwrap_or_default(),
                overrides: logging
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            })
            .unwrap_or_default();

        let mut home = HomeConfig::default();
        if let Some(partial_home) = partial.home.clone() {
            if let Some(room) = partial_home.default_room {
                validator.check(
                    "home.default_room",
                    KNOWN_ROOMS.contains(&room.get_ref().as_str()),
                    || format!("unknown room, expected one of {}", KNOWN_ROOMS.join(", ")),
                );
                home.default_room = room.into_inner();
            }
            if let Some(language) = partial_home.language {
                validator.check("home.language", !language.get_ref().trim().is_empty(), || {
                    "language tag must not be empty".to_string()
                });
                home.language = language.into_inner();
            }
            if let Some(temperature) = partial_home.temperature {
                let degrees = *temperature.get_ref();
                validator.check("home.temperature", TEMPERATURE_RANGE.contains(&degrees), || {
                    format!(
                        "temperature must be between {} and {}",
                        TEMPERATURE_RANGE.start(),
                        TEMPERATURE_RANGE.end()
                    )
                });
                home.temperature =
                    degrees.clamp(*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end()) as i32;
            }
        }

        let mut simulation = SimulationConfig::default();
        if let Some(sim) = partial.simulation.clone() {
            let value = |field: Option<Spanned<u64>>, default: u64| {
                field.map(Spanned::into_inner).unwrap_or(default)
            };
            simulation = SimulationConfig {
                coffee_brew_secs: value(sim.coffee_brew_secs, simulation.coffee_brew_secs),
                washer_spin_secs: value(sim.washer_spin_secs, simulation.washer_spin_secs),
                washer_done_secs: value(sim.washer_done_secs, simulation.washer_done_secs),
                tick_millis: value(sim.tick_millis, simulation.tick_millis),
            };
        }
        validator.check("simulation.tick_millis", simulation.tick_millis > 0, || {
            "tick period must be positive".to_string()
        });
        validator.check(
            "simulation.washer_done_secs",
            simulation.washer_done_secs > simulation.washer_spin_secs,
            || "washer must finish after it starts spinning".to_string(),
        );

        let store = partial
            .store
            .clone()
            .and_then(|s| s.data_dir)
            .map(|dir| StoreConfig {
                data_dir: dir.into_inner(),
            })
            .unwrap_or_default();

        let mut api = ApiConfig::default();
        if let Some(partial_api) = partial.api.clone() {
            if let Some(listen) = partial_api.listen {
                api.listen = listen.into_inner();
            }
            if let Some(port) = partial_api.port {
                api.port = port.into_inner();
            }
        }

        diagnostics.extend(
            validator
                .errors
                .into_iter()
                .map(|e| Diagnostic::Error(Error::Validation(e))),
        );

        if diagnostics.iter().any(|d| d.is_error()) {
            return Err(ConfigError::Invalid(diagnostics));
        }

        Ok((
            Config {
                logging,
                home,
                simulation,
                store,
                api,
            },
            diagnostics,
        ))
    }

    pub fn profile_defaults(&self) -> ProfileDefaults {
        ProfileDefaults {
            room: self.home.default_room.clone(),
            language: self.home.language.clone(),
            temperature: self.home.temperature,
        }
    }

    pub fn timings(&self) -> SimulationTimings {
        let secs = |s: u64| Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX / 1000));
        SimulationTimings {
            coffee_brew: secs(self.simulation.coffee_brew_secs),
            washer_spin: secs(self.simulation.washer_spin_secs),
            washer_done: secs(self.simulation.washer_done_secs),
        }
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.simulation.tick_millis)
    }
}

/// Collects validation errors, pointing each at the file that set the field.
struct Validator<'a> {
    partial: &'a PartialConfig,
    errors: Vec<ValidationError>,
}

impl Validator<'_> {
    fn check(&mut self, field_path: &str, ok: bool, message: impl FnOnce() -> String) {
        if ok {
            return;
        }
        self.errors.push(ValidationError {
            field_path: field_path.to_string(),
            message: message(),
            origin: self.partial.origins.get(field_path).cloned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_merge_non_overlapping_configs() {
        let dir = tempfile::tempdir().unwrap();
        let base = write(
            &dir,
            "base.toml",
            r#"
[logging]
level = "info"

[home]
default_room = "kitchen"
temperature = 68
"#,
        );
        let extra = write(
            &dir,
            "extra.toml",
            r#"
[logging.overrides]
"vesta::api" = "debug"

[simulation]
coffee_brew_secs = 2
"#,
        );

        let (config, diagnostics) = Config::from_files(&[base, extra]).unwrap();

        assert!(diagnostics.is_empty());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(
            config.logging.overrides.get("vesta::api"),
            Some(&LogLevel::Debug)
        );
        assert_eq!(config.home.default_room, "kitchen");
        assert_eq!(config.home.language, "en-IN");
        assert_eq!(config.simulation.coffee_brew_secs, 2);
        assert_eq!(config.simulation.washer_done_secs, 8);
        assert_eq!(config.timings().coffee_brew, Duration::seconds(2));
        assert_eq!(config.profile_defaults().temperature, 68);
    }

    #[test]
    fn test_conflicts_are_all_reported() {
        let dir = tempfile::tempdir().unwrap();
        let base = write(
            &dir,
            "base.toml",
            r#"
[logging]
level = "info"

[logging.overrides]
"vesta::store" = "trace"

[api]
port = 8080
"#,
        );
        let conflict = write(
            &dir,
            "conflict.toml",
            r#"
[logging]
level = "debug"

[logging.overrides]
"vesta::store" = "error"

[api]
port = 9090
"#,
        );

        let err = Config::from_files(&[base, conflict]).unwrap_err();
        let ConfigError::Invalid(diagnostics) = &err else {
            panic!("expected merge errors, got {}", err);
        };
        assert_eq!(diagnostics.len(), 3);

        let msg = err.to_string();
        assert!(msg.contains("Merge conflict"));
        assert!(msg.contains("logging.level"));
        assert!(msg.contains("logging.overrides.vesta::store"));
        assert!(msg.contains("api.port"));
    }

    #[test]
    fn test_import_resolution_is_relative() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir,
            "conf.d/base.toml",
            r#"
[store]
data_dir = "/var/lib/vesta"
"#,
        );
        let main = write(
            &dir,
            "main.toml",
            r#"
imports = ["conf.d/base.toml"]

[api]
listen = "0.0.0.0"
"#,
        );

        let (config, _) = Config::from_files(&[main]).unwrap();
        assert_eq!(config.store.data_dir, PathBuf::from("/var/lib/vesta"));
        assert_eq!(config.api.listen, "0.0.0.0");
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_import_cycle_detection() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(&dir, "a.toml", "imports = [\"b.toml\"]\n");
        write(&dir, "b.toml", "imports = [\"a.toml\"]\n");

        let err = Config::from_files(&[a]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Load(LoadError::ImportCycle { .. })
        ));
        assert!(err.to_string().contains("Import cycle"));
    }

    #[test]
    fn test_empty_config_file_warns() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write(&dir, "empty.toml", "");

        let (config, diagnostics) = Config::from_files(&[empty]).unwrap();

        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
        assert_eq!(config.simulation.tick_millis, 1000);
        assert_eq!(config.tick_period(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_validation_errors_point_at_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "bad.toml",
            r#"
[home]
default_room = "garage"
temperature = 120

[simulation]
washer_spin_secs = 10
washer_done_secs = 5
"#,
        );

        let err = Config::from_files(&[path]).unwrap_err();
        let ConfigError::Invalid(diagnostics) = &err else {
            panic!("expected validation errors, got {}", err);
        };

        let fields: Vec<&str> = diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::Error(Error::Validation(v)) => Some(v.field_path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            fields,
            ["home.default_room", "home.temperature", "simulation.washer_done_secs"]
        );

        let Diagnostic::Error(Error::Validation(room)) = &diagnostics[0] else {
            unreachable!();
        };
        let origin = room.origin.as_ref().unwrap();
        assert!(origin.content[origin.span.clone()].contains("garage"));

        let msg = err.to_string();
        assert!(msg.contains("unknown room"));
        assert!(msg.contains("washer must finish after it starts spinning"));
    }

    #[test]
    fn test_unspanned_validation_error_format() {
        let diagnostics = vec![Diagnostic::Error(Error::Validation(ValidationError {
            field_path: "simulation.tick_millis".to_string(),
            message: "tick period must be positive".to_string(),
            origin: None,
        }))];

        insta::assert_snapshot!(format_diagnostics(&diagnostics).trim_end(), @"Validation error in 'simulation.tick_millis': tick period must be positive");
    }

    #[test]
    fn test_missing_file_error() {
        let missing = PathBuf::from("/nonexistent/vesta.toml");

        let err = Config::from_files(&[missing]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Failed to read"));
        assert!(msg.contains("/nonexistent/vesta.toml"));
    }
}
