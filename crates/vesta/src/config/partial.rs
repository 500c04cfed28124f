use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use toml::Spanned;

use super::LogLevel;
use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::FieldOrigin;
use super::diagnostics::LoadError;
use super::diagnostics::MergeError;
use super::diagnostics::SourceInfo;
use super::diagnostics::Warning;

#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub home: Option<PartialHomeConfig>,
    pub simulation: Option<PartialSimulationConfig>,
    pub store: Option<PartialStoreConfig>,
    pub api: Option<PartialApiConfig>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// Where each merged field was first set, keyed by field path
    #[serde(skip)]
    pub origins: HashMap<String, FieldOrigin>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialHomeConfig {
    pub default_room: Option<Spanned<String>>,
    pub language: Option<Spanned<String>>,
    pub temperature: Option<Spanned<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialSimulationConfig {
    pub coffee_brew_secs: Option<Spanned<u64>>,
    pub washer_spin_secs: Option<Spanned<u64>>,
    pub washer_done_secs: Option<Spanned<u64>>,
    pub tick_millis: Option<Spanned<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialStoreConfig {
    pub data_dir: Option<Spanned<PathBuf>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialApiConfig {
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
}

/// First-wins bookkeeping shared by every field of every section.
struct Merger {
    origins: HashMap<String, FieldOrigin>,
    diagnostics: Vec<Diagnostic>,
}

impl Merger {
    /// Keep `incoming` in `slot` unless an earlier file already set the field,
    /// in which case the earlier value stays and a conflict is recorded.
    fn take<T>(
        &mut self,
        field_path: &str,
        slot: &mut Option<Spanned<T>>,
        incoming: Option<Spanned<T>>,
        source: &SourceInfo,
    ) {
        let Some(value) = incoming else {
            return;
        };
        let origin = FieldOrigin {
            file_path: source.file_path.clone(),
            span: value.span(),
            content: source.content.clone(),
        };

        if let Some(prev) = self.origins.get(field_path) {
            self.diagnostics
                .push(Diagnostic::Error(Error::Merge(MergeError {
                    field_path: field_path.to_string(),
                    message: format!("'{}' defined in multiple config files", field_path),
                    conflicts: vec![prev.clone(), origin],
                })));
        } else {
            *slot = Some(value);
            self.origins.insert(field_path.to_string(), origin);
        }
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Returns every loaded file in order: each file's imports (depth-first)
    /// come before the file itself.
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path.clone(),
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        for import_path in &config.imports {
            let import_path_buf = PathBuf::from(import_path);

            // Relative imports resolve against the importing file's directory
            let resolved_path = if import_path_buf.is_absolute() {
                import_path_buf
            } else {
                let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
                parent_dir.join(import_path_buf)
            };

            Self::load_recursive(&resolved_path, visited, configs)?;
        }

        configs.push(config);

        // Sibling branches may import the same file
        visited.remove(&canonical_path);

        Ok(())
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a field is kept.
    /// Conflicts are collected rather than returned early so that every
    /// conflict is reported at once.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut merger = Merger {
            origins: HashMap::new(),
            diagnostics: Vec::new(),
        };
        let mut imports = Vec::new();

        for config in configs {
            imports.extend(config.imports.clone());

            let source_info = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            let is_empty = config.logging.is_none()
                && config.home.is_none()
                && config.simulation.is_none()
                && config.store.is_none()
                && config.api.is_none()
                && config.imports.is_empty();

            if is_empty {
                merger
                    .diagnostics
                    .push(Diagnostic::Warning(Warning::EmptyConfig {
                        file_path: source_info.file_path.clone(),
                    }));
            }

            if let Some(logging) = config.logging {
                let dst = result.logging.get_or_insert_with(Default::default);
                merger.take("logging.level", &mut dst.level, logging.level, &source_info);

                if let Some(overrides) = logging.overrides {
                    let dst_overrides = dst.overrides.get_or_insert_with(HashMap::new);
                    for (target, level) in overrides {
                        let mut slot = dst_overrides.remove(&target);
                        merger.take(
                            &format!("logging.overrides.{}", target),
                            &mut slot,
                            Some(level),
                            &source_info,
                        );
                        if let Some(level) = slot {
                            dst_overrides.insert(target, level);
                        }
                    }
                }
            }

            if let Some(home) = config.home {
                let dst = result.home.get_or_insert_with(Default::default);
                merger.take(
                    "home.default_room",
                    &mut dst.default_room,
                    home.default_room,
                    &source_info,
                );
                merger.take("home.language", &mut dst.language, home.language, &source_info);
                merger.take(
                    "home.temperature",
                    &mut dst.temperature,
                    home.temperature,
                    &source_info,
                );
            }

            if let Some(sim) = config.simulation {
                let dst = result.simulation.get_or_insert_with(Default::default);
                merger.take(
                    "simulation.coffee_brew_secs",
                    &mut dst.coffee_brew_secs,
                    sim.coffee_brew_secs,
                    &source_info,
                );
                merger.take(
                    "simulation.washer_spin_secs",
                    &mut dst.washer_spin_secs,
                    sim.washer_spin_secs,
                    &source_info,
                );
                merger.take(
                    "simulation.washer_done_secs",
                    &mut dst.washer_done_secs,
                    sim.washer_done_secs,
                    &source_info,
                );
                merger.take(
                    "simulation.tick_millis",
                    &mut dst.tick_millis,
                    sim.tick_millis,
                    &source_info,
                );
            }

            if let Some(store) = config.store {
                let dst = result.store.get_or_insert_with(Default::default);
                merger.take("store.data_dir", &mut dst.data_dir, store.data_dir, &source_info);
            }

            if let Some(api) = config.api {
                let dst = result.api.get_or_insert_with(Default::default);
                merger.take("api.listen", &mut dst.listen, api.listen, &source_info);
                merger.take("api.port", &mut dst.port, api.port, &source_info);
            }
        }

        result.imports = imports;
        result.origins = merger.origins;

        (result, merger.diagnostics)
    }
}
