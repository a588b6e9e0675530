use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use toml::Spanned;

use crate::provider::FieldValue;
use super::LogLevel;
use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::MergeConflictLocation;
use super::diagnostics::MergeError;
use super::diagnostics::SourceInfo;
use super::diagnostics::Warning;

#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub api: Option<PartialApiConfig>,
    pub http: Option<PartialHttpConfig>,
    pub providers: Option<HashMap<String, PartialProviderConfig>>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialApiConfig {
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialHttpConfig {
    pub timeout_secs: Option<Spanned<u64>>,
    pub user_agent: Option<Spanned<String>>,
}

/// One `[providers.<id>]` table. Keys other than the scheduling settings are
/// the provider's own fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialProviderConfig {
    pub enabled: Option<Spanned<bool>>,
    pub interval_minutes: Option<Spanned<u64>>,
    pub timeout_secs: Option<Spanned<u64>>,
    #[serde(flatten)]
    pub fields: HashMap<String, FieldValue>,
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
    /// Imports are loaded depth-first. Returns every loaded config in order,
    /// each file's imports before the file itself.
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

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.api.is_none()
            && self.http.is_none()
            && self.providers.is_none()
            && self.imports.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a setting is kept.
    /// Every setting defined more than once is reported as a conflict, and
    /// merging carries on so that all conflicts are found in one pass.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut diagnostics = Vec::new();
        let mut imports = Vec::new();

        // Field path -> where it was first set
        let mut seen: HashMap<String, MergeConflictLocation> = HashMap::new();

        for config in configs {
            imports.extend(config.imports.clone());

            let source = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig {
                    file_path: source.file_path.clone(),
                }));
            }

            let mut merger = Merger {
                source: &source,
                seen: &mut seen,
                diagnostics: &mut diagnostics,
            };

            if let Some(logging) = config.logging {
                let target = result.logging.get_or_insert_with(Default::default);
                merger.field(&mut target.level, logging.level, "logging.level".to_string());

                for (key, level) in logging.overrides.unwrap_or_default() {
                    let mut slot = None;
                    merger.field(&mut slot, Some(level), format!("logging.overrides.{}", key));
                    if let Some(level) = slot {
                        target
                            .overrides
                            .get_or_insert_with(HashMap::new)
                            .insert(key, level);
                    }
                }
            }

            if let Some(api) = config.api {
                let target = result.api.get_or_insert_with(Default::default);
                merger.field(&mut target.listen, api.listen, "api.listen".to_string());
                merger.field(&mut target.port, api.port, "api.port".to_string());
            }

            if let Some(http) = config.http {
                let target = result.http.get_or_insert_with(Default::default);
                merger.field(&mut target.timeout_secs, http.timeout_secs, "http.timeout_secs".to_string());
                merger.field(&mut target.user_agent, http.user_agent, "http.user_agent".to_string());
            }

            for (id, provider) in config.providers.unwrap_or_default() {
                let target = result
                    .providers
                    .get_or_insert_with(HashMap::new)
                    .entry(id.clone())
                    .or_default();
                let prefix = format!("providers.{}", id);

                merger.field(&mut target.enabled, provider.enabled, format!("{}.enabled", prefix));
                merger.field(
                    &mut target.interval_minutes,
                    provider.interval_minutes,
                    format!("{}.interval_minutes", prefix),
                );
                merger.field(
                    &mut target.timeout_secs,
                    provider.timeout_secs,
                    format!("{}.timeout_secs", prefix),
                );

                // Field values carry no span; point at the table header instead
                let header = format!("[{}]", prefix);
                let span = source
                    .content
                    .find(&header)
                    .map(|start| start..(start + header.len()))
                    .unwrap_or(0..0);

                for (key, value) in provider.fields {
                    let field_path = format!("{}.{}", prefix, key);
                    if merger.claim(field_path, span.clone()) {
                        target.fields.insert(key, value);
                    }
                }
            }
        }

        result.imports = imports;

        (result, diagnostics)
    }
}

/// First-wins bookkeeping for one source file.
struct Merger<'a> {
    source: &'a SourceInfo,
    seen: &'a mut HashMap<String, MergeConflictLocation>,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl Merger<'_> {
    /// Record that `field_path` is set at `span`.
    ///
    /// Returns false, and reports a conflict, if an earlier file already set it.
    fn claim(&mut self, field_path: String, span: std::ops::Range<usize>) -> bool {
        let location = MergeConflictLocation {
            file_path: self.source.file_path.clone(),
            span,
            content: self.source.content.clone(),
        };

        match self.seen.get(&field_path) {
            Some(previous) => {
                self.diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                    message: format!("'{}' is defined in multiple config files", field_path),
                    conflicts: vec![previous.clone(), location],
                    field_path,
                })));
                false
            }
            None => {
                self.seen.insert(field_path, location);
                true
            }
        }
    }

    fn field<T>(
        &mut self,
        target: &mut Option<Spanned<T>>,
        incoming: Option<Spanned<T>>,
        field_path: String,
    ) {
        let Some(value) = incoming else {
            return;
        };

        if self.claim(field_path, value.span()) {
            *target = Some(value);
        }
    }
}
