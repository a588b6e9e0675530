use std::ops::Range;
use std::path::PathBuf;

use thiserror::Error;

/// The file a diagnostic points into
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

/// A warning or an error found while loading config
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Problems that don't stop the config from loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig { file_path: PathBuf },
    UnknownProvider { provider: String },
}

/// Problems that stop the config from loading
#[derive(Debug, Clone)]
pub enum Error {
    Merge(MergeError),
    Validation(ValidationError),
}

/// The same setting defined in more than one file
#[derive(Debug, Clone)]
pub struct MergeError {
    pub field_path: String,
    pub message: String,
    pub conflicts: Vec<MergeConflictLocation>,
}

#[derive(Debug, Clone)]
pub struct MergeConflictLocation {
    pub file_path: PathBuf,
    pub span: Range<usize>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
}

/// A config file could not be read or parsed
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {error}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("Import cycle detected at '{}': involves {} file(s)", .path.display(), .cycle.len())]
    ImportCycle { path: PathBuf, cycle: Vec<PathBuf> },
}

/// Why a configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Every diagnostic, warnings included, so they can be reported together.
    #[error("{}", format_diagnostics(.0))]
    Invalid(Vec<Diagnostic>),
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }

    pub(super) fn validation(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Diagnostic::Error(Error::Validation(ValidationError {
            field_path: field_path.into(),
            message: message.into(),
        }))
    }
}

/// Format all diagnostics for display using Ariadne
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    use ariadne::Color;
    use ariadne::Label;
    use ariadne::Report;
    use ariadne::ReportKind;
    use ariadne::Source;

    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(Warning::EmptyConfig { file_path }) => {
                let msg = format!(
                    "Warning: Config file '{}' is empty and has no effect\n",
                    file_path.display()
                );
                output.extend_from_slice(msg.as_bytes());
            }
            Diagnostic::Warning(Warning::UnknownProvider { provider }) => {
                let msg = format!(
                    "Warning: Unknown provider '{}' in [providers] is ignored\n",
                    provider
                );
                output.extend_from_slice(msg.as_bytes());
            }
            Diagnostic::Error(Error::Merge(merge_error)) => {
                let Some(first) = merge_error.conflicts.first() else {
                    continue;
                };

                let mut report = Report::build(
                    ReportKind::Error,
                    (first.file_path.to_string_lossy().to_string(), first.span.clone()),
                )
                .with_message(format!("Merge conflict in field '{}'", merge_error.field_path))
                .with_note(&merge_error.message);

                for (idx, conflict) in merge_error.conflicts.iter().enumerate() {
                    let (label_msg, color) = if idx == 0 {
                        ("first definition here", Color::Red)
                    } else {
                        ("conflicts with this definition", Color::Yellow)
                    };

                    report = report.with_label(
                        Label::new((
                            conflict.file_path.to_string_lossy().to_string(),
                            conflict.span.clone(),
                        ))
                        .with_message(label_msg)
                        .with_color(color),
                    );
                }

                let finished = report.finish();

                let mut written = std::collections::HashSet::new();
                for conflict in &merge_error.conflicts {
                    let file_id = conflict.file_path.to_string_lossy().to_string();
                    if written.insert(file_id.clone()) {
                        let source = Source::from(&conflict.content);
                        finished.write((file_id, source), &mut output).ok();
                    }
                }
            }
            Diagnostic::Error(Error::Validation(validation_error)) => {
                let msg = format!(
                    "Validation error in '{}': {}\n",
                    validation_error.field_path, validation_error.message
                );
                output.extend_from_slice(msg.as_bytes());
            }
        }
    }

    String::from_utf8_lossy(&output).to_string()
}
