//! The `validate` command: check configuration and seed files without
//! starting the server.

use std::path::Path;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{AppConfig, SeedData, validate_config, validate_seed};
use crate::error::{ConfigError, LineAuditError, Severity, ValidationIssue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Config,
    Seed,
}

impl FileKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Seed => "seed",
        }
    }
}

/// A YAML file is a seed file if it deserializes as `SeedData`, otherwise a
/// config file. `deny_unknown_fields` on both schemas keeps the detection
/// unambiguous for non-empty files.
fn inspect(path: &Path) -> Result<(FileKind, Vec<ValidationIssue>), ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    match serde_yaml::from_str::<AppConfig>(&raw) {
        Ok(config) => Ok((FileKind::Config, validate_config(&config))),
        Err(config_err) => match serde_yaml::from_str::<SeedData>(&raw) {
            Ok(seed) => Ok((FileKind::Seed, validate_seed(&seed))),
            Err(_) => Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                message: config_err.to_string(),
            }),
        },
    }
}

/// Validates each file and reports the issues found.
///
/// # Errors
///
/// [`LineAuditError::Config`] when any file fails to parse or has errors
/// (or warnings, under `--strict`).
pub fn run(args: &ValidateArgs) -> Result<(), LineAuditError> {
    let mut first_failure: Option<ConfigError> = None;

    for path in &args.files {
        match inspect(path) {
            Ok((kind, mut issues)) => {
                if args.strict {
                    for issue in &mut issues {
                        issue.severity = Severity::Error;
                    }
                }
                let failed = issues.iter().any(|i| i.severity == Severity::Error);
                report(args.format, path, kind, &issues);
                if failed && first_failure.is_none() {
                    first_failure = Some(ConfigError::ValidationError {
                        path: path.display().to_string(),
                        errors: issues,
                    });
                }
            }
            Err(err) => {
                match args.format {
                    OutputFormat::Human => eprintln!("{}: {err}", path.display()),
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::json!({
                            "file": path.display().to_string(),
                            "error": err.to_string(),
                        })
                    ),
                }
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
    }

    first_failure.map_or(Ok(()), |err| Err(err.into()))
}

fn report(format: OutputFormat, path: &Path, kind: FileKind, issues: &[ValidationIssue]) {
    match format {
        OutputFormat::Human => {
            if issues.is_empty() {
                println!("{}: ok ({})", path.display(), kind.as_str());
            } else {
                println!("{}: {} issue(s) ({})", path.display(), issues.len(), kind.as_str());
                for issue in issues {
                    println!("  {issue}");
                }
            }
        }
        OutputFormat::Json => {
            let issues: Vec<_> = issues
                .iter()
                .map(|i| {
                    serde_json::json!({
                        "path": i.path,
                        "message": i.message,
                        "severity": match i.severity {
                            Severity::Error => "error",
                            Severity::Warning => "warning",
                        },
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "file": path.display().to_string(),
                    "kind": kind.as_str(),
                    "issues": issues,
                })
            );
        }
    }
}
