//! Configuration loading pipeline: read with a size cap, parse YAML,
//! deserialize to the typed schema, then validate. Validation reports every
//! issue in one pass instead of failing on the first.

use std::net::SocketAddr;
use std::path::Path;

use crate::error::{ConfigError, Severity, ValidationIssue};
use crate::model::is_valid_phone_number;

use super::schema::{AppConfig, SeedData};

/// Maximum configuration or seed file size in bytes.
pub const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

fn read_capped(path: &Path) -> Result<String, ConfigError> {
    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(ConfigError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: MAX_CONFIG_SIZE,
        });
    }
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, raw: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(raw).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn reject_on_errors(path: &Path, issues: Vec<ValidationIssue>) -> Result<(), ConfigError> {
    for issue in &issues {
        match issue.severity {
            Severity::Error => tracing::error!(%issue, "configuration issue"),
            Severity::Warning => tracing::warn!(%issue, "configuration issue"),
        }
    }
    if issues.iter().any(|i| i.severity == Severity::Error) {
        return Err(ConfigError::ValidationError {
            path: path.display().to_string(),
            errors: issues,
        });
    }
    Ok(())
}

/// Loads and validates the runtime configuration.
///
/// # Errors
///
/// [`ConfigError`] for unreadable, oversized, unparsable, or invalid files.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = read_capped(path)?;
    let config: AppConfig = parse(path, &raw)?;
    reject_on_errors(path, validate_config(&config))?;
    Ok(config)
}

/// Loads and validates seed data.
///
/// # Errors
///
/// [`ConfigError`] for unreadable, oversized, unparsable, or invalid files.
pub fn load_seed(path: &Path) -> Result<SeedData, ConfigError> {
    let raw = read_capped(path)?;
    let seed: SeedData = parse(path, &raw)?;
    reject_on_errors(path, validate_seed(&seed))?;
    Ok(seed)
}

/// Checks the runtime configuration, returning every issue found.
#[must_use]
pub fn validate_config(config: &AppConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let error = |path: &str, message: String| ValidationIssue {
        path: path.to_string(),
        message,
        severity: Severity::Error,
    };

    if config.server.bind.parse::<SocketAddr>().is_err() {
        issues.push(error(
            "server.bind",
            format!("'{}' is not a valid socket address", config.server.bind),
        ));
    }
    if config.server.max_body_bytes < 1024 {
        issues.push(error(
            "server.max_body_bytes",
            "must be at least 1024".to_string(),
        ));
    }
    if config.dispatch.workers == 0 {
        issues.push(error("dispatch.workers", "must be at least 1".to_string()));
    }
    if config.dispatch.max_duration_days == 0 {
        issues.push(error(
            "dispatch.max_duration_days",
            "must be at least 1".to_string(),
        ));
    }
    if config.dispatch.default_duration_days == 0
        || config.dispatch.default_duration_days > config.dispatch.max_duration_days
    {
        issues.push(error(
            "dispatch.default_duration_days",
            format!(
                "must be between 1 and max_duration_days ({})",
                config.dispatch.max_duration_days
            ),
        ));
    }
    if config.mail.base_url.is_empty() {
        issues.push(error("mail.base_url", "must not be empty".to_string()));
    } else if config.mail.base_url.ends_with('/') {
        issues.push(ValidationIssue {
            path: "mail.base_url".to_string(),
            message: "trailing slash will produce double slashes in links".to_string(),
            severity: Severity::Warning,
        });
    }
    issues
}

/// Checks seed data referential integrity and phone-number syntax.
#[must_use]
pub fn validate_seed(seed: &SeedData) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let departments: std::collections::HashSet<_> =
        seed.departments.iter().map(|d| &d.id).collect();
    let employees: std::collections::HashSet<_> = seed.employees.iter().map(|e| &e.id).collect();

    for (i, employee) in seed.employees.iter().enumerate() {
        if !departments.is_empty() && !departments.contains(&employee.department_id) {
            issues.push(ValidationIssue {
                path: format!("employees[{i}].department_id"),
                message: format!("department '{}' is not declared", employee.department_id),
                severity: Severity::Warning,
            });
        }
    }

    let mut numbers = std::collections::HashSet::new();
    for (i, phone) in seed.phones.iter().enumerate() {
        if !is_valid_phone_number(&phone.number) {
            issues.push(ValidationIssue {
                path: format!("phones[{i}].number"),
                message: format!("'{}' is not a plausible phone number", phone.number),
                severity: Severity::Error,
            });
        }
        if !numbers.insert(&phone.number) {
            issues.push(ValidationIssue {
                path: format!("phones[{i}].number"),
                message: format!("duplicate number '{}'", phone.number),
                severity: Severity::Error,
            });
        }
        if !employees.contains(&phone.registrant) {
            issues.push(ValidationIssue {
                path: format!("phones[{i}].registrant"),
                message: format!("employee '{}' is not declared", phone.registrant),
                severity: Severity::Error,
            });
        }
        if let Some(user) = &phone.current_user {
            if !employees.contains(user) {
                issues.push(ValidationIssue {
                    path: format!("phones[{i}].current_user"),
                    message: format!("employee '{user}' is not declared"),
                    severity: Severity::Error,
                });
            }
        }
        if phone.status == crate::model::PhoneStatus::InUse && phone.current_user.is_none() {
            issues.push(ValidationIssue {
                path: format!("phones[{i}].current_user"),
                message: "in_use phone has no current user".to_string(),
                severity: Severity::Warning,
            });
        }
    }
    issues
}
