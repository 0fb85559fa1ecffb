//! Validation of container, queue and table names

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::DomainError;

static CONTAINER_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());

static TABLE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{2,62}$").unwrap());

fn is_container_style(name: &str) -> bool {
    (3..=63).contains(&name.len()) && CONTAINER_NAME_PATTERN.is_match(name)
}

/// Validates a blob container name: 3-63 lowercase letters, digits or single hyphens
pub fn validate_container_name(name: &str) -> Result<(), DomainError> {
    if is_container_style(name) {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "Invalid container name '{}'",
            name
        )))
    }
}

/// Queue names follow the container naming rules
pub fn validate_queue_name(name: &str) -> Result<(), DomainError> {
    if is_container_style(name) {
        Ok(())
    } else {
        Err(DomainError::validation(format!("Invalid queue name '{}'", name)))
    }
}

/// Validates a table name: 3-63 alphanumerics starting with a letter
pub fn validate_table_name(name: &str) -> Result<(), DomainError> {
    if TABLE_NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(DomainError::validation(format!("Invalid table name '{}'", name)))
    }
}

/// Validates a blob name: 1-1024 characters, no control characters
pub fn validate_blob_name(name: &str) -> Result<(), DomainError> {
    if name.is_empty() || name.len() > 1024 || name.chars().any(char::is_control) {
        return Err(DomainError::validation(format!(
            "Invalid blob name '{}'",
            name.escape_debug()
        )));
    }
    Ok(())
}
