//! Resource Name Validation
//!
//! Containers and queues: 3-63 chars of lowercase letters, digits and single
//! dashes, not starting or ending with a dash.
//! Tables: 3-63 alphanumeric chars, starting with a letter.
//! Table keys: non-empty, shorter than 512 chars, none of `\ / # ?`.
//!
//! Manual single-pass checks, no regex.

use crate::error::JobHostError;

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 63;
const MAX_KEY_LEN: usize = 512;

/// True if the name still carries a `{token}` to substitute
pub fn has_tokens(name: &str) -> bool {
    name.contains('{')
}

/// Shared rule for container and queue names; returns the failure reason
fn dashed_name_error(name: &str) -> Option<&'static str> {
    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Some("must be 3-63 characters long");
    }
    let bytes = name.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return Some("must not start or end with a dash");
    }
    let mut previous_dash = false;
    for &byte in bytes {
        if byte == b'-' {
            if previous_dash {
                return Some("must not contain consecutive dashes");
            }
            previous_dash = true;
        } else if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
            previous_dash = false;
        } else {
            return Some("may only contain lowercase letters, digits and dashes");
        }
    }
    None
}

pub fn validate_container_name(name: &str) -> Result<(), JobHostError> {
    match dashed_name_error(name) {
        Some(reason) => Err(JobHostError::InvalidBlobPath {
            path: name.to_string(),
            reason: format!("container name {}", reason),
        }),
        None => Ok(()),
    }
}

pub fn validate_queue_name(name: &str) -> Result<(), JobHostError> {
    match dashed_name_error(name) {
        Some(reason) => Err(JobHostError::InvalidQueueName {
            name: name.to_string(),
            reason: reason.into(),
        }),
        None => Ok(()),
    }
}

pub fn validate_table_name(name: &str) -> Result<(), JobHostError> {
    let reason = if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        Some("must be 3-63 characters long")
    } else if !name.as_bytes()[0].is_ascii_alphabetic() {
        Some("must start with a letter")
    } else if !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Some("may only contain letters and digits")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(JobHostError::InvalidTableName {
            name: name.to_string(),
            reason: reason.into(),
        }),
        None => Ok(()),
    }
}

/// Partition and row keys
pub fn validate_table_key(key: &str) -> Result<(), JobHostError> {
    let reason = if key.is_empty() {
        Some("cannot be empty")
    } else if key.len() >= MAX_KEY_LEN {
        Some("must be shorter than 512 characters")
    } else if key.contains(['\\', '/', '#', '?']) {
        Some("must not contain \\ / # or ?")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(JobHostError::InvalidTableKey {
            key: key.to_string(),
            reason: reason.into(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ═══════════════════════════════════════════════════════════════
    // Queue and container names
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn valid_queue_names() {
        assert!(validate_queue_name("orders").is_ok());
        assert!(validate_queue_name("abc").is_ok());
        assert!(validate_queue_name("order-events-2").is_ok());
        assert!(validate_queue_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn reject_queue_length() {
        let err = validate_queue_name("ab").unwrap_err();
        assert!(err.to_string().contains("JOB-011"));
        assert!(validate_queue_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn reject_queue_dashes() {
        assert!(validate_queue_name("-orders").is_err());
        assert!(validate_queue_name("orders-").is_err());
        let err = validate_queue_name("order--events").unwrap_err();
        assert!(err.to_string().contains("consecutive"));
    }

    #[test]
    fn reject_queue_characters() {
        assert!(validate_queue_name("Orders").is_err());
        assert!(validate_queue_name("order_events").is_err());
        assert!(validate_queue_name("order.events").is_err());
    }

    #[test]
    fn container_uses_blob_path_error() {
        let err = validate_container_name("Input").unwrap_err();
        assert!(err.to_string().contains("JOB-010"));
        assert!(validate_container_name("input-data").is_ok());
    }

    // ═══════════════════════════════════════════════════════════════
    // Table names and keys
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn valid_table_names() {
        assert!(validate_table_name("People").is_ok());
        assert!(validate_table_name("logs2024").is_ok());
    }

    #[test]
    fn reject_table_names() {
        assert!(validate_table_name("2024logs").is_err());
        assert!(validate_table_name("my-table").is_err());
        let err = validate_table_name("ab").unwrap_err();
        assert!(err.to_string().contains("JOB-012"));
    }

    #[test]
    fn table_keys() {
        assert!(validate_table_key("partition 1").is_ok());
        assert!(validate_table_key("").is_err());
        assert!(validate_table_key("a/b").is_err());
        assert!(validate_table_key("a#b").is_err());
        assert!(validate_table_key("a?b").is_err());
        assert!(validate_table_key("a\\b").is_err());
        assert!(validate_table_key(&"k".repeat(511)).is_ok());
        let err = validate_table_key(&"k".repeat(512)).unwrap_err();
        assert!(err.to_string().contains("JOB-013"));
    }

    #[test]
    fn token_detection() {
        assert!(has_tokens("{queue}-out"));
        assert!(!has_tokens("plain"));
    }
}
