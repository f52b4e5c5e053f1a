//! declarative request validation for api endpoints.
//!
//! handlers validate their inputs field by field, collecting every failure
//! into one `InvalidParams` response instead of stopping at the first.
//! unknown fields are ignored for forward compatibility.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use keywarden_types::{Guid, Pubkeys};

use super::error::{ApiError, FieldError};

/// maximum page size for list endpoints.
pub const MAX_LIMIT: u64 = 1000;

/// default page size for list endpoints.
pub const DEFAULT_LIMIT: u64 = 1000;

/// validate an rfc 4122 uuid field.
pub fn validate_uuid(field: &str, value: &str) -> Result<Uuid, FieldError> {
    value
        .parse()
        .map_err(|_| FieldError::invalid(field, format!("{} must be a uuid", field)))
}

/// validate a 32-hex-digit guid field.
pub fn validate_guid(field: &str, value: &str) -> Result<Guid, FieldError> {
    value
        .parse()
        .map_err(|_| FieldError::invalid(field, format!("{} must be 32 hex digits", field)))
}

/// validate an iso-8601 timestamp field.
pub fn validate_iso8601(field: &str, value: &str) -> Result<DateTime<Utc>, FieldError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            FieldError::invalid(field, format!("{} must be an iso-8601 timestamp", field))
        })
}

/// validate a pubkeys record: an object with at least a 9e entry, every
/// value a well-formed openssh public key line.
pub fn validate_pubkeys(field: &str, value: &serde_json::Value) -> Result<Pubkeys, FieldError> {
    let pubkeys: Pubkeys = serde_json::from_value(value.clone())
        .map_err(|_| FieldError::invalid(field, "pubkeys must be an object with a 9e key"))?;
    pubkeys
        .validate()
        .map_err(|e| FieldError::invalid(field, e.to_string()))?;
    Ok(pubkeys)
}

/// validate that every named field is on the whitelist.
pub fn validate_fields_array(
    field: &str,
    names: &[String],
    whitelist: &[&str],
) -> Result<(), FieldError> {
    for name in names {
        if !whitelist.iter().any(|w| w == name) {
            return Err(FieldError::invalid(
                field,
                format!("unknown field {:?}", name),
            ));
        }
    }
    Ok(())
}

/// validated offset/limit pair for list endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// rows to skip.
    pub offset: u64,
    /// rows to return, bounded by [`MAX_LIMIT`].
    pub limit: u64,
}

/// validate pagination query parameters.
pub fn validate_pagination(
    offset: Option<u64>,
    limit: Option<u64>,
) -> Result<Pagination, FieldError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(FieldError::invalid(
            "limit",
            format!("limit must be between 1 and {}", MAX_LIMIT),
        ));
    }
    Ok(Pagination {
        offset: offset.unwrap_or(0),
        limit,
    })
}

/// turn collected field errors into an invalid-params response, or pass.
pub fn finish(errors: Vec<FieldError>) -> Result<(), ApiError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::InvalidParams(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_types::test_utils::test_ssh_pubkey;
    use serde_json::json;

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("cn_uuid", "15966912-8fad-41cd-bd82-abe6468354b5").is_ok());
        assert!(validate_uuid("cn_uuid", "not-a-uuid").is_err());
    }

    #[test]
    fn test_validate_guid() {
        assert!(validate_guid("guid", "97496DD1C8F053DE7450CD854D9C95B4").is_ok());
        assert!(validate_guid("guid", "xyz").is_err());
    }

    #[test]
    fn test_validate_iso8601() {
        assert!(validate_iso8601("created", "2026-03-01T12:00:00Z").is_ok());
        assert!(validate_iso8601("created", "yesterday").is_err());
    }

    #[test]
    fn test_validate_pubkeys() {
        let good = json!({ "9e": test_ssh_pubkey() });
        assert!(validate_pubkeys("pubkeys", &good).is_ok());

        let no_9e = json!({ "9a": test_ssh_pubkey() });
        assert!(validate_pubkeys("pubkeys", &no_9e).is_err());

        let garbage = json!({ "9e": "not a key" });
        assert!(validate_pubkeys("pubkeys", &garbage).is_err());
    }

    #[test]
    fn test_validate_fields_array() {
        let whitelist = ["staged", "activated", "expired"];
        assert!(
            validate_fields_array("fields", &["staged".to_string()], &whitelist).is_ok()
        );
        assert!(
            validate_fields_array("fields", &["pin".to_string()], &whitelist).is_err()
        );
    }

    #[test]
    fn test_validate_pagination_bounds() {
        let p = validate_pagination(None, None).unwrap();
        assert_eq!(p.offset, 0);
        assert_eq!(p.limit, DEFAULT_LIMIT);

        assert!(validate_pagination(Some(10), Some(50)).is_ok());
        assert!(validate_pagination(None, Some(0)).is_err());
        assert!(validate_pagination(None, Some(MAX_LIMIT + 1)).is_err());
    }

    #[test]
    fn test_finish_collects_multiple_errors() {
        let errs = vec![
            FieldError::missing("guid"),
            FieldError::invalid("cn_uuid", "cn_uuid must be a uuid"),
        ];
        match finish(errs) {
            Err(ApiError::InvalidParams(errs)) => assert_eq!(errs.len(), 2),
            _ => panic!("expected invalid-params"),
        }
    }
}
