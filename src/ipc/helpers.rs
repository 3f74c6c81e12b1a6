use rusqlite::ErrorCode;
use serde_json::json;

use crate::ipc::error::err;

/// Structured handler failure, rendered into the error envelope with the
/// request id at the edge.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "conflict",
            message: message.into(),
            details: None,
        }
    }

    pub fn db_query(e: rusqlite::Error) -> Self {
        log::error!("event=db_query_failed error={}", e);
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_update(e: rusqlite::Error, table: &str) -> Self {
        log::error!("event=db_update_failed table={} error={}", table, e);
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn db_insert(e: rusqlite::Error, table: &str) -> Self {
        log::error!("event=db_insert_failed table={} error={}", table, e);
        HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn db_tx(e: rusqlite::Error) -> Self {
        log::error!("event=db_tx_failed error={}", e);
        HandlerErr {
            code: "db_tx_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_optional_bool(params: &serde_json::Value, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// True when an insert/update bounced off a UNIQUE index; callers map
/// that onto their own conflict semantics.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == ErrorCode::ConstraintViolation
    )
}
