use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

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

    pub fn validation(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "validation_failed",
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
}

/// Maps a storage error onto the wire code family. Lock contention is
/// surfaced as `conflict` so the caller can decide to retry; the core
/// never retries on its own.
pub fn db_err(code: &'static str, e: rusqlite::Error) -> HandlerErr {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if matches!(
            f.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return HandlerErr {
                code: "conflict",
                message: e.to_string(),
                details: None,
            };
        }
    }
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Required and non-empty after trimming.
pub fn get_required_text(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = get_required_str(params, key)?;
    let t = v.trim().to_string();
    if t.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(t)
}

/// Absent and null both read as None; present values must be strings.
pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr::bad_params(format!(
            "{} must be a string or null",
            key
        )));
    };
    Ok(Some(s.to_string()))
}

/// Runs a handler against the selected workspace DB and wraps its
/// outcome in the response envelope.
pub fn with_db(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

/// Entry point of every scoped operation: the verified caller account
/// id resolves to its tenant before any other predicate runs. An
/// unknown account is not-found, never an empty scope.
pub fn resolve_caller(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, String), HandlerErr> {
    let account_id = get_required_str(params, "accountId")?;
    match crate::scope::resolve_tenant(conn, &account_id) {
        Ok(Some(tenant_id)) => Ok((account_id, tenant_id)),
        Ok(None) => Err(HandlerErr::not_found("account not found")),
        Err(e) => Err(db_err("db_query_failed", e)),
    }
}
