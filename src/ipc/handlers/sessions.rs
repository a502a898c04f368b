use crate::ipc::helpers::{
    db_err, get_required_str, get_required_text, resolve_caller, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::report;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, session_name, start_date, end_date, is_active, created_at";

fn row_to_session(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "sessionName": r.get::<_, String>(1)?,
        "startDate": r.get::<_, String>(2)?,
        "endDate": r.get::<_, String>(3)?,
        "isActive": r.get::<_, i64>(4)? != 0,
        "createdAt": r.get::<_, String>(5)?,
    }))
}

/// Dates arrive as text; they are parsed, ordered, and re-emitted in
/// canonical form so the range predicate on stored text stays sound.
fn parse_date_range(params: &serde_json::Value) -> Result<(String, String), HandlerErr> {
    let start_raw = get_required_text(params, "startDate")?;
    let end_raw = get_required_text(params, "endDate")?;
    let start = report::parse_iso_date(&start_raw)
        .ok_or_else(|| HandlerErr::validation("startDate must be a valid YYYY-MM-DD date"))?;
    let end = report::parse_iso_date(&end_raw)
        .ok_or_else(|| HandlerErr::validation("endDate must be a valid YYYY-MM-DD date"))?;
    if start >= end {
        return Err(HandlerErr::validation("startDate must be before endDate"));
    }
    Ok((
        start.format("%Y-%m-%d").to_string(),
        end.format("%Y-%m-%d").to_string(),
    ))
}

fn sessions_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (account_id, tenant_id) = resolve_caller(conn, params)?;
    let name = get_required_text(params, "sessionName")?;
    let (start_date, end_date) = parse_date_range(params)?;

    let session_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();

    // Deactivation and insertion must land together: a new session for
    // this tenant displaces the previous active one, and only this
    // tenant's. Concurrent creates serialize on the write transaction.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute(
        "UPDATE sessions SET is_active = 0 WHERE school_id = ?",
        [&tenant_id],
    )
    .map_err(|e| db_err("db_update_failed", e))?;
    tx.execute(
        "INSERT INTO sessions(id, school_id, account_id, session_name, start_date, end_date, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &session_id,
            &tenant_id,
            &account_id,
            &name,
            &start_date,
            &end_date,
            &created_at,
        ),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({
        "session": {
            "id": session_id,
            "sessionName": name,
            "startDate": start_date,
            "endDate": end_date,
            "isActive": true,
            "createdAt": created_at
        }
    }))
}

fn sessions_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE school_id = ?
             ORDER BY created_at DESC, rowid DESC"
        ))
        .map_err(|e| db_err("db_query_failed", e))?;
    let sessions = stmt
        .query_map([&tenant_id], row_to_session)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "sessions": sessions }))
}

fn sessions_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let name = get_required_text(params, "sessionName")?;
    let (start_date, end_date) = parse_date_range(params)?;

    // Edits never touch is_active; activity only moves via create.
    let changed = conn
        .execute(
            "UPDATE sessions SET session_name = ?, start_date = ?, end_date = ?
             WHERE id = ? AND school_id = ?",
            (&name, &start_date, &end_date, &session_id, &tenant_id),
        )
        .map_err(|e| db_err("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("session not found"));
    }

    let session = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"),
            [&session_id],
            row_to_session,
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "session": session }))
}

fn sessions_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let session_id = get_required_str(params, "sessionId")?;
    let deleted = conn
        .execute(
            "DELETE FROM sessions WHERE id = ? AND school_id = ?",
            (&session_id, &tenant_id),
        )
        .map_err(|e| db_err("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("session not found"));
    }
    Ok(json!({ "ok": true }))
}

fn sessions_active(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let session = conn
        .query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE school_id = ? AND is_active = 1"
            ),
            [&tenant_id],
            row_to_session,
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "session": session }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.create" => Some(with_db(state, req, sessions_create)),
        "sessions.list" => Some(with_db(state, req, sessions_list)),
        "sessions.update" => Some(with_db(state, req, sessions_update)),
        "sessions.delete" => Some(with_db(state, req, sessions_delete)),
        "sessions.active" => Some(with_db(state, req, sessions_active)),
        _ => None,
    }
}
