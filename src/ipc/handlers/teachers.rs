use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_str, get_required_text, resolve_caller, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn teacher_exists(conn: &Connection, tenant_id: &str, teacher_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM teachers WHERE id = ? AND school_id = ?",
        [teacher_id, tenant_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| db_err("db_query_failed", e))
}

fn teachers_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (account_id, tenant_id) = resolve_caller(conn, params)?;
    let first_name = get_required_text(params, "firstName")?;
    let last_name = get_required_text(params, "lastName")?;
    let phone = get_optional_str(params, "phone")?;

    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, school_id, account_id, first_name, last_name, phone)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &tenant_id,
            &account_id,
            &first_name,
            &last_name,
            &phone,
        ),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;

    Ok(json!({
        "teacher": {
            "id": teacher_id,
            "firstName": first_name,
            "lastName": last_name,
            "phone": phone
        }
    }))
}

fn teachers_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;

    let mut assignments: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT ta.teacher_id, ta.class_name, ta.section, ta.subject
             FROM teaching_assignments ta
             JOIN teachers t ON t.id = ta.teacher_id
             WHERE t.school_id = ?
             ORDER BY ta.class_name, ta.section, ta.subject",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([&tenant_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                json!({
                    "className": r.get::<_, String>(1)?,
                    "section": r.get::<_, String>(2)?,
                    "subject": r.get::<_, String>(3)?,
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    for (teacher_id, assignment) in rows {
        assignments.entry(teacher_id).or_default().push(assignment);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name, phone FROM teachers
             WHERE school_id = ?
             ORDER BY last_name, first_name, id",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let teachers = stmt
        .query_map([&tenant_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    let teachers_json: Vec<serde_json::Value> = teachers
        .into_iter()
        .map(|(id, first_name, last_name, phone)| {
            let assigned = assignments.remove(&id).unwrap_or_default();
            json!({
                "id": id,
                "firstName": first_name,
                "lastName": last_name,
                "phone": phone,
                "assignments": assigned
            })
        })
        .collect();
    Ok(json!({ "teachers": teachers_json }))
}

fn teachers_assign(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_name = get_required_text(params, "className")?;
    let section = get_required_text(params, "section")?;
    let subject = get_required_text(params, "subject")?;

    if !teacher_exists(conn, &tenant_id, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    // Re-assigning the same tuple is a no-op.
    conn.execute(
        "INSERT OR IGNORE INTO teaching_assignments(teacher_id, class_name, section, subject)
         VALUES(?, ?, ?, ?)",
        (&teacher_id, &class_name, &section, &subject),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn teachers_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let teacher_id = get_required_str(params, "teacherId")?;
    if !teacher_exists(conn, &tenant_id, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM teaching_assignments WHERE teacher_id = ?",
        [&teacher_id],
    )
    .map_err(|e| db_err("db_delete_failed", e))?;
    tx.execute(
        "UPDATE classes SET teacher_id = NULL WHERE teacher_id = ? AND school_id = ?",
        (&teacher_id, &tenant_id),
    )
    .map_err(|e| db_err("db_update_failed", e))?;
    tx.execute(
        "DELETE FROM teachers WHERE id = ? AND school_id = ?",
        (&teacher_id, &tenant_id),
    )
    .map_err(|e| db_err("db_delete_failed", e))?;
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.register" => Some(with_db(state, req, teachers_register)),
        "teachers.list" => Some(with_db(state, req, teachers_list)),
        "teachers.assign" => Some(with_db(state, req, teachers_assign)),
        "teachers.delete" => Some(with_db(state, req, teachers_delete)),
        _ => None,
    }
}
