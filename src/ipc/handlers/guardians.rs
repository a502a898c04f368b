use crate::ipc::helpers::{
    db_err, get_required_str, get_required_text, resolve_caller, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::report;
use crate::scope;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;

use super::attendance::{month_records_json, records_in_month, summary_json};

fn caller_role(conn: &Connection, account_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT role FROM accounts WHERE id = ?",
        [account_id],
        |r| r.get(0),
    )
    .map_err(|e| db_err("db_query_failed", e))
}

fn guardian_scope(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, Vec<String>), HandlerErr> {
    let (account_id, tenant_id) = resolve_caller(conn, params)?;
    if caller_role(conn, &account_id)? != "parent" {
        return Err(HandlerErr::validation("account is not a parent account"));
    }
    let students = scope::resolve_guardian_scope(conn, &account_id, &tenant_id)
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok((tenant_id, students))
}

fn guardians_link(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (account_id, tenant_id) = resolve_caller(conn, params)?;
    if caller_role(conn, &account_id)? != "parent" {
        return Err(HandlerErr::validation("account is not a parent account"));
    }
    let student_id = get_required_str(params, "studentId")?;

    let student_tenant: Option<String> = conn
        .query_row(
            "SELECT school_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;
    let Some(student_tenant) = student_tenant else {
        return Err(HandlerErr::not_found("student not found"));
    };
    // A cross-school link is an explicit validation failure, not a
    // silent drop.
    if student_tenant != tenant_id {
        return Err(HandlerErr::validation(
            "student belongs to a different school",
        ));
    }

    // Linking twice is a no-op.
    conn.execute(
        "INSERT OR IGNORE INTO guardian_links(parent_account_id, student_id) VALUES(?, ?)",
        (&account_id, &student_id),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn guardians_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_tenant_id, student_ids) = guardian_scope(conn, params)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name, reg_no, assigned_class, assigned_section
             FROM students WHERE id = ?",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let mut students = Vec::with_capacity(student_ids.len());
    for student_id in &student_ids {
        let row = stmt
            .query_row([student_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "firstName": r.get::<_, String>(1)?,
                    "lastName": r.get::<_, String>(2)?,
                    "regNo": r.get::<_, String>(3)?,
                    "className": r.get::<_, String>(4)?,
                    "section": r.get::<_, String>(5)?,
                }))
            })
            .map_err(|e| db_err("db_query_failed", e))?;
        students.push(row);
    }
    Ok(json!({ "students": students }))
}

fn guardians_attendance_by_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (tenant_id, student_ids) = guardian_scope(conn, params)?;
    let date_raw = get_required_text(params, "date")?;
    let date = report::parse_iso_date(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be a valid YYYY-MM-DD date"))?
        .format("%Y-%m-%d")
        .to_string();
    let scope_set: HashSet<&str> = student_ids.iter().map(|s| s.as_str()).collect();

    let mut stmt = conn
        .prepare(
            "SELECT subject_id, date, is_present FROM attendance_records
             WHERE school_id = ? AND subject_kind = 'student' AND date = ?
             ORDER BY subject_id",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let records: Vec<(String, String, bool)> = stmt
        .query_map([&tenant_id, &date], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?
        .into_iter()
        .filter(|(subject_id, _, _)| scope_set.contains(subject_id.as_str()))
        .collect();

    let (rows, summary) = month_records_json(&records, "studentId");
    Ok(json!({
        "date": date,
        "records": rows,
        "summary": summary_json(&summary)
    }))
}

fn guardians_attendance_by_month(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (tenant_id, student_ids) = guardian_scope(conn, params)?;
    let month_key = get_required_text(params, "month")?;
    let (year, month) = report::parse_month_key(&month_key)
        .ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM"))?;
    let bounds = report::month_bounds(year, month)
        .ok_or_else(|| HandlerErr::bad_params("month out of range"))?;
    let scope_set: HashSet<&str> = student_ids.iter().map(|s| s.as_str()).collect();

    let records: Vec<(String, String, bool)> =
        records_in_month(conn, &tenant_id, "student", &bounds)?
            .into_iter()
            .filter(|(subject_id, _, _)| scope_set.contains(subject_id.as_str()))
            .collect();

    let (rows, summary) = month_records_json(&records, "studentId");
    Ok(json!({
        "records": rows,
        "summary": summary_json(&summary)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "guardians.link" => Some(with_db(state, req, guardians_link)),
        "guardians.students" => Some(with_db(state, req, guardians_students)),
        "guardians.attendanceByDate" => Some(with_db(state, req, guardians_attendance_by_date)),
        "guardians.attendanceByMonth" => Some(with_db(state, req, guardians_attendance_by_month)),
        _ => None,
    }
}
