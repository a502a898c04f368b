use crate::ipc::helpers::{
    db_err, get_required_str, get_required_text, resolve_caller, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::report;
use crate::scope::normalize;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct RosterMember {
    id: String,
    display_name: String,
}

pub(crate) fn summary_json(s: &report::AttendanceSummary) -> serde_json::Value {
    json!({
        "presentCount": s.present_count,
        "absentCount": s.absent_count,
        "recordedCount": s.recorded_count
    })
}

fn class_name_for(
    conn: &Connection,
    tenant_id: &str,
    class_id: &str,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT class_name FROM classes WHERE id = ? AND school_id = ?",
        [class_id, tenant_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| db_err("db_query_failed", e))
}

/// Enrollment for a logical class: the free-text assignment fields are
/// matched in normalized form, so "10 / A" and " 10 / a " are the same
/// roster.
fn student_roster(
    conn: &Connection,
    tenant_id: &str,
    class_name: &str,
    section: &str,
) -> Result<Vec<RosterMember>, HandlerErr> {
    let want_class = normalize(class_name);
    let want_section = normalize(section);
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, assigned_class, assigned_section
             FROM students
             WHERE school_id = ?
             ORDER BY last_name, first_name, id",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([tenant_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    Ok(rows
        .into_iter()
        .filter(|(_, _, _, class, section)| {
            normalize(class) == want_class && normalize(section) == want_section
        })
        .map(|(id, last, first, _, _)| RosterMember {
            id,
            display_name: format!("{}, {}", last, first),
        })
        .collect())
}

fn teacher_roster(conn: &Connection, tenant_id: &str) -> Result<Vec<RosterMember>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name FROM teachers
             WHERE school_id = ?
             ORDER BY last_name, first_name, id",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    stmt.query_map([tenant_id], |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        Ok(RosterMember {
            id: r.get(0)?,
            display_name: format!("{}, {}", last, first),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| db_err("db_query_failed", e))
}

/// The submission date must parse and must not lie after today.
/// Back-dated entries are allowed.
fn parse_record_date(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let raw = get_required_text(params, "date")?;
    let date = report::parse_iso_date(&raw)
        .ok_or_else(|| HandlerErr::validation("date must be a valid YYYY-MM-DD date"))?;
    let today = chrono::Local::now().date_naive();
    if date > today {
        return Err(HandlerErr::validation(
            "attendance date must not be in the future",
        ));
    }
    Ok(date.format("%Y-%m-%d").to_string())
}

fn parse_entries(
    params: &serde_json::Value,
    subject_key: &str,
) -> Result<Vec<(String, bool)>, HandlerErr> {
    let Some(raw) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };
    if raw.is_empty() {
        return Err(HandlerErr::validation("entries must not be empty"));
    }
    let mut entries = Vec::with_capacity(raw.len());
    for entry in raw {
        let subject_id = entry
            .get(subject_key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params(format!("entry missing {}", subject_key)))?;
        let is_present = entry
            .get("isPresent")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| HandlerErr::bad_params("entry missing isPresent"))?;
        entries.push((subject_id.to_string(), is_present));
    }
    Ok(entries)
}

fn upsert_record(
    tx: &rusqlite::Transaction<'_>,
    tenant_id: &str,
    subject_kind: &str,
    subject_id: &str,
    date: &str,
    is_present: bool,
    class_id: Option<&str>,
    section: Option<&str>,
) -> Result<(), HandlerErr> {
    // Single conditional statement keyed by (kind, subject, date); a
    // concurrent submission for the same day lands on the same row.
    tx.execute(
        "INSERT INTO attendance_records(id, school_id, subject_kind, subject_id, date,
                                        is_present, class_id, section)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(subject_kind, subject_id, date) DO UPDATE SET
           is_present = excluded.is_present,
           class_id = excluded.class_id,
           section = excluded.section",
        (
            Uuid::new_v4().to_string(),
            tenant_id,
            subject_kind,
            subject_id,
            date,
            is_present as i64,
            class_id,
            section,
        ),
    )
    .map_err(|e| db_err("db_update_failed", e))?;
    Ok(())
}

fn attendance_record_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let class_id = get_required_str(params, "classId")?;
    let section = get_required_text(params, "section")?;
    let date = parse_record_date(params)?;
    let entries = parse_entries(params, "studentId")?;

    let class_name = class_name_for(conn, &tenant_id, &class_id)?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;
    let roster: HashSet<String> = student_roster(conn, &tenant_id, &class_name, &section)?
        .into_iter()
        .map(|m| m.id)
        .collect();

    // Whole-batch validation before anything is written: one bad entry
    // rejects the submission with zero rows changed.
    for (student_id, _) in &entries {
        if !roster.contains(student_id) {
            return Err(HandlerErr {
                code: "validation_failed",
                message: "student is not enrolled in this class/section".to_string(),
                details: Some(json!({ "studentId": student_id })),
            });
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    for (student_id, is_present) in &entries {
        upsert_record(
            &tx,
            &tenant_id,
            "student",
            student_id,
            &date,
            *is_present,
            Some(&class_id),
            Some(&section),
        )?;
    }
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({ "ok": true, "recorded": entries.len() }))
}

fn attendance_record_teachers(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let date = parse_record_date(params)?;
    let entries = parse_entries(params, "teacherId")?;

    let roster: HashSet<String> = teacher_roster(conn, &tenant_id)?
        .into_iter()
        .map(|m| m.id)
        .collect();
    for (teacher_id, _) in &entries {
        if !roster.contains(teacher_id) {
            return Err(HandlerErr {
                code: "validation_failed",
                message: "teacher does not belong to this school".to_string(),
                details: Some(json!({ "teacherId": teacher_id })),
            });
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    for (teacher_id, is_present) in &entries {
        upsert_record(&tx, &tenant_id, "teacher", teacher_id, &date, *is_present, None, None)?;
    }
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({ "ok": true, "recorded": entries.len() }))
}

/// Presence marks for one date, keyed by subject id.
fn marks_by_date(
    conn: &Connection,
    tenant_id: &str,
    subject_kind: &str,
    date: &str,
) -> Result<HashMap<String, bool>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT subject_id, is_present FROM attendance_records
             WHERE school_id = ? AND subject_kind = ? AND date = ?",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([tenant_id, subject_kind, date], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(rows.into_iter().collect())
}

/// One row per roster member; a member without a ledger row for the
/// date carries `isPresent: null` — never coerced to absent.
fn roster_with_marks(
    roster: &[RosterMember],
    marks: &HashMap<String, bool>,
    subject_key: &str,
) -> (Vec<serde_json::Value>, report::AttendanceSummary) {
    let rows: Vec<serde_json::Value> = roster
        .iter()
        .map(|m| {
            json!({
                subject_key: m.id,
                "displayName": m.display_name,
                "isPresent": marks.get(&m.id).copied(),
            })
        })
        .collect();
    let summary = report::summarize(roster.iter().filter_map(|m| marks.get(&m.id).copied()));
    (rows, summary)
}

fn attendance_students_by_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let class_id = get_required_str(params, "classId")?;
    let section = get_required_text(params, "section")?;
    let date_raw = get_required_text(params, "date")?;
    let date = report::parse_iso_date(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be a valid YYYY-MM-DD date"))?
        .format("%Y-%m-%d")
        .to_string();

    let class_name = class_name_for(conn, &tenant_id, &class_id)?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;
    let roster = student_roster(conn, &tenant_id, &class_name, &section)?;
    let marks = marks_by_date(conn, &tenant_id, "student", &date)?;
    let (rows, summary) = roster_with_marks(&roster, &marks, "studentId");

    Ok(json!({
        "date": date,
        "rows": rows,
        "summary": summary_json(&summary),
        "unrecordedCount": roster.len() as i64 - summary.recorded_count
    }))
}

fn attendance_teachers_by_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let date_raw = get_required_text(params, "date")?;
    let date = report::parse_iso_date(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be a valid YYYY-MM-DD date"))?
        .format("%Y-%m-%d")
        .to_string();

    let roster = teacher_roster(conn, &tenant_id)?;
    let marks = marks_by_date(conn, &tenant_id, "teacher", &date)?;
    let (rows, summary) = roster_with_marks(&roster, &marks, "teacherId");

    Ok(json!({
        "date": date,
        "rows": rows,
        "summary": summary_json(&summary),
        "unrecordedCount": roster.len() as i64 - summary.recorded_count
    }))
}

fn month_bounds_from_params(params: &serde_json::Value) -> Result<(String, String), HandlerErr> {
    let month_key = get_required_text(params, "month")?;
    let (year, month) = report::parse_month_key(&month_key)
        .ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM"))?;
    report::month_bounds(year, month)
        .ok_or_else(|| HandlerErr::bad_params("month out of range"))
}

/// Every ledger row in the half-open window, in scope order. Days with
/// no submission are simply not there.
pub(crate) fn records_in_month(
    conn: &Connection,
    tenant_id: &str,
    subject_kind: &str,
    bounds: &(String, String),
) -> Result<Vec<(String, String, bool)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT subject_id, date, is_present FROM attendance_records
             WHERE school_id = ? AND subject_kind = ? AND date >= ? AND date < ?
             ORDER BY date, subject_id",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    stmt.query_map(
        [tenant_id, subject_kind, bounds.0.as_str(), bounds.1.as_str()],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        },
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| db_err("db_query_failed", e))
}

pub(crate) fn month_records_json(
    records: &[(String, String, bool)],
    subject_key: &str,
) -> (Vec<serde_json::Value>, report::AttendanceSummary) {
    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|(subject_id, date, is_present)| {
            json!({
                subject_key: subject_id,
                "date": date,
                "isPresent": is_present,
            })
        })
        .collect();
    let summary = report::summarize(records.iter().map(|(_, _, p)| *p));
    (rows, summary)
}

fn attendance_students_by_month(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let class_id = get_required_str(params, "classId")?;
    let section = get_required_text(params, "section")?;
    let bounds = month_bounds_from_params(params)?;

    let class_name = class_name_for(conn, &tenant_id, &class_id)?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;
    let roster: HashSet<String> = student_roster(conn, &tenant_id, &class_name, &section)?
        .into_iter()
        .map(|m| m.id)
        .collect();

    let records: Vec<(String, String, bool)> =
        records_in_month(conn, &tenant_id, "student", &bounds)?
            .into_iter()
            .filter(|(subject_id, _, _)| roster.contains(subject_id))
            .collect();
    let (rows, summary) = month_records_json(&records, "studentId");

    Ok(json!({
        "records": rows,
        "summary": summary_json(&summary)
    }))
}

fn attendance_teachers_by_month(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let bounds = month_bounds_from_params(params)?;

    let records = records_in_month(conn, &tenant_id, "teacher", &bounds)?;
    let (rows, summary) = month_records_json(&records, "teacherId");

    Ok(json!({
        "records": rows,
        "summary": summary_json(&summary)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.recordStudents" => Some(with_db(state, req, attendance_record_students)),
        "attendance.recordTeachers" => Some(with_db(state, req, attendance_record_teachers)),
        "attendance.studentsByDate" => Some(with_db(state, req, attendance_students_by_date)),
        "attendance.teachersByDate" => Some(with_db(state, req, attendance_teachers_by_date)),
        "attendance.studentsByMonth" => Some(with_db(state, req, attendance_students_by_month)),
        "attendance.teachersByMonth" => Some(with_db(state, req, attendance_teachers_by_month)),
        _ => None,
    }
}
