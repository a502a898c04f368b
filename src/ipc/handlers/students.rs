use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_str, get_required_text, is_constraint_violation,
    resolve_caller, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::report;
use crate::scope::normalize;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StudentRow {
    id: String,
    first_name: String,
    last_name: String,
    reg_no: String,
    birth_date: Option<String>,
    guardian_phone: Option<String>,
    assigned_class: String,
    assigned_section: String,
    session_id: Option<String>,
}

const STUDENT_COLUMNS: &str = "id, first_name, last_name, reg_no, birth_date, guardian_phone,
                               assigned_class, assigned_section, session_id";

fn row_to_student(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        reg_no: r.get(3)?,
        birth_date: r.get(4)?,
        guardian_phone: r.get(5)?,
        assigned_class: r.get(6)?,
        assigned_section: r.get(7)?,
        session_id: r.get(8)?,
    })
}

fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "firstName": s.first_name,
        "lastName": s.last_name,
        "regNo": s.reg_no,
        "birthDate": s.birth_date,
        "guardianPhone": s.guardian_phone,
        "className": s.assigned_class,
        "section": s.assigned_section,
        "sessionId": s.session_id
    })
}

fn read_student(
    conn: &Connection,
    tenant_id: &str,
    student_id: &str,
) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ? AND school_id = ?"),
        [student_id, tenant_id],
        row_to_student,
    )
    .optional()
    .map_err(|e| db_err("db_query_failed", e))
}

fn session_in_tenant(
    conn: &Connection,
    tenant_id: &str,
    session_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM sessions WHERE id = ? AND school_id = ?",
        [session_id, tenant_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| db_err("db_query_failed", e))
}

fn active_session_id(conn: &Connection, tenant_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM sessions WHERE school_id = ? AND is_active = 1",
        [tenant_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| db_err("db_query_failed", e))
}

fn parse_birth_date(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_optional_str(params, "birthDate")? else {
        return Ok(None);
    };
    let date = report::parse_iso_date(&raw)
        .ok_or_else(|| HandlerErr::validation("birthDate must be a valid YYYY-MM-DD date"))?;
    Ok(Some(date.format("%Y-%m-%d").to_string()))
}

fn students_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (account_id, tenant_id) = resolve_caller(conn, params)?;
    let first_name = get_required_text(params, "firstName")?;
    let last_name = get_required_text(params, "lastName")?;
    let reg_no = get_required_text(params, "regNo")?;
    let class_name = get_required_text(params, "className")?;
    let section = get_required_text(params, "section")?;
    let birth_date = parse_birth_date(params)?;
    let guardian_phone = get_optional_str(params, "guardianPhone")?;

    // Enrollment lands under the named session, or the tenant's active
    // one when the caller does not pick.
    let session_id = match get_optional_str(params, "sessionId")? {
        Some(session_id) => {
            if !session_in_tenant(conn, &tenant_id, &session_id)? {
                return Err(HandlerErr::not_found("session not found"));
            }
            Some(session_id)
        }
        None => active_session_id(conn, &tenant_id)?,
    };

    let student_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO students(id, school_id, account_id, session_id, first_name, last_name,
                              reg_no, birth_date, guardian_phone, assigned_class, assigned_section)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &tenant_id,
            &account_id,
            &session_id,
            &first_name,
            &last_name,
            &reg_no,
            &birth_date,
            &guardian_phone,
            &class_name,
            &section,
        ),
    );
    if let Err(e) = inserted {
        if is_constraint_violation(&e) {
            return Err(HandlerErr::validation(
                "registration number already in use for this school",
            ));
        }
        return Err(db_err("db_insert_failed", e));
    }

    let student = read_student(conn, &tenant_id, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": student_json(&student) }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let class_filter = get_optional_str(params, "className")?.map(|s| normalize(&s));
    let section_filter = get_optional_str(params, "section")?.map(|s| normalize(&s));

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students
             WHERE school_id = ?
             ORDER BY last_name, first_name, id"
        ))
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([&tenant_id], row_to_student)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    let students: Vec<serde_json::Value> = rows
        .iter()
        .filter(|s| {
            class_filter
                .as_deref()
                .map(|f| normalize(&s.assigned_class) == f)
                .unwrap_or(true)
                && section_filter
                    .as_deref()
                    .map(|f| normalize(&s.assigned_section) == f)
                    .unwrap_or(true)
        })
        .map(student_json)
        .collect();
    Ok(json!({ "students": students }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    let mut student = read_student(conn, &tenant_id, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    if let Some(v) = get_optional_str(params, "firstName")? {
        let v = v.trim().to_string();
        if v.is_empty() {
            return Err(HandlerErr::bad_params("firstName must not be empty"));
        }
        student.first_name = v;
    }
    if let Some(v) = get_optional_str(params, "lastName")? {
        let v = v.trim().to_string();
        if v.is_empty() {
            return Err(HandlerErr::bad_params("lastName must not be empty"));
        }
        student.last_name = v;
    }
    if params.get("birthDate").is_some() {
        student.birth_date = parse_birth_date(params)?;
    }
    if params.get("guardianPhone").is_some() {
        student.guardian_phone = get_optional_str(params, "guardianPhone")?;
    }
    if let Some(v) = get_optional_str(params, "className")? {
        let v = v.trim().to_string();
        if v.is_empty() {
            return Err(HandlerErr::bad_params("className must not be empty"));
        }
        student.assigned_class = v;
    }
    if let Some(v) = get_optional_str(params, "section")? {
        let v = v.trim().to_string();
        if v.is_empty() {
            return Err(HandlerErr::bad_params("section must not be empty"));
        }
        student.assigned_section = v;
    }
    if let Some(session_id) = get_optional_str(params, "sessionId")? {
        if !session_in_tenant(conn, &tenant_id, &session_id)? {
            return Err(HandlerErr::not_found("session not found"));
        }
        student.session_id = Some(session_id);
    }

    conn.execute(
        "UPDATE students SET first_name = ?, last_name = ?, birth_date = ?, guardian_phone = ?,
                             assigned_class = ?, assigned_section = ?, session_id = ?
         WHERE id = ? AND school_id = ?",
        (
            &student.first_name,
            &student.last_name,
            &student.birth_date,
            &student.guardian_phone,
            &student.assigned_class,
            &student.assigned_section,
            &student.session_id,
            &student_id,
            &tenant_id,
        ),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    Ok(json!({ "student": student_json(&student) }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let student_id = get_required_str(params, "studentId")?;
    if read_student(conn, &tenant_id, &student_id)?.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    // Guardian links go with the enrollment; attendance history stays
    // and simply stops joining to a roster row.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM guardian_links WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| db_err("db_delete_failed", e))?;
    tx.execute(
        "DELETE FROM students WHERE id = ? AND school_id = ?",
        (&student_id, &tenant_id),
    )
    .map_err(|e| db_err("db_delete_failed", e))?;
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.register" => Some(with_db(state, req, students_register)),
        "students.list" => Some(with_db(state, req, students_list)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
