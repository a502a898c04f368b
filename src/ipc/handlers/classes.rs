use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_str, get_required_text, resolve_caller, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn teacher_in_tenant(
    conn: &Connection,
    tenant_id: &str,
    teacher_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM teachers WHERE id = ? AND school_id = ?",
        [teacher_id, tenant_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| db_err("db_query_failed", e))
}

fn classes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let class_name = get_required_text(params, "className")?;
    let section = get_required_text(params, "section")?;
    let teacher_id = get_optional_str(params, "teacherId")?;

    if let Some(teacher_id) = teacher_id.as_deref() {
        if !teacher_in_tenant(conn, &tenant_id, teacher_id)? {
            return Err(HandlerErr::not_found("teacher not found"));
        }
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, school_id, class_name, section, teacher_id)
         VALUES(?, ?, ?, ?, ?)",
        (&class_id, &tenant_id, &class_name, &section, &teacher_id),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;

    Ok(json!({
        "classId": class_id,
        "className": class_name,
        "section": section,
        "teacherId": teacher_id
    }))
}

fn classes_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;

    // Student counts join on the normalized natural key, so duplicate
    // class rows that normalize equal report the same roster size.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.class_name,
               c.section,
               c.teacher_id,
               (SELECT COUNT(*) FROM students s
                WHERE s.school_id = c.school_id
                  AND TRIM(LOWER(s.assigned_class)) = TRIM(LOWER(c.class_name))
                  AND TRIM(LOWER(s.assigned_section)) = TRIM(LOWER(c.section))) AS student_count
             FROM classes c
             WHERE c.school_id = ?
             ORDER BY c.class_name, c.section",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let classes = stmt
        .query_map([&tenant_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "className": r.get::<_, String>(1)?,
                "section": r.get::<_, String>(2)?,
                "teacherId": r.get::<_, Option<String>>(3)?,
                "studentCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({ "classes": classes }))
}

fn classes_set_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let class_id = get_required_str(params, "classId")?;
    let teacher_id = get_optional_str(params, "teacherId")?;

    if let Some(teacher_id) = teacher_id.as_deref() {
        if !teacher_in_tenant(conn, &tenant_id, teacher_id)? {
            return Err(HandlerErr::not_found("teacher not found"));
        }
    }

    let changed = conn
        .execute(
            "UPDATE classes SET teacher_id = ? WHERE id = ? AND school_id = ?",
            (&teacher_id, &class_id, &tenant_id),
        )
        .map_err(|e| db_err("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("class not found"));
    }
    Ok(json!({ "ok": true }))
}

fn classes_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let class_id = get_required_str(params, "classId")?;

    // Attendance history keeps its denormalized class_id; it simply
    // stops joining to a class row, same as student removal.
    let deleted = conn
        .execute(
            "DELETE FROM classes WHERE id = ? AND school_id = ?",
            (&class_id, &tenant_id),
        )
        .map_err(|e| db_err("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("class not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(with_db(state, req, classes_create)),
        "classes.list" => Some(with_db(state, req, classes_list)),
        "classes.setTeacher" => Some(with_db(state, req, classes_set_teacher)),
        "classes.delete" => Some(with_db(state, req, classes_delete)),
        _ => None,
    }
}
