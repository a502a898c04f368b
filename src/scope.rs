use rusqlite::{Connection, OptionalExtension};

/// Canonical form for free-text class/section values. Applied on both
/// sides of every join that gates visibility; the storage layer keeps
/// the raw text.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: String,
    pub email: String,
    pub role: String,
    pub is_root: bool,
}

/// Tenant of an account: its school_id, or its own id for a root
/// (school) account. `Ok(None)` means the account does not exist; the
/// caller must surface that as not-found, never as an empty scope.
pub fn resolve_tenant(conn: &Connection, account_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id, school_id FROM accounts WHERE id = ?",
        [account_id],
        |r| {
            let id: String = r.get(0)?;
            let school_id: Option<String> = r.get(1)?;
            Ok(school_id.unwrap_or(id))
        },
    )
    .optional()
}

/// All accounts under a tenant, the root included, optionally filtered
/// by role.
pub fn list_sibling_accounts(
    conn: &Connection,
    tenant_id: &str,
    role: Option<&str>,
) -> rusqlite::Result<Vec<AccountRow>> {
    let mut sql = String::from(
        "SELECT id, email, role, school_id FROM accounts
         WHERE (school_id = ?1 OR id = ?1)",
    );
    if role.is_some() {
        sql.push_str(" AND role = ?2");
    }
    sql.push_str(" ORDER BY created_at, id");

    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(AccountRow {
            id: r.get(0)?,
            email: r.get(1)?,
            role: r.get(2)?,
            is_root: r.get::<_, Option<String>>(3)?.is_none(),
        })
    };

    let mut stmt = conn.prepare(&sql)?;
    match role {
        Some(role) => stmt
            .query_map(rusqlite::params![tenant_id, role], map_row)?
            .collect(),
        None => stmt
            .query_map(rusqlite::params![tenant_id], map_row)?
            .collect(),
    }
}

/// Students a parent account is authorized to view. Links pointing at
/// students outside the parent's tenant are dropped here rather than
/// returned (stale links after a school change must not widen scope).
pub fn resolve_guardian_scope(
    conn: &Connection,
    parent_account_id: &str,
    tenant_id: &str,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT gl.student_id
         FROM guardian_links gl
         JOIN students s ON s.id = gl.student_id
         WHERE gl.parent_account_id = ? AND s.school_id = ?
         ORDER BY s.last_name, s.first_name, s.id",
    )?;
    let rows = stmt
        .query_map([parent_account_id, tenant_id], |r| r.get(0))?
        .collect();
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn mem_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::init_schema(&conn).expect("init schema");
        conn
    }

    fn insert_account(conn: &Connection, id: &str, role: &str, school_id: Option<&str>) {
        conn.execute(
            "INSERT INTO accounts(id, email, password_digest, role, school_id, created_at)
             VALUES(?, ?, 'x', ?, ?, ?)",
            (id, format!("{}@example.org", id), role, school_id, id),
        )
        .expect("insert account");
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize("  10 "), "10");
        assert_eq!(normalize("A"), "a");
        assert_eq!(normalize(" Grade 10 \t"), "grade 10");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn tenant_of_root_is_itself() {
        let conn = mem_db();
        insert_account(&conn, "root-a", "admin", None);
        insert_account(&conn, "t1", "teacher", Some("root-a"));

        assert_eq!(
            resolve_tenant(&conn, "root-a").expect("resolve"),
            Some("root-a".to_string())
        );
        assert_eq!(
            resolve_tenant(&conn, "t1").expect("resolve"),
            Some("root-a".to_string())
        );
        assert_eq!(resolve_tenant(&conn, "nope").expect("resolve"), None);
    }

    #[test]
    fn siblings_include_root_and_honor_role_filter() {
        let conn = mem_db();
        insert_account(&conn, "root-a", "admin", None);
        insert_account(&conn, "t1", "teacher", Some("root-a"));
        insert_account(&conn, "p1", "parent", Some("root-a"));
        insert_account(&conn, "root-b", "admin", None);
        insert_account(&conn, "t2", "teacher", Some("root-b"));

        let all = list_sibling_accounts(&conn, "root-a", None).expect("list");
        let ids: Vec<&str> = all.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "root-a", "t1"]);
        assert!(all.iter().find(|a| a.id == "root-a").expect("root").is_root);

        let teachers = list_sibling_accounts(&conn, "root-a", Some("teacher")).expect("list");
        assert_eq!(teachers.len(), 1);
        assert_eq!(teachers[0].id, "t1");
    }

    #[test]
    fn guardian_scope_drops_cross_tenant_links() {
        let conn = mem_db();
        insert_account(&conn, "root-a", "admin", None);
        insert_account(&conn, "root-b", "admin", None);
        insert_account(&conn, "p1", "parent", Some("root-a"));
        conn.execute(
            "INSERT INTO students(id, school_id, account_id, first_name, last_name, reg_no,
                                  assigned_class, assigned_section)
             VALUES('s1', 'root-a', 'root-a', 'Ana', 'Khan', 'R1', '10', 'A')",
            [],
        )
        .expect("insert s1");
        conn.execute(
            "INSERT INTO students(id, school_id, account_id, first_name, last_name, reg_no,
                                  assigned_class, assigned_section)
             VALUES('s2', 'root-b', 'root-b', 'Ben', 'Osei', 'R1', '10', 'A')",
            [],
        )
        .expect("insert s2");
        conn.execute(
            "INSERT INTO guardian_links(parent_account_id, student_id) VALUES('p1', 's1')",
            [],
        )
        .expect("link s1");
        // Stale link into another school: must not widen the scope.
        conn.execute(
            "INSERT INTO guardian_links(parent_account_id, student_id) VALUES('p1', 's2')",
            [],
        )
        .expect("link s2");

        let scope = resolve_guardian_scope(&conn, "p1", "root-a").expect("scope");
        assert_eq!(scope, vec!["s1".to_string()]);
    }
}
