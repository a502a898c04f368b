use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoold.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    // Accounts form the tenant hierarchy: school_id is NULL for a root
    // (school) account and points at the root's id for everyone else.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_digest TEXT NOT NULL,
            role TEXT NOT NULL,
            school_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES accounts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_school ON accounts(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            session_name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES accounts(id),
            FOREIGN KEY(account_id) REFERENCES accounts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_school ON sessions(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_school_active ON sessions(school_id, is_active)",
        [],
    )?;

    // assigned_class/assigned_section are free text; every join on them
    // goes through scope::normalize, so no uniqueness is assumed here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            session_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            reg_no TEXT NOT NULL,
            birth_date TEXT,
            guardian_phone TEXT,
            assigned_class TEXT NOT NULL,
            assigned_section TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES accounts(id),
            FOREIGN KEY(account_id) REFERENCES accounts(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(school_id, reg_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT,
            FOREIGN KEY(school_id) REFERENCES accounts(id),
            FOREIGN KEY(account_id) REFERENCES accounts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id)",
        [],
    )?;

    // (class_name, section) is the natural key but is deliberately not
    // unique; rows that normalize equal are the same logical class.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            section TEXT NOT NULL,
            teacher_id TEXT,
            FOREIGN KEY(school_id) REFERENCES accounts(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_school ON classes(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teaching_assignments(
            teacher_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            section TEXT NOT NULL,
            subject TEXT NOT NULL,
            PRIMARY KEY(teacher_id, class_name, section, subject),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    // One row per subject per calendar day; re-submission overwrites
    // through the ON CONFLICT target below.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            subject_kind TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            date TEXT NOT NULL,
            is_present INTEGER NOT NULL,
            class_id TEXT,
            section TEXT,
            UNIQUE(subject_kind, subject_id, date),
            FOREIGN KEY(school_id) REFERENCES accounts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_school_date ON attendance_records(school_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_subject ON attendance_records(subject_kind, subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS guardian_links(
            parent_account_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(parent_account_id, student_id),
            FOREIGN KEY(parent_account_id) REFERENCES accounts(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_guardian_links_parent ON guardian_links(parent_account_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_guardian_links_student ON guardian_links(student_id)",
        [],
    )?;

    // Early workspaces stored students without a guardian contact. Add
    // the column when missing.
    ensure_students_guardian_phone(conn)?;

    Ok(())
}

fn ensure_students_guardian_phone(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "guardian_phone")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN guardian_phone TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
