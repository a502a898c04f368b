use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_schoold");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn schoold");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 1,
        }
    }

    fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn expect_ok(&mut self, method: &str, params: Value) -> Value {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "expected success for {}: {}",
            method,
            resp
        );
        resp.get("result").expect("result").clone()
    }

    fn expect_err(&mut self, method: &str, params: Value) -> String {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "expected failure for {}: {}",
            method,
            resp
        );
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

#[test]
fn month_rollup_reports_recorded_days_only() {
    let workspace = temp_dir("schoold-rollup");
    let mut sc = Sidecar::spawn();
    sc.expect_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let admin = sc
        .expect_ok(
            "accounts.register",
            json!({ "email": "head@school.test", "password": "pw", "role": "admin" }),
        )["accountId"]
        .as_str()
        .expect("accountId")
        .to_string();
    let class_id = sc
        .expect_ok(
            "classes.create",
            json!({ "accountId": admin, "className": "10", "section": "A" }),
        )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let student = sc
        .expect_ok(
            "students.register",
            json!({
                "accountId": admin,
                "firstName": "Mona",
                "lastName": "Farah",
                "regNo": "R-001",
                "className": "10",
                "section": "A"
            }),
        )["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();

    // Three recorded school days in March, one in April. No weekend
    // backfill ever happens.
    for (date, present) in [
        ("2024-03-01", true),
        ("2024-03-04", false),
        ("2024-03-05", true),
        ("2024-04-01", true),
    ] {
        sc.expect_ok(
            "attendance.recordStudents",
            json!({
                "accountId": admin,
                "classId": class_id,
                "section": "A",
                "date": date,
                "entries": [{ "studentId": student, "isPresent": present }]
            }),
        );
    }

    let march = sc.expect_ok(
        "attendance.studentsByMonth",
        json!({
            "accountId": admin,
            "classId": class_id,
            "section": "A",
            "month": "2024-03"
        }),
    );
    let records = march["records"].as_array().expect("records");
    assert_eq!(records.len(), 3);
    let dates: Vec<&str> = records
        .iter()
        .map(|r| r["date"].as_str().expect("date"))
        .collect();
    assert_eq!(dates, vec!["2024-03-01", "2024-03-04", "2024-03-05"]);

    // The summary is defined over exactly the returned rows.
    let present = records
        .iter()
        .filter(|r| r["isPresent"].as_bool() == Some(true))
        .count() as i64;
    assert_eq!(march["summary"]["presentCount"].as_i64(), Some(present));
    assert_eq!(
        march["summary"]["absentCount"].as_i64(),
        Some(records.len() as i64 - present)
    );
    assert_eq!(march["summary"]["recordedCount"].as_i64(), Some(3));

    let april = sc.expect_ok(
        "attendance.studentsByMonth",
        json!({
            "accountId": admin,
            "classId": class_id,
            "section": "A",
            "month": "2024-04"
        }),
    );
    assert_eq!(april["records"].as_array().expect("records").len(), 1);

    let code = sc.expect_err(
        "attendance.studentsByMonth",
        json!({
            "accountId": admin,
            "classId": class_id,
            "section": "A",
            "month": "03-2024"
        }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn unrecorded_day_reads_as_no_record_not_absent() {
    let workspace = temp_dir("schoold-norecord");
    let mut sc = Sidecar::spawn();
    sc.expect_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let admin = sc
        .expect_ok(
            "accounts.register",
            json!({ "email": "head@school.test", "password": "pw", "role": "admin" }),
        )["accountId"]
        .as_str()
        .expect("accountId")
        .to_string();
    let class_id = sc
        .expect_ok(
            "classes.create",
            json!({ "accountId": admin, "className": "10", "section": "A" }),
        )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    for reg_no in ["R-001", "R-002"] {
        sc.expect_ok(
            "students.register",
            json!({
                "accountId": admin,
                "firstName": "Kid",
                "lastName": reg_no,
                "regNo": reg_no,
                "className": "10",
                "section": "A"
            }),
        );
    }

    let day = sc.expect_ok(
        "attendance.studentsByDate",
        json!({
            "accountId": admin,
            "classId": class_id,
            "section": "A",
            "date": "2024-03-01"
        }),
    );
    let rows = day["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2, "one row per enrolled student");
    for row in rows {
        assert!(row["isPresent"].is_null(), "no submission means no record");
    }
    assert_eq!(day["summary"]["presentCount"], 0);
    assert_eq!(day["summary"]["absentCount"], 0);
    assert_eq!(day["summary"]["recordedCount"], 0);
    assert_eq!(day["unrecordedCount"], 2);
}
