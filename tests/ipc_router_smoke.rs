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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(resp: &Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schoold-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);

    // Scoped methods refuse to run without a workspace.
    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.list",
        json!({ "accountId": "whoever" }),
    );
    assert_eq!(error_code(&early), Some("no_workspace"));

    let selected = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);

    let registered = request(
        &mut stdin,
        &mut reader,
        "4",
        "accounts.register",
        json!({ "email": "head@school.test", "password": "pw", "role": "admin" }),
    );
    let admin = registered["result"]["accountId"]
        .as_str()
        .expect("accountId")
        .to_string();

    // One hit per handler family.
    for (id, method, params) in [
        ("5", "accounts.list", json!({ "accountId": admin })),
        ("6", "sessions.list", json!({ "accountId": admin })),
        ("7", "classes.list", json!({ "accountId": admin })),
        ("8", "students.list", json!({ "accountId": admin })),
        ("9", "teachers.list", json!({ "accountId": admin })),
        (
            "10",
            "attendance.teachersByDate",
            json!({ "accountId": admin, "date": "2024-03-01" }),
        ),
    ] {
        let resp = request(&mut stdin, &mut reader, id, method, params);
        assert_eq!(resp["ok"], true, "{} failed: {}", method, resp);
    }

    let unknown = request(&mut stdin, &mut reader, "11", "sessions.vaporize", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let missing = request(&mut stdin, &mut reader, "12", "sessions.list", json!({}));
    assert_eq!(error_code(&missing), Some("bad_params"));

    let _ = child.kill();
}
