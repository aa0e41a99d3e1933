use serde_json::json;
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
    let exe = env!("CARGO_BIN_EXE_resultsheetd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsheetd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_line(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let value = read_line(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn health_reports_version_without_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["version"].as_str().is_some());
    assert!(health["result"]["workspacePath"].is_null());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unknown_method_and_bad_json_are_reported() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let unknown = request(&mut stdin, &mut reader, "1", "reports.transcript", json!({}));
    assert_eq!(unknown["ok"], json!(false));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let bad = read_line(&mut reader);
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(error_code(&bad), Some("bad_json"));

    // The loop keeps serving after a malformed line.
    let health = request(&mut stdin, &mut reader, "2", "health", json!({}));
    assert_eq!(health["ok"], json!(true));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn workspace_methods_require_a_selected_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    for (i, method) in [
        "classes.create",
        "subjects.list",
        "students.list",
        "grades.set",
        "attendance.set",
        "settings.get",
        "calc.classResults",
        "reports.resultSheetModel",
    ]
    .iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("nw-{}", i),
            method,
            json!({ "classId": "x", "name": "x" }),
        );
        assert_eq!(error_code(&resp), Some("no_workspace"), "{}", method);
    }

    // Listing classes before a workspace is chosen is not an error.
    let classes = request(&mut stdin, &mut reader, "list", "classes.list", json!({}));
    assert_eq!(classes["result"]["classes"], json!([]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("resultsheet-router-smoke");
    let bundle_out = workspace.join("smoke-class.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let selected = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], json!(true));
    assert!(workspace.join("resultsheet.sqlite3").is_file());

    let created = request(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "صنف هفتم", "academicYear": "1404" }),
    );
    let class_id = created["result"]["classId"]
        .as_str()
        .expect("classId")
        .to_string();

    let calls = [
        ("classes.list", json!({})),
        ("subjects.list", json!({ "classId": class_id })),
        ("students.list", json!({ "classId": class_id })),
        ("grades.list", json!({ "classId": class_id })),
        ("attendance.list", json!({ "classId": class_id })),
        ("settings.get", json!({})),
        ("calc.classResults", json!({ "classId": class_id })),
        ("reports.resultSheetModel", json!({ "classId": class_id })),
        ("reports.resultSheetCsv", json!({ "classId": class_id })),
        (
            "bundle.exportClass",
            json!({ "classId": class_id, "outPath": bundle_out.to_string_lossy() }),
        ),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("s-{}", i), method, params);
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
    }
    assert!(bundle_out.is_file());

    let imported = request(
        &mut stdin,
        &mut reader,
        "import",
        "bundle.importClass",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(imported["ok"], json!(true), "{}", imported);
    assert_ne!(imported["result"]["classId"], json!(class_id));
    let classes = request(&mut stdin, &mut reader, "after", "classes.list", json!({}));
    assert_eq!(classes["result"]["classes"].as_array().map(|c| c.len()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
