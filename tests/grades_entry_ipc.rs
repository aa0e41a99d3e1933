use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], json!(true), "{} failed: {}", method, value);
    value["result"].clone()
}

struct Fixture {
    student_id: String,
    subject_id: String,
    other_subject_id: String,
    class_id: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &Path) -> Fixture {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(stdin, reader, "c1", "classes.create", json!({ "name": "صنف هشتم" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let other_class = request_ok(stdin, reader, "c2", "classes.create", json!({ "name": "صنف نهم" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let subject_id = request_ok(
        stdin,
        reader,
        "s1",
        "subjects.create",
        json!({ "classId": class_id, "name": "کیمیا" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let other_subject_id = request_ok(
        stdin,
        reader,
        "s2",
        "subjects.create",
        json!({ "classId": other_class, "name": "فزیک" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let student_id = request_ok(
        stdin,
        reader,
        "st",
        "students.create",
        json!({ "classId": class_id, "name": "نوید" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    Fixture {
        student_id,
        subject_id,
        other_subject_id,
        class_id,
    }
}

fn stored_scores(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    class_id: &str,
) -> Vec<serde_json::Value> {
    request_ok(stdin, reader, id, "grades.list", json!({ "classId": class_id }))["grades"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

#[test]
fn out_of_range_scores_leave_the_stored_value() {
    let workspace = temp_dir("resultsheet-grades-range");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.set",
        json!({
            "studentId": fx.student_id,
            "subjectId": fx.subject_id,
            "examType": "MIDTERM",
            "score": 30
        }),
    );
    assert_eq!(set, json!({ "applied": true, "score": 30.0 }));

    for (i, (exam, score, max)) in [("MIDTERM", json!(41), 40.0), ("FINAL", json!("61"), 60.0), ("MIDTERM", json!(-1), 40.0)]
        .into_iter()
        .enumerate()
    {
        let resp = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r-{}", i),
            "grades.set",
            json!({
                "studentId": fx.student_id,
                "subjectId": fx.subject_id,
                "examType": exam,
                "score": score
            }),
        );
        assert_eq!(resp["applied"], json!(false));
        assert_eq!(resp["reason"], json!("out_of_range"));
        assert_eq!(resp["max"], json!(max));
    }

    let grades = stored_scores(&mut stdin, &mut reader, "list", &fx.class_id);
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0]["score"], json!(30.0));
    assert_eq!(grades[0]["type"], json!("MIDTERM"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn blank_clears_and_garbage_counts_as_zero() {
    let workspace = temp_dir("resultsheet-grades-clear");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let base = json!({
        "studentId": fx.student_id,
        "subjectId": fx.subject_id,
        "examType": "FINAL"
    });
    let with_score = |score: serde_json::Value| {
        let mut p = base.clone();
        p["score"] = score;
        p
    };

    request_ok(&mut stdin, &mut reader, "g1", "grades.set", with_score(json!("۵۵")));
    let grades = stored_scores(&mut stdin, &mut reader, "l1", &fx.class_id);
    assert_eq!(grades[0]["score"], json!(55.0));

    let cleared = request_ok(&mut stdin, &mut reader, "g2", "grades.set", with_score(json!("  ")));
    assert_eq!(cleared, json!({ "applied": true, "score": null }));
    assert!(stored_scores(&mut stdin, &mut reader, "l2", &fx.class_id).is_empty());

    let garbage = request_ok(&mut stdin, &mut reader, "g3", "grades.set", with_score(json!("abc")));
    assert_eq!(garbage, json!({ "applied": true, "score": 0.0 }));

    // An explicit zero is a present score: the student has data and fails.
    let calc = request_ok(
        &mut stdin,
        &mut reader,
        "calc",
        "calc.classResults",
        json!({ "classId": fx.class_id }),
    );
    assert_eq!(calc["results"][0]["result"], json!("fail"));
    assert_eq!(calc["annualSummary"]["tested"], json!(1));

    let cleared = request_ok(&mut stdin, &mut reader, "g4", "grades.set", with_score(json!(null)));
    assert_eq!(cleared["applied"], json!(true));
    assert!(stored_scores(&mut stdin, &mut reader, "l3", &fx.class_id).is_empty());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subject_from_another_class_is_not_found() {
    let workspace = temp_dir("resultsheet-grades-foreign");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.set",
        json!({
            "studentId": fx.student_id,
            "subjectId": fx.other_subject_id,
            "examType": "MIDTERM",
            "score": 10
        }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("not_found"));

    let bad_exam = request(
        &mut stdin,
        &mut reader,
        "g2",
        "grades.set",
        json!({
            "studentId": fx.student_id,
            "subjectId": fx.subject_id,
            "examType": "QUIZ",
            "score": 10
        }),
    );
    assert_eq!(bad_exam["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bulk_set_reports_each_edit() {
    let workspace = temp_dir("resultsheet-grades-bulk");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let resp = request_ok(
        &mut stdin,
        &mut reader,
        "bulk",
        "grades.bulkSet",
        json!({
            "edits": [
                { "studentId": fx.student_id, "subjectId": fx.subject_id, "examType": "MIDTERM", "score": 38 },
                { "studentId": fx.student_id, "subjectId": fx.subject_id, "examType": "FINAL", "score": 99 },
                { "studentId": fx.student_id, "subjectId": fx.other_subject_id, "examType": "FINAL", "score": 20 },
                { "studentId": fx.student_id, "examType": "FINAL", "score": 20 }
            ]
        }),
    );
    assert_eq!(resp["applied"], json!(1));
    assert_eq!(resp["rejected"], json!(3));
    let results = resp["results"].as_array().expect("results");
    assert_eq!(results[0]["applied"], json!(true));
    assert_eq!(results[1]["reason"], json!("out_of_range"));
    assert_eq!(results[2]["reason"], json!("not_found"));
    assert_eq!(results[3]["reason"], json!("bad_params"));
    assert_eq!(results[3]["index"], json!(3));

    let grades = stored_scores(&mut stdin, &mut reader, "list", &fx.class_id);
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0]["score"], json!(38.0));

    let edits: Vec<_> = (0..5001).map(|_| json!({})).collect();
    let too_many = request(
        &mut stdin,
        &mut reader,
        "bulk2",
        "grades.bulkSet",
        json!({ "edits": edits }),
    );
    assert_eq!(too_many["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn structured_scores_are_stored_as_zero_not_cleared() {
    let workspace = temp_dir("resultsheet-grades-structured");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.set",
        json!({
            "studentId": fx.student_id,
            "subjectId": fx.subject_id,
            "examType": "MIDTERM",
            "score": 30
        }),
    );

    for (i, score) in [json!({ "value": 35 }), json!([35])].into_iter().enumerate() {
        let resp = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g-{}", i),
            "grades.set",
            json!({
                "studentId": fx.student_id,
                "subjectId": fx.subject_id,
                "examType": "MIDTERM",
                "score": score
            }),
        );
        assert_eq!(resp, json!({ "applied": true, "score": 0.0 }));

        let grades = stored_scores(&mut stdin, &mut reader, &format!("l-{}", i), &fx.class_id);
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0]["score"], json!(0.0));
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_subject_removes_its_grades() {
    let workspace = temp_dir("resultsheet-grades-subject-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let kept_subject = request_ok(
        &mut stdin,
        &mut reader,
        "s3",
        "subjects.create",
        json!({ "classId": fx.class_id, "name": "تاریخ" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "bulk",
        "grades.bulkSet",
        json!({
            "edits": [
                { "studentId": fx.student_id, "subjectId": fx.subject_id, "examType": "MIDTERM", "score": 25 },
                { "studentId": fx.student_id, "subjectId": fx.subject_id, "examType": "FINAL", "score": 40 },
                { "studentId": fx.student_id, "subjectId": kept_subject, "examType": "FINAL", "score": 51 }
            ]
        }),
    );
    assert_eq!(stored_scores(&mut stdin, &mut reader, "l1", &fx.class_id).len(), 3);

    request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "subjects.delete",
        json!({ "subjectId": fx.subject_id }),
    );

    let grades = stored_scores(&mut stdin, &mut reader, "l2", &fx.class_id);
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0]["subjectId"], json!(kept_subject));
    assert_eq!(grades[0]["score"], json!(51.0));

    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "subs",
        "subjects.list",
        json!({ "classId": fx.class_id }),
    );
    assert_eq!(subjects["subjects"].as_array().map(|s| s.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
