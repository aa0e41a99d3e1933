use crate::calc::{ExamType, ScoreState};
use crate::db;
use crate::ipc::helpers::{db_conn, ensure_exists, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const GRADES_BULK_MAX_EDITS: usize = 5000;

enum EditOutcome {
    Stored(f64),
    Cleared,
    /// Out-of-range input is not applied and the stored value stays.
    Rejected { max: f64 },
}

impl EditOutcome {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Stored(v) => json!({ "applied": true, "score": v }),
            Self::Cleared => json!({ "applied": true, "score": null }),
            Self::Rejected { max } => json!({
                "applied": false,
                "reason": "out_of_range",
                "max": max
            }),
        }
    }
}

fn parse_exam_type(params: &serde_json::Value) -> Result<ExamType, HandlerErr> {
    let raw = params
        .get("examType")
        .or_else(|| params.get("type"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing examType"))?;
    ExamType::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("examType must be MIDTERM or FINAL")
            .with_details(json!({ "examType": raw }))
    })
}

fn subject_in_student_class(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1
             FROM students s
             JOIN subjects sub ON sub.class_id = s.class_id
             WHERE s.id = ? AND sub.id = ?",
            (student_id, subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if found.is_none() {
        return Err(
            HandlerErr::new("not_found", "subject is not part of the student's class").with_details(
                json!({ "studentId": student_id, "subjectId": subject_id }),
            ),
        );
    }
    Ok(())
}

fn apply_grade_edit(conn: &Connection, edit: &serde_json::Value) -> Result<EditOutcome, HandlerErr> {
    let student_id = required_str(edit, "studentId")?;
    let subject_id = required_str(edit, "subjectId")?;
    let exam = parse_exam_type(edit)?;
    subject_in_student_class(conn, &student_id, &subject_id)?;

    let score = edit
        .get("score")
        .map(ScoreState::from_json)
        .unwrap_or(ScoreState::Absent);

    match score {
        ScoreState::Absent => {
            conn.execute(
                "DELETE FROM grades WHERE student_id = ? AND subject_id = ? AND exam_type = ?",
                (&student_id, &subject_id, exam.as_str()),
            )
            .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
            Ok(EditOutcome::Cleared)
        }
        ScoreState::Present(v) if !v.is_finite() || v < 0.0 || v > exam.max_score() => {
            tracing::info!(
                student = %student_id,
                subject = %subject_id,
                exam = exam.as_str(),
                score = v,
                "score out of range; not applied"
            );
            Ok(EditOutcome::Rejected {
                max: exam.max_score(),
            })
        }
        ScoreState::Present(v) => {
            conn.execute(
                "INSERT INTO grades(id, student_id, subject_id, exam_type, score, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, subject_id, exam_type) DO UPDATE SET
                   score = excluded.score,
                   updated_at = excluded.updated_at",
                (
                    Uuid::new_v4().to_string(),
                    &student_id,
                    &subject_id,
                    exam.as_str(),
                    v,
                    db::now_rfc3339(),
                ),
            )
            .map_err(|e| {
                HandlerErr::new("db_insert_failed", e.to_string())
                    .with_details(json!({ "table": "grades" }))
            })?;
            Ok(EditOutcome::Stored(v))
        }
    }
}

fn list_grades(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_exists(conn, "classes", &class_id, "class")?;

    let mut stmt = conn
        .prepare(
            "SELECT g.student_id, g.subject_id, g.exam_type, g.score
             FROM grades g
             JOIN students s ON s.id = g.student_id
             WHERE s.class_id = ?
             ORDER BY s.sort_order, g.subject_id, g.exam_type",
        )
        .map_err(HandlerErr::query)?;
    let grades = stmt
        .query_map([&class_id], |r| {
            let student_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let exam_type: String = r.get(2)?;
            let score: f64 = r.get(3)?;
            Ok(json!({
                "studentId": student_id,
                "subjectId": subject_id,
                "type": exam_type,
                "score": score
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "grades": grades }))
}

fn set_grade(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let outcome = apply_grade_edit(conn, &req.params)?;
    Ok(outcome.to_json())
}

fn bulk_set_grades(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let Some(edits) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("edits must be an array"));
    };
    if edits.len() > GRADES_BULK_MAX_EDITS {
        return Err(HandlerErr::bad_params("too many edits").with_details(json!({
            "count": edits.len(),
            "max": GRADES_BULK_MAX_EDITS
        })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut results = Vec::with_capacity(edits.len());
    let mut applied = 0usize;
    let mut rejected = 0usize;
    for (index, edit) in edits.iter().enumerate() {
        match apply_grade_edit(&tx, edit) {
            Ok(outcome) => {
                if matches!(outcome, EditOutcome::Rejected { .. }) {
                    rejected += 1;
                } else {
                    applied += 1;
                }
                let mut row = outcome.to_json();
                row["index"] = json!(index);
                results.push(row);
            }
            Err(e) if e.code == "bad_params" || e.code == "not_found" => {
                rejected += 1;
                results.push(json!({
                    "index": index,
                    "applied": false,
                    "reason": e.code,
                    "message": e.message
                }));
            }
            // Storage failures abort the batch; dropping `tx` rolls back.
            Err(e) => return Err(e),
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({
        "applied": applied,
        "rejected": rejected,
        "results": results
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(respond(&req.id, list_grades(state, req))),
        "grades.set" => Some(respond(&req.id, set_grade(state, req))),
        "grades.bulkSet" => Some(respond(&req.id, bulk_set_grades(state, req))),
        _ => None,
    }
}
