use crate::calc::{ExamType, ScoreState};
use crate::db;
use crate::ipc::helpers::{db_conn, ensure_exists, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const COUNT_FIELDS: [&str; 5] = ["days", "present", "absent", "sick", "leave"];
const REMARKS_MAX_CHARS: usize = 500;

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

/// Missing or blank stays blank; anything unreadable becomes 0; negatives clamp to 0.
fn parse_count(raw: Option<&serde_json::Value>) -> Option<f64> {
    raw.map(ScoreState::from_json)
        .and_then(ScoreState::value)
        .map(|v| if v.is_finite() && v > 0.0 { v } else { 0.0 })
}

fn list_attendance(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_exists(conn, "classes", &class_id, "class")?;

    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, a.exam_type, a.days, a.present, a.absent, a.sick, a.leave, a.remarks
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE s.class_id = ?
             ORDER BY s.sort_order, a.exam_type DESC",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&class_id], |r| {
            let student_id: String = r.get(0)?;
            let exam_type: String = r.get(1)?;
            let days: Option<f64> = r.get(2)?;
            let present: Option<f64> = r.get(3)?;
            let absent: Option<f64> = r.get(4)?;
            let sick: Option<f64> = r.get(5)?;
            let leave: Option<f64> = r.get(6)?;
            let remarks: Option<String> = r.get(7)?;
            Ok(json!({
                "studentId": student_id,
                "type": exam_type,
                "days": days,
                "present": present,
                "absent": absent,
                "sick": sick,
                "leave": leave,
                "remarks": remarks
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "attendance": rows }))
}

fn set_attendance(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let exam = parse_exam_type(&req.params)?;
    ensure_exists(conn, "students", &student_id, "student")?;

    // Fields not named in the request keep their stored value.
    let existing: Option<[Option<f64>; 5]> = conn
        .query_row(
            "SELECT days, present, absent, sick, leave FROM attendance
             WHERE student_id = ? AND exam_type = ?",
            (&student_id, exam.as_str()),
            |r| Ok([r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?]),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let mut counts = existing.unwrap_or([None; 5]);
    for (slot, field) in counts.iter_mut().zip(COUNT_FIELDS) {
        if let Some(raw) = req.params.get(field) {
            *slot = parse_count(Some(raw));
        }
    }

    let existing_remarks: Option<String> = conn
        .query_row(
            "SELECT remarks FROM attendance WHERE student_id = ? AND exam_type = ?",
            (&student_id, exam.as_str()),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .flatten();
    let remarks = match req.params.get("remarks") {
        Some(serde_json::Value::String(s)) => {
            let t: String = s.trim().chars().take(REMARKS_MAX_CHARS).collect();
            (!t.is_empty()).then_some(t)
        }
        Some(serde_json::Value::Null) => None,
        _ => existing_remarks,
    };

    conn.execute(
        "INSERT INTO attendance(id, student_id, exam_type, days, present, absent, sick, leave, remarks, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, exam_type) DO UPDATE SET
           days = excluded.days,
           present = excluded.present,
           absent = excluded.absent,
           sick = excluded.sick,
           leave = excluded.leave,
           remarks = excluded.remarks,
           updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            &student_id,
            exam.as_str(),
            counts[0],
            counts[1],
            counts[2],
            counts[3],
            counts[4],
            &remarks,
            db::now_rfc3339(),
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "attendance" }))
    })?;

    Ok(json!({
        "studentId": student_id,
        "type": exam.as_str(),
        "days": counts[0],
        "present": counts[1],
        "absent": counts[2],
        "sick": counts[3],
        "leave": counts[4],
        "remarks": remarks
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(respond(&req.id, list_attendance(state, req))),
        "attendance.set" => Some(respond(&req.id, set_attendance(state, req))),
        _ => None,
    }
}
