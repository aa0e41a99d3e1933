use crate::bundle;
use crate::calc::{self, CalcContext};
use crate::ipc::helpers::{db_conn, optional_str, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn export_class(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let out_path = required_str(&req.params, "outPath")?;

    let inputs = calc::load_class_inputs(&CalcContext {
        conn,
        class_id: &class_id,
    })?;
    let export = bundle::write_class_bundle(&inputs, &PathBuf::from(&out_path)).map_err(|e| {
        tracing::warn!(error = %e, "class bundle export failed");
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;

    tracing::info!(class_id = %class_id, path = %out_path, "class bundle exported");
    Ok(json!({
        "path": out_path,
        "bundleFormat": bundle::BUNDLE_FORMAT_V1,
        "className": export.class_name,
        "studentCount": export.student_count,
        "subjectCount": export.subject_count,
        "gradeCount": export.grade_count,
        "sha256": export.class_sha256
    }))
}

fn import_class(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let in_path = required_str(&req.params, "inPath")?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }
    let inputs = bundle::read_class_bundle(&src).map_err(|e| {
        tracing::warn!(error = %e, "class bundle rejected");
        HandlerErr::new("invalid_bundle", e.to_string()).with_details(json!({ "path": in_path }))
    })?;

    let name = optional_str(&req.params, "name");
    let summary = bundle::import_class(conn, &inputs, name.as_deref()).map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })?;

    tracing::info!(
        class_id = %summary.class_id,
        skipped = summary.skipped,
        "class bundle imported"
    );
    Ok(json!({
        "classId": summary.class_id,
        "className": summary.class_name,
        "studentCount": summary.student_count,
        "subjectCount": summary.subject_count,
        "gradeCount": summary.grade_count,
        "attendanceCount": summary.attendance_count,
        "skipped": summary.skipped,
        "clearedStudentNumbers": summary.cleared_student_numbers
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bundle.exportClass" => Some(respond(&req.id, export_class(state, req))),
        "bundle.importClass" => Some(respond(&req.id, import_class(state, req))),
        _ => None,
    }
}
