use crate::calc::{self, AttendanceEntry, GradeEntry, RosterEntry, ScoreBook, Subject};
use crate::db;
use crate::ipc::helpers::{db_conn, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::layout::{self, LayoutConfig, SchoolInfo, SheetInputs, SheetModel};
use serde::Deserialize;
use serde_json::json;

use super::settings;

fn page_number(params: &serde_json::Value) -> usize {
    params
        .get("pageNumber")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(1)
}

/// Request-level layout overrides apply on top of the saved section and are
/// not persisted.
fn with_overrides(mut cfg: LayoutConfig, params: &serde_json::Value) -> LayoutConfig {
    if let Some(patch) = params.get("layout").and_then(|v| v.as_object()) {
        cfg.apply_patch(patch);
    }
    cfg
}

fn class_sheet(state: &AppState, req: &Request) -> Result<SheetModel, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let inputs = calc::load_class_inputs(&calc::CalcContext {
        conn,
        class_id: &class_id,
    })?;

    let saved_layout = settings::load_layout(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let config = with_overrides(saved_layout, &req.params);
    let mut school = settings::load_school(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if school.academic_year.is_empty() {
        school.academic_year = inputs.class.academic_year.clone().unwrap_or_default();
    }

    let computation = calc::compute_class(
        &inputs.roster,
        &inputs.subjects,
        &ScoreBook::from_entries(&inputs.grades),
    );
    let model = layout::build_sheet(&SheetInputs {
        subjects: &inputs.subjects,
        roster: &inputs.roster,
        attendance: &inputs.attendance,
        computation: &computation,
        config: &config,
        school: &school,
        class_name: &inputs.class.name,
        page_number: page_number(&req.params),
        generated_at: Some(db::now_rfc3339()),
    });
    tracing::debug!(
        class_id = %class_id,
        students = computation.results.len(),
        subjects = inputs.subjects.len(),
        "result sheet built"
    );
    Ok(model)
}

fn class_results(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let inputs = calc::load_class_inputs(&calc::CalcContext {
        conn,
        class_id: &class_id,
    })?;
    let computation = calc::compute_class(
        &inputs.roster,
        &inputs.subjects,
        &ScoreBook::from_entries(&inputs.grades),
    );
    Ok(json!({
        "class": inputs.class,
        "subjects": inputs.subjects,
        "aggregates": computation.aggregates,
        "results": computation.results,
        "midtermSummary": computation.midterm,
        "annualSummary": computation.annual,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewParams {
    subjects: Vec<Subject>,
    roster: Vec<RosterEntry>,
    #[serde(default)]
    grades: Vec<GradeEntry>,
    #[serde(default)]
    attendance: Vec<AttendanceEntry>,
    #[serde(default)]
    school: Option<serde_json::Value>,
    #[serde(default)]
    class_name: String,
}

/// Same engine on caller-supplied data; needs no workspace.
fn preview_sheet(req: &Request) -> Result<SheetModel, HandlerErr> {
    let params: PreviewParams = serde_json::from_value(req.params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid preview data: {}", e)))?;

    let config = with_overrides(LayoutConfig::default(), &req.params);
    let school = SchoolInfo::resolve(params.school.as_ref());
    let computation = calc::compute_class(
        &params.roster,
        &params.subjects,
        &ScoreBook::from_entries(&params.grades),
    );
    Ok(layout::build_sheet(&SheetInputs {
        subjects: &params.subjects,
        roster: &params.roster,
        attendance: &params.attendance,
        computation: &computation,
        config: &config,
        school: &school,
        class_name: &params.class_name,
        page_number: page_number(&req.params),
        generated_at: None,
    }))
}

fn sheet_json(model: Result<SheetModel, HandlerErr>) -> Result<serde_json::Value, HandlerErr> {
    model.map(|m| json!(m))
}

fn sheet_csv(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let model = if req.params.get("classId").is_some() {
        class_sheet(state, req)?
    } else {
        preview_sheet(req)?
    };
    Ok(json!({
        "rowCount": model.row_count,
        "columnCount": model.column_count,
        "csv": layout::to_csv(&model),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.classResults" => Some(respond(&req.id, class_results(state, req))),
        "reports.resultSheetModel" => {
            Some(respond(&req.id, sheet_json(class_sheet(state, req))))
        }
        "reports.resultSheetPreview" => Some(respond(&req.id, sheet_json(preview_sheet(req)))),
        "reports.resultSheetCsv" => Some(respond(&req.id, sheet_csv(state, req))),
        _ => None,
    }
}
