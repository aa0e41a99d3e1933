use crate::db;
use crate::ipc::helpers::{db_conn, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::layout::{LayoutConfig, SchoolInfo};
use rusqlite::Connection;
use serde_json::json;

#[derive(Clone, Copy)]
enum SettingsSection {
    Layout,
    School,
}

impl SettingsSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "layout" => Some(Self::Layout),
            "school" => Some(Self::School),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Layout => "sheet.layout",
            Self::School => "sheet.school",
        }
    }
}

pub fn load_layout(conn: &Connection) -> anyhow::Result<LayoutConfig> {
    let saved = db::settings_get_json(conn, SettingsSection::Layout.key())?;
    Ok(LayoutConfig::resolve(saved.as_ref()))
}

pub fn load_school(conn: &Connection) -> anyhow::Result<SchoolInfo> {
    let saved = db::settings_get_json(conn, SettingsSection::School.key())?;
    Ok(SchoolInfo::resolve(saved.as_ref()))
}

fn get_settings(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let layout = load_layout(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let school = load_school(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "layout": layout, "school": school }))
}

fn update_settings(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SettingsSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section")
            .with_details(json!({ "section": section_raw })));
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let current = match section {
        SettingsSection::Layout => {
            let mut cfg =
                load_layout(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            cfg.apply_patch(patch);
            json!(cfg)
        }
        SettingsSection::School => {
            let mut info =
                load_school(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            info.apply_patch(patch);
            json!(info)
        }
    };
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::debug!(section = section.key(), "settings updated");
    Ok(json!({ "section": section_raw, "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(respond(&req.id, get_settings(state))),
        "settings.update" => Some(respond(&req.id, update_settings(state, req))),
        _ => None,
    }
}
