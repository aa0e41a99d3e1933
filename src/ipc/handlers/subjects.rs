use crate::ipc::helpers::{db_conn, ensure_exists, next_sort_order, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn list_subjects(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_exists(conn, "classes", &class_id, "class")?;

    let mut stmt = conn
        .prepare("SELECT id, name, sort_order FROM subjects WHERE class_id = ? ORDER BY sort_order")
        .map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let sort_order: i64 = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "sortOrder": sort_order }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "subjects": subjects }))
}

fn create_subject(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let name = required_str(&req.params, "name")?;
    ensure_exists(conn, "classes", &class_id, "class")?;

    let sort_order = next_sort_order(conn, "subjects", &class_id)?;
    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, class_id, name, sort_order) VALUES(?, ?, ?, ?)",
        (&subject_id, &class_id, &name, sort_order),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "subjects", "name": name }))
    })?;
    Ok(json!({ "subjectId": subject_id, "name": name, "sortOrder": sort_order }))
}

fn delete_subject(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let subject_id = required_str(&req.params, "subjectId")?;
    ensure_exists(conn, "subjects", &subject_id, "subject")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (table, sql) in [
        ("grades", "DELETE FROM grades WHERE subject_id = ?"),
        ("subjects", "DELETE FROM subjects WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&subject_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": table })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(respond(&req.id, list_subjects(state, req))),
        "subjects.create" => Some(respond(&req.id, create_subject(state, req))),
        "subjects.delete" => Some(respond(&req.id, delete_subject(state, req))),
        _ => None,
    }
}
