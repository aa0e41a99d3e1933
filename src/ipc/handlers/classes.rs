use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, ensure_exists, optional_str, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.academic_year,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM subjects sub WHERE sub.class_id = c.id) AS subject_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return HandlerErr::query(e).response(&req.id),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let academic_year: Option<String> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let subject_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "academicYear": academic_year,
                "studentCount": student_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => HandlerErr::query(e).response(&req.id),
    }
}

fn create_class(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = required_str(&req.params, "name")?;
    let academic_year = optional_str(&req.params, "academicYear").filter(|s| !s.is_empty());

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, academic_year, updated_at) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &academic_year, db::now_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "classes" }))
    })?;

    tracing::info!(class_id = %class_id, "class created");
    Ok(json!({ "classId": class_id, "name": name, "academicYear": academic_year }))
}

fn update_class(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_exists(conn, "classes", &class_id, "class")?;

    if let Some(name) = optional_str(&req.params, "name") {
        if name.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        conn.execute(
            "UPDATE classes SET name = ?, updated_at = ? WHERE id = ?",
            (&name, db::now_rfc3339(), &class_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(year) = optional_str(&req.params, "academicYear") {
        let year = (!year.is_empty()).then_some(year);
        conn.execute(
            "UPDATE classes SET academic_year = ?, updated_at = ? WHERE id = ?",
            (&year, db::now_rfc3339(), &class_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "ok": true }))
}

fn delete_class(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_exists(conn, "classes", &class_id, "class")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // No ON DELETE CASCADE; remove dependents first.
    let steps: [(&str, &str); 5] = [
        (
            "grades",
            "DELETE FROM grades WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        ),
        (
            "attendance",
            "DELETE FROM attendance WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        ),
        ("students", "DELETE FROM students WHERE class_id = ?"),
        ("subjects", "DELETE FROM subjects WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&class_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": table })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tracing::info!(class_id = %class_id, "class deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(respond(&req.id, create_class(state, req))),
        "classes.update" => Some(respond(&req.id, update_class(state, req))),
        "classes.delete" => Some(respond(&req.id, delete_class(state, req))),
        _ => None,
    }
}
