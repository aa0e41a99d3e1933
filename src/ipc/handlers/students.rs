use crate::db;
use crate::ipc::helpers::{
    db_conn, ensure_exists, next_sort_order, optional_str, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::numerals::to_ascii_digits;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const STUDENT_COLUMNS: &str =
    "id, class_id, name, father_name, grandfather_name, student_no, tazkira_no, sort_order";

fn student_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let class_id: String = r.get(1)?;
    let name: String = r.get(2)?;
    let father_name: Option<String> = r.get(3)?;
    let grandfather_name: Option<String> = r.get(4)?;
    let student_no: Option<String> = r.get(5)?;
    let tazkira_no: Option<String> = r.get(6)?;
    let sort_order: i64 = r.get(7)?;
    Ok(json!({
        "id": id,
        "classId": class_id,
        "name": name,
        "fatherName": father_name.unwrap_or_default(),
        "grandfatherName": grandfather_name.unwrap_or_default(),
        "studentId": student_no.unwrap_or_default(),
        "tazkiraNo": tazkira_no.unwrap_or_default(),
        "sortOrder": sort_order
    }))
}

/// Basis and tazkira numbers are stored with ASCII digits whatever script
/// they were typed in.
/// Blank numbers are stored as NULL so they never collide.
fn id_number(params: &serde_json::Value, key: &str) -> Option<String> {
    optional_str(params, key)
        .map(|s| to_ascii_digits(s.trim()))
        .filter(|s| !s.is_empty())
}

fn basis_number_taken(
    conn: &Connection,
    student_no: &str,
    except_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE student_no = ? AND id <> COALESCE(?, '')",
            (student_no, except_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(found.is_some())
}

fn list_students(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    ensure_exists(conn, "classes", &class_id, "class")?;

    let sql = format!(
        "SELECT {} FROM students WHERE class_id = ? ORDER BY sort_order",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&class_id], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students }))
}

fn create_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let name = required_str(&req.params, "name")?;
    ensure_exists(conn, "classes", &class_id, "class")?;

    let student_no = id_number(&req.params, "studentId");
    if let Some(no) = student_no.as_deref() {
        if basis_number_taken(conn, no, None)? {
            return Err(HandlerErr::bad_params("basis number already in use")
                .with_details(json!({ "studentId": no })));
        }
    }

    let sort_order = next_sort_order(conn, "students", &class_id)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, name, father_name, grandfather_name, student_no, tazkira_no, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &class_id,
            &name,
            optional_str(&req.params, "fatherName"),
            optional_str(&req.params, "grandfatherName"),
            &student_no,
            id_number(&req.params, "tazkiraNo"),
            sort_order,
            db::now_rfc3339(),
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;

    tracing::info!(student = %id, class_id = %class_id, "student created");
    Ok(json!({ "studentId": id, "sortOrder": sort_order }))
}

fn update_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(&req.params, "id")?;
    ensure_exists(conn, "students", &id, "student")?;

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (key, value) in patch {
        let column = match key.as_str() {
            "name" => "name",
            "fatherName" => "father_name",
            "grandfatherName" => "grandfather_name",
            "studentId" => "student_no",
            "tazkiraNo" => "tazkira_no",
            other => {
                return Err(HandlerErr::bad_params(format!("unknown student field: {}", other)))
            }
        };
        let Some(text) = value.as_str().map(|s| s.trim().to_string()) else {
            return Err(HandlerErr::bad_params(format!("{} must be a string", key)));
        };
        if column == "name" && text.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        let stored: Option<String> = match column {
            "student_no" | "tazkira_no" => Some(to_ascii_digits(&text)).filter(|s| !s.is_empty()),
            _ => Some(text),
        };
        if column == "student_no" {
            if let Some(no) = stored.as_deref() {
                if basis_number_taken(&tx, no, Some(&id))? {
                    return Err(HandlerErr::bad_params("basis number already in use")
                        .with_details(json!({ "studentId": no })));
                }
            }
        }
        let sql = format!(
            "UPDATE students SET {} = ?, updated_at = ? WHERE id = ?",
            column
        );
        tx.execute(&sql, (&stored, db::now_rfc3339(), &id))
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn delete_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(&req.params, "id")?;
    ensure_exists(conn, "students", &id, "student")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (table, sql) in [
        ("grades", "DELETE FROM grades WHERE student_id = ?"),
        ("attendance", "DELETE FROM attendance WHERE student_id = ?"),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": table })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

/// Resolves a scanned or typed basis number to its student.
fn lookup_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_no = to_ascii_digits(&required_str(&req.params, "studentId")?);

    let sql = format!(
        "SELECT {} FROM students WHERE student_no = ?",
        STUDENT_COLUMNS
    );
    let found = conn
        .query_row(&sql, [&student_no], student_json)
        .optional()
        .map_err(HandlerErr::query)?;
    match found {
        Some(student) => Ok(json!({ "student": student })),
        None => Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_no }))),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(respond(&req.id, list_students(state, req))),
        "students.create" => Some(respond(&req.id, create_student(state, req))),
        "students.update" => Some(respond(&req.id, update_student(state, req))),
        "students.delete" => Some(respond(&req.id, delete_student(state, req))),
        "students.lookup" => Some(respond(&req.id, lookup_student(state, req))),
        _ => None,
    }
}
