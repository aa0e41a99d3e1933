//! Class transfer bundles.
//!
//! A bundle is a zip holding `manifest.json` and `class.json`, the
//! resolved inputs of one class. Importing always creates a new class
//! with fresh ids, so a bundle can be moved between workspaces or loaded
//! twice into the same one.

use crate::calc::{ClassInputs, ScoreState};
use crate::db;
use crate::numerals::to_ascii_digits;
use anyhow::{anyhow, Context};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const CLASS_ENTRY: &str = "class.json";
pub const BUNDLE_FORMAT_V1: &str = "resultsheet-class-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub class_name: String,
    pub student_count: usize,
    pub subject_count: usize,
    pub grade_count: usize,
    pub class_sha256: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub class_id: String,
    pub class_name: String,
    pub student_count: usize,
    pub subject_count: usize,
    pub grade_count: usize,
    pub attendance_count: usize,
    /// Grades and attendance rows that were dropped on the way in.
    pub skipped: usize,
    /// Basis numbers already used in the target workspace.
    pub cleared_student_numbers: Vec<String>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn write_class_bundle(inputs: &ClassInputs, out_path: &Path) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let class_bytes = serde_json::to_vec_pretty(inputs).context("failed to serialize class")?;
    let class_sha256 = sha256_hex(&class_bytes);
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": db::now_rfc3339(),
        "className": inputs.class.name,
        "studentCount": inputs.roster.len(),
        "subjectCount": inputs.subjects.len(),
        "gradeCount": inputs.grades.len(),
        "attendanceCount": inputs.attendance.len(),
        "classSha256": class_sha256,
    });

    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;
    zip.start_file(CLASS_ENTRY, opts)
        .context("failed to start class entry")?;
    zip.write_all(&class_bytes)
        .context("failed to write class entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        class_name: inputs.class.name.clone(),
        student_count: inputs.roster.len(),
        subject_count: inputs.subjects.len(),
        grade_count: inputs.grades.len(),
        class_sha256,
    })
}

/// Opens a bundle and checks its format and checksum before decoding.
pub fn read_class_bundle(in_path: &Path) -> anyhow::Result<ClassInputs> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_sha = manifest
        .get("classSha256")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut class_bytes = Vec::new();
    archive
        .by_name(CLASS_ENTRY)
        .context("bundle missing class.json")?
        .read_to_end(&mut class_bytes)
        .context("failed to extract class entry")?;
    let actual_sha = sha256_hex(&class_bytes);
    if actual_sha != expected_sha {
        return Err(anyhow!(
            "class checksum mismatch: manifest {} vs bundle {}",
            expected_sha,
            actual_sha
        ));
    }

    serde_json::from_slice(&class_bytes).context("class.json is not a class snapshot")
}

fn basis_number_taken(conn: &Connection, student_no: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM students WHERE student_no = ?",
        [student_no],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn non_blank(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

/// Inserts the snapshot as a new class. Every row gets a new id and the
/// snapshot order becomes the stored sort order.
pub fn import_class(
    conn: &Connection,
    inputs: &ClassInputs,
    name_override: Option<&str>,
) -> rusqlite::Result<ImportSummary> {
    let tx = conn.unchecked_transaction()?;
    let now = db::now_rfc3339();

    let class_id = Uuid::new_v4().to_string();
    let class_name = name_override
        .and_then(non_blank)
        .unwrap_or(inputs.class.name.as_str())
        .to_string();
    tx.execute(
        "INSERT INTO classes(id, name, academic_year, updated_at) VALUES(?, ?, ?, ?)",
        (&class_id, &class_name, &inputs.class.academic_year, &now),
    )?;

    let mut summary = ImportSummary {
        class_id: class_id.clone(),
        class_name,
        ..ImportSummary::default()
    };

    let mut subject_ids: HashMap<&str, String> = HashMap::new();
    let mut subject_names: HashSet<&str> = HashSet::new();
    for subject in &inputs.subjects {
        let Some(name) = non_blank(&subject.name) else {
            continue;
        };
        if !subject_names.insert(name) || subject_ids.contains_key(subject.id.as_str()) {
            continue;
        }
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO subjects(id, class_id, name, sort_order) VALUES(?, ?, ?, ?)",
            (&id, &class_id, name, subject_ids.len() as i64),
        )?;
        subject_ids.insert(subject.id.as_str(), id);
    }
    summary.subject_count = subject_ids.len();

    let mut student_ids: HashMap<&str, String> = HashMap::new();
    let mut seen_numbers: HashSet<String> = HashSet::new();
    for entry in inputs.roster.iter().filter(|e| !e.is_empty) {
        let Some(name) = non_blank(&entry.name) else {
            continue;
        };
        if student_ids.contains_key(entry.id.as_str()) {
            continue;
        }
        let mut student_no = non_blank(&entry.student_id).map(to_ascii_digits);
        if let Some(no) = student_no.clone() {
            if !seen_numbers.insert(no.clone()) || basis_number_taken(&tx, &no)? {
                summary.cleared_student_numbers.push(no);
                student_no = None;
            }
        }
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO students(id, class_id, name, father_name, grandfather_name, student_no, tazkira_no, sort_order, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                &id,
                &class_id,
                name,
                non_blank(&entry.father_name),
                non_blank(&entry.grandfather_name),
                &student_no,
                non_blank(&entry.tazkira_no).map(to_ascii_digits),
                student_ids.len() as i64,
                &now,
            ],
        )?;
        student_ids.insert(entry.id.as_str(), id);
    }
    summary.student_count = student_ids.len();

    for grade in &inputs.grades {
        let student = student_ids.get(grade.student_id.as_str());
        let subject = subject_ids.get(grade.subject_id.as_str());
        let score = match grade.score {
            ScoreState::Present(v) if (0.0..=grade.exam_type.max_score()).contains(&v) => Some(v),
            _ => None,
        };
        let (Some(student), Some(subject), Some(score)) = (student, subject, score) else {
            summary.skipped += 1;
            continue;
        };
        let changed = tx.execute(
            "INSERT INTO grades(id, student_id, subject_id, exam_type, score, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, exam_type) DO NOTHING",
            (
                Uuid::new_v4().to_string(),
                student,
                subject,
                grade.exam_type.as_str(),
                score,
                &now,
            ),
        )?;
        if changed == 0 {
            summary.skipped += 1;
        } else {
            summary.grade_count += 1;
        }
    }

    for record in &inputs.attendance {
        let Some(student) = student_ids.get(record.student_id.as_str()) else {
            summary.skipped += 1;
            continue;
        };
        let c = &record.counts;
        let changed = tx.execute(
            "INSERT INTO attendance(id, student_id, exam_type, days, present, absent, sick, leave, remarks, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, exam_type) DO NOTHING",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                student,
                record.exam_type.as_str(),
                c.days,
                c.present,
                c.absent,
                c.sick,
                c.leave,
                record.remarks.as_deref().and_then(non_blank),
                &now,
            ],
        )?;
        if changed == 0 {
            summary.skipped += 1;
        } else {
            summary.attendance_count += 1;
        }
    }

    tx.commit()?;
    Ok(summary)
}
