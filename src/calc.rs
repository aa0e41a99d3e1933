use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::numerals;

pub const MIDTERM_MAX: f64 = 40.0;
pub const FINAL_MAX: f64 = 60.0;
/// Minimum subject total and minimum average for promotion.
pub const PASS_MARK: f64 = 40.0;
/// Half of the midterm ceiling; used by the midterm cohort table only.
pub const MIDTERM_PASS_AVERAGE: f64 = MIDTERM_MAX / 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamType {
    Midterm,
    Final,
}

impl ExamType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MIDTERM" => Some(Self::Midterm),
            "FINAL" => Some(Self::Final),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Midterm => "MIDTERM",
            Self::Final => "FINAL",
        }
    }

    pub fn max_score(self) -> f64 {
        match self {
            Self::Midterm => MIDTERM_MAX,
            Self::Final => FINAL_MAX,
        }
    }
}

/// Presence-aware score. An explicit zero is `Present(0.0)` and takes part in
/// every calculation; `Absent` means no entry was ever made.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ScoreState {
    #[default]
    Absent,
    Present(f64),
}

impl ScoreState {
    /// Forgiving text parse: blank is absent, anything else is present and
    /// falls back to zero when no leading number can be read.
    pub fn parse(raw: &str) -> Self {
        let normalized = numerals::to_ascii_digits(raw);
        let t = normalized.trim();
        if t.is_empty() {
            return Self::Absent;
        }
        Self::Present(parse_leading_float(t).unwrap_or(0.0))
    }

    /// Only `null` and blank text are absent. Any other non-number,
    /// including objects and arrays, reads as a present zero.
    pub fn from_json(raw: &serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Null => Self::Absent,
            serde_json::Value::Number(n) => Self::Present(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::parse(s),
            serde_json::Value::Bool(_)
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => Self::Present(0.0),
        }
    }

    pub fn is_present(self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Absent => None,
            Self::Present(v) => Some(v),
        }
    }

    pub fn value_or_zero(self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

impl Serialize for ScoreState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent => serializer.serialize_none(),
            Self::Present(v) => serializer.serialize_f64(*v),
        }
    }
}

impl<'de> Deserialize<'de> for ScoreState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&raw))
    }
}

/// Reads the longest numeric prefix, the way a browser's `parseFloat` does:
/// `"12.5kg"` is 12.5, `"abc"` is `None`.
pub fn parse_leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0usize;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    if s[end..].starts_with("Infinity") {
        return s[..end + "Infinity".len()].replace("Infinity", "inf").parse().ok();
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        end = frac_end;
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].trim_end_matches('.').parse::<f64>().ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
}

/// One seat on the sheet. Placeholders (`is_empty`) pad the roster for
/// layout and are ignored by every calculation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub father_name: String,
    pub grandfather_name: String,
    /// Basis number assigned by the school.
    pub student_id: String,
    pub tazkira_no: String,
    pub is_empty: bool,
}

impl RosterEntry {
    pub fn placeholder() -> Self {
        Self {
            is_empty: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub student_id: String,
    pub subject_id: String,
    #[serde(rename = "type")]
    pub exam_type: ExamType,
    #[serde(default)]
    pub score: ScoreState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceCounts {
    #[serde(default, deserialize_with = "lenient_count")]
    pub days: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub present: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub absent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub sick: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub leave: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub student_id: String,
    #[serde(rename = "type")]
    pub exam_type: ExamType,
    #[serde(flatten)]
    pub counts: AttendanceCounts,
    #[serde(default)]
    pub remarks: Option<String>,
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(ScoreState::from_json(&raw).value())
}

/// Keyed lookup replacing the nested `scores[student][subject][type]` shape.
#[derive(Debug, Clone, Default)]
pub struct ScoreBook {
    entries: HashMap<(String, String, ExamType), ScoreState>,
}

impl ScoreBook {
    pub fn from_entries(entries: &[GradeEntry]) -> Self {
        let mut book = Self::default();
        for e in entries {
            book.insert(&e.student_id, &e.subject_id, e.exam_type, e.score);
        }
        book
    }

    pub fn insert(&mut self, student_id: &str, subject_id: &str, exam: ExamType, score: ScoreState) {
        self.entries
            .insert((student_id.to_string(), subject_id.to_string(), exam), score);
    }

    pub fn get(&self, student_id: &str, subject_id: &str, exam: ExamType) -> ScoreState {
        self.entries
            .get(&(student_id.to_string(), subject_id.to_string(), exam))
            .copied()
            .unwrap_or(ScoreState::Absent)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject_id: String,
    pub midterm: ScoreState,
    #[serde(rename = "final")]
    pub final_score: ScoreState,
    pub total: f64,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub student_id: String,
    pub subjects: Vec<SubjectScore>,
    pub has_any_data: bool,
    pub has_midterm: bool,
    pub has_final: bool,
    pub mid_total: f64,
    pub final_total: f64,
    pub total: f64,
    pub average: f64,
    pub fail_count: usize,
}

pub fn aggregate_student(student_id: &str, subjects: &[Subject], book: &ScoreBook) -> StudentAggregate {
    let mut per_subject = Vec::with_capacity(subjects.len());
    let mut has_midterm = false;
    let mut has_final = false;
    let mut mid_total = 0.0_f64;
    let mut final_total = 0.0_f64;
    let mut total = 0.0_f64;
    let mut fail_count = 0usize;

    for subject in subjects {
        let mid = book.get(student_id, &subject.id, ExamType::Midterm);
        let fin = book.get(student_id, &subject.id, ExamType::Final);
        has_midterm |= mid.is_present();
        has_final |= fin.is_present();

        let subject_total = mid.value_or_zero() + fin.value_or_zero();
        // Only a subject with both halves entered can fail.
        let failed = mid.is_present() && fin.is_present() && subject_total < PASS_MARK;
        if failed {
            fail_count += 1;
        }

        mid_total += mid.value_or_zero();
        final_total += fin.value_or_zero();
        total += subject_total;
        per_subject.push(SubjectScore {
            subject_id: subject.id.clone(),
            midterm: mid,
            final_score: fin,
            total: subject_total,
            failed,
        });
    }

    let average = if subjects.is_empty() {
        0.0
    } else {
        total / subjects.len() as f64
    };

    StudentAggregate {
        student_id: student_id.to_string(),
        subjects: per_subject,
        has_any_data: has_midterm || has_final,
        has_midterm,
        has_final,
        mid_total,
        final_total,
        total,
        average,
        fail_count,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    None,
    Pass,
    Conditional,
    Fail,
    InProgress,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Pass => "کامیاب",
            Self::Conditional => "مشروط",
            Self::Fail => "ناکام",
            Self::InProgress => "در جریان",
        }
    }
}

/// Branch order matters: it is what makes `InProgress` a pure fallback.
pub fn classify(has_any_data: bool, fail_count: usize, average: f64) -> Outcome {
    if !has_any_data {
        Outcome::None
    } else if fail_count == 0 && average >= PASS_MARK {
        Outcome::Pass
    } else if (1..=2).contains(&fail_count) && average >= PASS_MARK {
        Outcome::Conditional
    } else if average < PASS_MARK || fail_count >= 3 {
        Outcome::Fail
    } else {
        Outcome::InProgress
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student_id: String,
    pub mid_total: f64,
    pub final_total: f64,
    pub total: f64,
    pub average: f64,
    pub fail_count: usize,
    pub result: Outcome,
    pub result_label: String,
    pub rank: Option<usize>,
}

impl StudentResult {
    pub fn from_aggregate(agg: &StudentAggregate) -> Self {
        let result = classify(agg.has_any_data, agg.fail_count, agg.average);
        Self {
            student_id: agg.student_id.clone(),
            mid_total: agg.mid_total,
            final_total: agg.final_total,
            total: agg.total,
            average: agg.average,
            fail_count: agg.fail_count,
            result,
            result_label: result.label().to_string(),
            rank: None,
        }
    }
}

/// Ranks passing students 1..N by grand total, highest first. Equal totals
/// keep roster order (the sort is stable), so no two students share a rank.
pub fn assign_ranks(results: &mut [StudentResult]) {
    let mut passing: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.result == Outcome::Pass)
        .map(|(i, _)| i)
        .collect();
    passing.sort_by(|a, b| {
        results[*b]
            .total
            .partial_cmp(&results[*a].total)
            .unwrap_or(Ordering::Equal)
    });

    for r in results.iter_mut() {
        r.rank = None;
    }
    for (pos, idx) in passing.into_iter().enumerate() {
        results[idx].rank = Some(pos + 1);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MidtermSummary {
    pub enrolled: usize,
    pub tested: usize,
    pub passed: usize,
    pub failed: usize,
    pub absent: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualSummary {
    pub enrolled: usize,
    pub tested: usize,
    pub passed: usize,
    pub conditional: usize,
    pub failed: usize,
    pub failed_or_conditional: usize,
    pub absent: usize,
}

pub fn midterm_summary(aggregates: &[StudentAggregate], subject_count: usize) -> MidtermSummary {
    let enrolled = aggregates.len();
    let tested = aggregates.iter().filter(|a| a.has_midterm).count();
    let passed = aggregates
        .iter()
        .filter(|a| subject_count > 0 && a.mid_total / subject_count as f64 >= MIDTERM_PASS_AVERAGE)
        .count();
    MidtermSummary {
        enrolled,
        tested,
        passed,
        failed: tested.saturating_sub(passed),
        absent: enrolled.saturating_sub(tested),
    }
}

pub fn annual_summary(aggregates: &[StudentAggregate], results: &[StudentResult]) -> AnnualSummary {
    let enrolled = aggregates.len();
    let tested = aggregates.iter().filter(|a| a.has_final).count();
    let count = |o: Outcome| results.iter().filter(|r| r.result == o).count();
    let conditional = count(Outcome::Conditional);
    let failed = count(Outcome::Fail);
    AnnualSummary {
        enrolled,
        tested,
        passed: count(Outcome::Pass),
        conditional,
        failed,
        failed_or_conditional: conditional + failed,
        absent: enrolled.saturating_sub(tested),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassComputation {
    pub aggregates: Vec<StudentAggregate>,
    pub results: Vec<StudentResult>,
    pub midterm: MidtermSummary,
    pub annual: AnnualSummary,
}

impl ClassComputation {
    pub fn aggregate_for(&self, student_id: &str) -> Option<&StudentAggregate> {
        self.aggregates.iter().find(|a| a.student_id == student_id)
    }

    pub fn result_for(&self, student_id: &str) -> Option<&StudentResult> {
        self.results.iter().find(|r| r.student_id == student_id)
    }
}

/// Full recompute over one roster snapshot. Placeholders never reach the
/// aggregates, results, ranks or cohort counts.
pub fn compute_class(roster: &[RosterEntry], subjects: &[Subject], book: &ScoreBook) -> ClassComputation {
    let aggregates: Vec<StudentAggregate> = roster
        .iter()
        .filter(|s| !s.is_empty)
        .map(|s| aggregate_student(&s.id, subjects, book))
        .collect();
    let mut results: Vec<StudentResult> =
        aggregates.iter().map(StudentResult::from_aggregate).collect();
    assign_ranks(&mut results);

    let midterm = midterm_summary(&aggregates, subjects.len());
    let annual = annual_summary(&aggregates, &results);

    ClassComputation {
        aggregates,
        results,
        midterm,
        annual,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub class_id: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub id: String,
    pub name: String,
    pub academic_year: Option<String>,
}

/// Everything the engine needs for one class, already resolved from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInputs {
    pub class: ClassSummary,
    pub subjects: Vec<Subject>,
    pub roster: Vec<RosterEntry>,
    pub grades: Vec<GradeEntry>,
    pub attendance: Vec<AttendanceEntry>,
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

pub fn load_class_inputs(ctx: &CalcContext<'_>) -> Result<ClassInputs, CalcError> {
    let conn = ctx.conn;
    let class_id = ctx.class_id;

    let class_row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT name, academic_year FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((class_name, academic_year)) = class_row else {
        return Err(CalcError::new("not_found", "class not found"));
    };

    let mut subjects_stmt = conn
        .prepare("SELECT id, name FROM subjects WHERE class_id = ? ORDER BY sort_order")
        .map_err(db_err)?;
    let subjects: Vec<Subject> = subjects_stmt
        .query_map([class_id], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut students_stmt = conn
        .prepare(
            "SELECT id, name, father_name, grandfather_name, student_no, tazkira_no
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let roster: Vec<RosterEntry> = students_stmt
        .query_map([class_id], |r| {
            Ok(RosterEntry {
                id: r.get(0)?,
                name: r.get(1)?,
                father_name: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                grandfather_name: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                student_id: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                tazkira_no: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                is_empty: false,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut grades_stmt = conn
        .prepare(
            "SELECT g.student_id, g.subject_id, g.exam_type, g.score
             FROM grades g
             JOIN students s ON s.id = g.student_id
             JOIN subjects sub ON sub.id = g.subject_id AND sub.class_id = s.class_id
             WHERE s.class_id = ?",
        )
        .map_err(db_err)?;
    let grade_rows = grades_stmt
        .query_map([class_id], |r| {
            let student_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let exam: String = r.get(2)?;
            let score: f64 = r.get(3)?;
            Ok((student_id, subject_id, exam, score))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    let grades: Vec<GradeEntry> = grade_rows
        .into_iter()
        .filter_map(|(student_id, subject_id, exam, score)| {
            ExamType::parse(&exam).map(|exam_type| GradeEntry {
                student_id,
                subject_id,
                exam_type,
                score: ScoreState::Present(score),
            })
        })
        .collect();

    let mut attendance_stmt = conn
        .prepare(
            "SELECT a.student_id, a.exam_type, a.days, a.present, a.absent, a.sick, a.leave, a.remarks
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE s.class_id = ?",
        )
        .map_err(db_err)?;
    let attendance_rows = attendance_stmt
        .query_map([class_id], |r| {
            let student_id: String = r.get(0)?;
            let exam: String = r.get(1)?;
            let counts = AttendanceCounts {
                days: r.get(2)?,
                present: r.get(3)?,
                absent: r.get(4)?,
                sick: r.get(5)?,
                leave: r.get(6)?,
            };
            let remarks: Option<String> = r.get(7)?;
            Ok((student_id, exam, counts, remarks))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    let attendance: Vec<AttendanceEntry> = attendance_rows
        .into_iter()
        .filter_map(|(student_id, exam, counts, remarks)| {
            ExamType::parse(&exam).map(|exam_type| AttendanceEntry {
                student_id,
                exam_type,
                counts,
                remarks,
            })
        })
        .collect();

    Ok(ClassInputs {
        class: ClassSummary {
            id: class_id.to_string(),
            name: class_name,
            academic_year,
        },
        subjects,
        roster,
        grades,
        attendance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects(n: usize) -> Vec<Subject> {
        (1..=n)
            .map(|i| Subject {
                id: format!("sub{}", i),
                name: format!("Subject {}", i),
            })
            .collect()
    }

    fn student(id: &str) -> RosterEntry {
        RosterEntry {
            id: id.to_string(),
            name: id.to_uppercase(),
            ..RosterEntry::default()
        }
    }

    fn book(rows: &[(&str, &str, f64, f64)]) -> ScoreBook {
        let mut b = ScoreBook::default();
        for (stu, sub, mid, fin) in rows {
            b.insert(stu, sub, ExamType::Midterm, ScoreState::Present(*mid));
            b.insert(stu, sub, ExamType::Final, ScoreState::Present(*fin));
        }
        b
    }

    #[test]
    fn blank_is_absent_but_garbage_is_zero() {
        assert_eq!(ScoreState::parse(""), ScoreState::Absent);
        assert_eq!(ScoreState::parse("   "), ScoreState::Absent);
        assert_eq!(ScoreState::parse("abc"), ScoreState::Present(0.0));
        assert_eq!(ScoreState::parse("0"), ScoreState::Present(0.0));
        assert_eq!(ScoreState::parse("35.5"), ScoreState::Present(35.5));
        assert_eq!(ScoreState::parse("12kg"), ScoreState::Present(12.0));
        assert_eq!(ScoreState::parse("۳۸"), ScoreState::Present(38.0));
        assert_eq!(ScoreState::from_json(&serde_json::Value::Null), ScoreState::Absent);
        assert_eq!(ScoreState::from_json(&serde_json::json!(17)), ScoreState::Present(17.0));
    }

    #[test]
    fn structured_json_scores_are_present_zero() {
        assert_eq!(
            ScoreState::from_json(&serde_json::json!({ "value": 35 })),
            ScoreState::Present(0.0)
        );
        assert_eq!(ScoreState::from_json(&serde_json::json!([35])), ScoreState::Present(0.0));
        assert_eq!(ScoreState::from_json(&serde_json::json!([])), ScoreState::Present(0.0));
        assert_eq!(ScoreState::from_json(&serde_json::json!(true)), ScoreState::Present(0.0));
        assert_eq!(ScoreState::from_json(&serde_json::json!("")), ScoreState::Absent);
    }

    #[test]
    fn leading_float_matches_parse_float_rules() {
        assert_eq!(parse_leading_float("-3.25e1x"), Some(-32.5));
        assert_eq!(parse_leading_float(".5"), Some(0.5));
        assert_eq!(parse_leading_float("7."), Some(7.0));
        assert_eq!(parse_leading_float("1e"), Some(1.0));
        assert_eq!(parse_leading_float("."), None);
        assert_eq!(parse_leading_float("-"), None);
        assert_eq!(parse_leading_float("Infinity"), Some(f64::INFINITY));
    }

    #[test]
    fn subject_totals_and_average_use_subject_count() {
        let subs = subjects(2);
        let b = book(&[("a", "sub1", 35.0, 50.0), ("a", "sub2", 20.0, 15.0)]);
        let agg = aggregate_student("a", &subs, &b);
        assert_eq!(agg.subjects[0].total, 85.0);
        assert_eq!(agg.subjects[1].total, 35.0);
        assert_eq!(agg.total, 120.0);
        assert_eq!(agg.average, 60.0);
        assert_eq!(agg.mid_total, 55.0);
        assert_eq!(agg.final_total, 65.0);
        assert_eq!(agg.fail_count, 1);
        assert!(agg.subjects[1].failed);
    }

    #[test]
    fn half_entered_subject_never_fails() {
        let subs = subjects(1);
        let mut b = ScoreBook::default();
        b.insert("a", "sub1", ExamType::Midterm, ScoreState::Present(10.0));
        let agg = aggregate_student("a", &subs, &b);
        assert_eq!(agg.fail_count, 0);
        assert_eq!(agg.total, 10.0);
        assert!(agg.has_any_data);
        assert!(agg.has_midterm);
        assert!(!agg.has_final);
    }

    #[test]
    fn explicit_zero_counts_as_data() {
        let subs = subjects(1);
        let b = book(&[("a", "sub1", 0.0, 0.0)]);
        let agg = aggregate_student("a", &subs, &b);
        assert!(agg.has_any_data);
        assert_eq!(agg.fail_count, 1);
        assert_eq!(
            classify(agg.has_any_data, agg.fail_count, agg.average),
            Outcome::Fail
        );
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify(false, 0, 90.0), Outcome::None);
        assert_eq!(classify(true, 0, 40.0), Outcome::Pass);
        assert_eq!(classify(true, 0, 39.99), Outcome::Fail);
        assert_eq!(classify(true, 1, 40.0), Outcome::Conditional);
        assert_eq!(classify(true, 2, 40.0), Outcome::Conditional);
        assert_eq!(classify(true, 3, 95.0), Outcome::Fail);
        assert_eq!(classify(true, 2, 10.0), Outcome::Fail);
    }

    #[test]
    fn in_progress_is_the_residual_bucket() {
        // A non-comparable average slips past every ordered branch.
        assert_eq!(classify(true, 1, f64::NAN), Outcome::InProgress);
        assert_eq!(Outcome::InProgress.label(), "در جریان");
        assert_eq!(Outcome::None.label(), "");
    }

    #[test]
    fn ranks_only_passing_students_by_total() {
        let roster = vec![student("a"), student("b"), student("c"), student("d")];
        let subs = subjects(1);
        let b = book(&[
            ("a", "sub1", 30.0, 40.0),
            ("b", "sub1", 38.0, 55.0),
            ("c", "sub1", 10.0, 10.0),
            ("d", "sub1", 30.0, 40.0),
        ]);
        let comp = compute_class(&roster, &subs, &b);
        let rank = |id: &str| comp.result_for(id).and_then(|r| r.rank);
        assert_eq!(rank("b"), Some(1));
        // Equal totals: roster order decides.
        assert_eq!(rank("a"), Some(2));
        assert_eq!(rank("d"), Some(3));
        assert_eq!(rank("c"), None);
    }

    #[test]
    fn reference_scenario_with_placeholders() {
        let mut roster = vec![student("a"), student("b"), student("c")];
        roster.extend(std::iter::repeat_with(RosterEntry::placeholder).take(4));
        let subs = subjects(2);
        let b = book(&[
            ("a", "sub1", 35.0, 50.0),
            ("a", "sub2", 20.0, 15.0),
            ("b", "sub1", 30.0, 45.0),
            ("b", "sub2", 25.0, 40.0),
        ]);
        let comp = compute_class(&roster, &subs, &b);
        assert_eq!(comp.results.len(), 3);

        let a = comp.result_for("a").expect("a");
        assert_eq!(a.average, 60.0);
        assert_eq!(a.fail_count, 1);
        assert_eq!(a.result, Outcome::Conditional);
        assert_eq!(a.rank, None);

        let b_res = comp.result_for("b").expect("b");
        assert_eq!(b_res.result, Outcome::Pass);
        assert_eq!(b_res.rank, Some(1));

        let c = comp.result_for("c").expect("c");
        assert_eq!(c.result, Outcome::None);
        assert_eq!(c.result_label, "");

        assert_eq!(
            comp.annual,
            AnnualSummary {
                enrolled: 3,
                tested: 2,
                passed: 1,
                conditional: 1,
                failed: 0,
                failed_or_conditional: 1,
                absent: 1,
            }
        );
        // Midterm: a averages 27.5, b averages 27.5.
        assert_eq!(
            comp.midterm,
            MidtermSummary {
                enrolled: 3,
                tested: 2,
                passed: 2,
                failed: 0,
                absent: 1,
            }
        );
    }

    #[test]
    fn midterm_pass_uses_half_the_midterm_ceiling() {
        let roster = vec![student("a"), student("b")];
        let subs = subjects(2);
        let b = book(&[
            ("a", "sub1", 20.0, 0.0),
            ("a", "sub2", 20.0, 0.0),
            ("b", "sub1", 19.0, 0.0),
            ("b", "sub2", 20.0, 0.0),
        ]);
        let comp = compute_class(&roster, &subs, &b);
        assert_eq!(comp.midterm.tested, 2);
        assert_eq!(comp.midterm.passed, 1);
        assert_eq!(comp.midterm.failed, 1);
    }

    #[test]
    fn grade_entries_deserialize_forgivingly() {
        let raw = serde_json::json!([
            { "studentId": "a", "subjectId": "s", "type": "MIDTERM", "score": "31" },
            { "studentId": "a", "subjectId": "s", "type": "FINAL", "score": null },
            { "studentId": "b", "subjectId": "s", "type": "FINAL" }
        ]);
        let entries: Vec<GradeEntry> = serde_json::from_value(raw).expect("entries");
        assert_eq!(entries[0].score, ScoreState::Present(31.0));
        assert_eq!(entries[1].score, ScoreState::Absent);
        assert_eq!(entries[2].score, ScoreState::Absent);
    }
}
