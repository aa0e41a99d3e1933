//! Printable result-sheet grid.
//!
//! The grid has two leading columns (a vertical section label and a row
//! label) followed by one four-column group per seat: a narrow observation
//! column and the midterm / final / total data columns. Every value that is a
//! number is rendered with Persian digits; names and labels are left as-is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::calc::{
    self, AnnualSummary, AttendanceCounts, AttendanceEntry, ClassComputation, ExamType,
    MidtermSummary, RosterEntry, ScoreState, Subject,
};
use crate::numerals::{format_count, format_number, to_ascii_digits, to_persian_digits};

/// Display capacity of one sheet. Larger rosters are never truncated.
pub const SEAT_COUNT: usize = 7;
pub const IDENTITY_ROWS: usize = 6;
pub const EXAM_HEADER_ROWS: usize = 1;
pub const SUMMARY_ROWS: usize = 4;
pub const ATTENDANCE_ROWS: usize = 5;
pub const LEADING_COLUMNS: usize = 2;
pub const COLUMNS_PER_SEAT: usize = 4;
pub const DATA_COLUMNS_PER_SEAT: usize = 3;

/// Rows covered by the observation cell, which starts on the name row.
pub fn observation_row_span(subject_count: usize) -> usize {
    (IDENTITY_ROWS - 1) + EXAM_HEADER_ROWS + subject_count + SUMMARY_ROWS + ATTENDANCE_ROWS
}

pub fn row_count(subject_count: usize) -> usize {
    IDENTITY_ROWS + EXAM_HEADER_ROWS + subject_count + SUMMARY_ROWS + ATTENDANCE_ROWS
}

pub fn column_count(seat_count: usize) -> usize {
    LEADING_COLUMNS + COLUMNS_PER_SEAT * seat_count
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutConfig {
    /// Centimetres.
    pub margins: Margins,
    /// Pixels, prose outside the grid.
    pub general_font_size: f64,
    /// Pixels, grid text.
    pub table_font_size: f64,
    pub header_signatures_at_top: bool,
    pub show_page_number: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            margins: Margins {
                top: 0.5,
                right: 2.0,
                bottom: 0.5,
                left: 0.5,
            },
            general_font_size: 11.0,
            table_font_size: 11.0,
            header_signatures_at_top: false,
            show_page_number: true,
        }
    }
}

fn lenient_measure(raw: &Value) -> Option<f64> {
    let v = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => calc::parse_leading_float(to_ascii_digits(s).trim()),
        _ => None,
    }?;
    if v.is_finite() && v >= 0.0 {
        Some(v)
    } else {
        None
    }
}

fn lenient_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

impl LayoutConfig {
    /// Defaults with an optional saved/patch object applied on top.
    pub fn resolve(saved: Option<&Value>) -> Self {
        let mut cfg = Self::default();
        if let Some(obj) = saved.and_then(|v| v.as_object()) {
            cfg.apply_patch(obj);
        }
        cfg
    }

    /// Unreadable values keep the prior setting; unknown keys are ignored.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (k, v) in patch {
            match k.as_str() {
                "margins" => {
                    let Some(m) = v.as_object() else {
                        continue;
                    };
                    for (side, raw) in m {
                        let Some(cm) = lenient_measure(raw) else {
                            continue;
                        };
                        match side.as_str() {
                            "top" => self.margins.top = cm,
                            "right" => self.margins.right = cm,
                            "bottom" => self.margins.bottom = cm,
                            "left" => self.margins.left = cm,
                            _ => {}
                        }
                    }
                }
                "generalFontSize" => {
                    if let Some(px) = lenient_measure(v).filter(|px| *px > 0.0) {
                        self.general_font_size = px;
                    }
                }
                "tableFontSize" => {
                    if let Some(px) = lenient_measure(v).filter(|px| *px > 0.0) {
                        self.table_font_size = px;
                    }
                }
                "headerSignaturesAtTop" => {
                    if let Some(b) = lenient_bool(v) {
                        self.header_signatures_at_top = b;
                    }
                }
                "showPageNumber" => {
                    if let Some(b) = lenient_bool(v) {
                        self.show_page_number = b;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Free-text header fields kept in the `school` settings section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolInfo {
    pub school_name: String,
    pub province: String,
    pub district: String,
    pub academic_year: String,
    pub sheet_title: String,
}

impl Default for SchoolInfo {
    fn default() -> Self {
        Self {
            school_name: String::new(),
            province: String::new(),
            district: String::new(),
            academic_year: String::new(),
            sheet_title: "جدول نتایج امتحانات".to_string(),
        }
    }
}

const SCHOOL_FIELD_MAX_CHARS: usize = 200;

impl SchoolInfo {
    pub fn resolve(saved: Option<&Value>) -> Self {
        let mut info = Self::default();
        if let Some(obj) = saved.and_then(|v| v.as_object()) {
            info.apply_patch(obj);
        }
        info
    }

    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (k, v) in patch {
            let text = match v {
                Value::String(s) => s.trim().chars().take(SCHOOL_FIELD_MAX_CHARS).collect(),
                Value::Number(n) => n.to_string(),
                Value::Null => String::new(),
                _ => continue,
            };
            match k.as_str() {
                "schoolName" => self.school_name = text,
                "province" => self.province = text,
                "district" => self.district = text,
                "academicYear" => self.academic_year = text,
                "sheetTitle" => self.sheet_title = text,
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub text: String,
    pub col_span: usize,
    pub row_span: usize,
    pub vertical: bool,
}

impl Cell {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            col_span: 1,
            row_span: 1,
            vertical: false,
        }
    }

    pub fn blank() -> Self {
        Self::text("")
    }

    pub fn cols(mut self, n: usize) -> Self {
        self.col_span = n;
        self
    }

    pub fn rows(mut self, n: usize) -> Self {
        self.row_span = n;
        self
    }

    pub fn vertical(mut self) -> Self {
        self.vertical = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityField {
    Number,
    Name,
    FatherName,
    GrandfatherName,
    StudentId,
    TazkiraNo,
}

impl IdentityField {
    const ALL: [IdentityField; IDENTITY_ROWS] = [
        Self::Number,
        Self::Name,
        Self::FatherName,
        Self::GrandfatherName,
        Self::StudentId,
        Self::TazkiraNo,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Number => "شماره",
            Self::Name => "اسم",
            Self::FatherName => "ولد",
            Self::GrandfatherName => "ولدیت",
            Self::StudentId => "نمبر اساس",
            Self::TazkiraNo => "نمبر تذکره",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SummaryField {
    Totals,
    Average,
    Outcome,
    Rank,
}

impl SummaryField {
    const ALL: [SummaryField; SUMMARY_ROWS] =
        [Self::Totals, Self::Average, Self::Outcome, Self::Rank];

    fn label(self) -> &'static str {
        match self {
            Self::Totals => "مجموعه نمرات",
            Self::Average => "اوسط نمرات",
            Self::Outcome => "نتیجه",
            Self::Rank => "درجه",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceField {
    Days,
    Present,
    Absent,
    Sick,
    Leave,
}

impl AttendanceField {
    const ALL: [AttendanceField; ATTENDANCE_ROWS] = [
        Self::Days,
        Self::Present,
        Self::Absent,
        Self::Sick,
        Self::Leave,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Days => "ایام تعلیمی",
            Self::Present => "حاضر",
            Self::Absent => "غیر حاضر",
            Self::Sick => "مریض",
            Self::Leave => "رخصت",
        }
    }

    fn pick(self, counts: &AttendanceCounts) -> Option<f64> {
        match self {
            Self::Days => counts.days,
            Self::Present => counts.present,
            Self::Absent => counts.absent,
            Self::Sick => counts.sick,
            Self::Leave => counts.leave,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SheetRow {
    Identity {
        field: IdentityField,
        cells: Vec<Cell>,
    },
    ExamHeader {
        cells: Vec<Cell>,
    },
    Subject {
        #[serde(rename = "subjectId")]
        subject_id: String,
        cells: Vec<Cell>,
    },
    Summary {
        field: SummaryField,
        cells: Vec<Cell>,
    },
    Attendance {
        field: AttendanceField,
        cells: Vec<Cell>,
    },
}

impl SheetRow {
    pub fn cells(&self) -> &[Cell] {
        match self {
            Self::Identity { cells, .. }
            | Self::ExamHeader { cells }
            | Self::Subject { cells, .. }
            | Self::Summary { cells, .. }
            | Self::Attendance { cells, .. } => cells,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryTable {
    pub title: String,
    pub columns: Vec<String>,
    pub values: Vec<String>,
}

fn midterm_table(s: &MidtermSummary) -> SummaryTable {
    SummaryTable {
        title: "خلص نتایج چهارونیم ماهه".to_string(),
        columns: ["شامل", "امتحان داده", "کامیاب", "ناکام", "غایب"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        values: [s.enrolled, s.tested, s.passed, s.failed, s.absent]
            .into_iter()
            .map(format_count)
            .collect(),
    }
}

fn annual_table(s: &AnnualSummary) -> SummaryTable {
    SummaryTable {
        title: "خلص نتایج سالانه".to_string(),
        columns: ["شامل", "امتحان داده", "کامیاب", "مشروط", "ناکام", "غایب"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        values: [
            s.enrolled,
            s.tested,
            s.passed,
            s.conditional,
            s.failed,
            s.absent,
        ]
        .into_iter()
        .map(format_count)
        .collect(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetHeader {
    pub title: String,
    pub school_name: String,
    pub province: String,
    pub district: String,
    pub academic_year: String,
    pub class_name: String,
    pub generated_at: Option<String>,
    pub midterm_summary: SummaryTable,
    pub annual_summary: SummaryTable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSetup {
    pub margins: Margins,
    /// CSS shorthand order: top right bottom left.
    pub margin_css: String,
    pub general_font_size_px: f64,
    pub table_font_size_px: f64,
    pub page_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Footer {
    pub column_count: usize,
    pub column_width_percent: f64,
    pub slots: Vec<String>,
}

const MOVABLE_SIGNATURES: [&str; 2] = ["امضای نگران صنف", "امضای سر معلم"];
const FOOTER_SIGNATURES: [&str; 4] = [
    "امضای ترتیب کننده",
    "امضای تفتیش کننده",
    "امضای مدیر تدریسی",
    "امضای مدیر مکتب",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetModel {
    pub header: SheetHeader,
    pub page: PageSetup,
    pub config: LayoutConfig,
    pub top_signatures: Vec<String>,
    pub footer: Footer,
    pub seat_count: usize,
    pub row_count: usize,
    pub column_count: usize,
    pub observation_row_span: usize,
    pub subjects: Vec<Subject>,
    pub roster: Vec<RosterEntry>,
    pub rows: Vec<SheetRow>,
    pub results: Vec<calc::StudentResult>,
}

/// Appends placeholders up to [`SEAT_COUNT`]; longer rosters stay as they are.
pub fn pad_roster(roster: &[RosterEntry]) -> Vec<RosterEntry> {
    let mut seats = roster.to_vec();
    while seats.len() < SEAT_COUNT {
        seats.push(RosterEntry::placeholder());
    }
    seats
}

pub struct SheetInputs<'a> {
    pub subjects: &'a [Subject],
    pub roster: &'a [RosterEntry],
    pub attendance: &'a [AttendanceEntry],
    pub computation: &'a ClassComputation,
    pub config: &'a LayoutConfig,
    pub school: &'a SchoolInfo,
    pub class_name: &'a str,
    pub page_number: usize,
    pub generated_at: Option<String>,
}

fn score_text(s: ScoreState) -> String {
    s.value().map(format_number).unwrap_or_default()
}

fn sum_text(a: Option<f64>, b: Option<f64>) -> String {
    match (a, b) {
        (None, None) => String::new(),
        _ => format_number(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

fn leading(section: Option<(&str, usize)>, label: &str) -> Vec<Cell> {
    let mut cells = Vec::with_capacity(LEADING_COLUMNS);
    if let Some((text, span)) = section {
        cells.push(Cell::text(text).rows(span).vertical());
    }
    cells.push(Cell::text(label));
    cells
}

fn identity_text(field: IdentityField, seat_no: usize, student: &RosterEntry) -> String {
    match field {
        IdentityField::Number => to_persian_digits(&seat_no.to_string()),
        IdentityField::Name => student.name.clone(),
        IdentityField::FatherName => student.father_name.clone(),
        IdentityField::GrandfatherName => student.grandfather_name.clone(),
        IdentityField::StudentId => to_persian_digits(&student.student_id),
        IdentityField::TazkiraNo => to_persian_digits(&student.tazkira_no),
    }
}

pub fn build_sheet(inputs: &SheetInputs<'_>) -> SheetModel {
    let seats = pad_roster(inputs.roster);
    let subject_count = inputs.subjects.len();
    let obs_span = observation_row_span(subject_count);

    let mut attendance: HashMap<(&str, ExamType), &AttendanceEntry> = HashMap::new();
    for a in inputs.attendance {
        attendance.insert((a.student_id.as_str(), a.exam_type), a);
    }

    let mut rows: Vec<SheetRow> = Vec::with_capacity(row_count(subject_count));

    for (i, field) in IdentityField::ALL.iter().copied().enumerate() {
        let section = (i == 0).then_some(("شهرت متعلم", IDENTITY_ROWS));
        let mut cells = leading(section, field.label());
        for (seat_idx, student) in seats.iter().enumerate() {
            let text = if student.is_empty {
                String::new()
            } else {
                identity_text(field, seat_idx + 1, student)
            };
            match field {
                IdentityField::Number => {
                    cells.push(Cell::text(text).cols(COLUMNS_PER_SEAT));
                }
                IdentityField::Name => {
                    let remarks = if student.is_empty {
                        String::new()
                    } else {
                        attendance
                            .get(&(student.id.as_str(), ExamType::Midterm))
                            .and_then(|a| a.remarks.clone())
                            .unwrap_or_default()
                    };
                    cells.push(Cell::text(remarks).rows(obs_span).vertical());
                    cells.push(Cell::text(text).cols(DATA_COLUMNS_PER_SEAT));
                }
                _ => cells.push(Cell::text(text).cols(DATA_COLUMNS_PER_SEAT)),
            }
        }
        rows.push(SheetRow::Identity { field, cells });
    }

    let mut header_cells = leading(Some(("مضامین", EXAM_HEADER_ROWS + subject_count)), "مضمون");
    for _ in &seats {
        for label in ["چهارونیم ماهه", "سالانه", "مجموعه"] {
            header_cells.push(Cell::text(label).vertical());
        }
    }
    rows.push(SheetRow::ExamHeader {
        cells: header_cells,
    });

    for (subject_idx, subject) in inputs.subjects.iter().enumerate() {
        let mut cells = leading(None, &subject.name);
        for student in &seats {
            let score = (!student.is_empty)
                .then(|| inputs.computation.aggregate_for(&student.id))
                .flatten()
                .and_then(|agg| agg.subjects.get(subject_idx));
            match score {
                Some(s) => {
                    cells.push(Cell::text(score_text(s.midterm)));
                    cells.push(Cell::text(score_text(s.final_score)));
                    cells.push(Cell::text(sum_text(s.midterm.value(), s.final_score.value())));
                }
                None => cells.extend(std::iter::repeat_with(Cell::blank).take(DATA_COLUMNS_PER_SEAT)),
            }
        }
        rows.push(SheetRow::Subject {
            subject_id: subject.id.clone(),
            cells,
        });
    }

    for (i, field) in SummaryField::ALL.iter().copied().enumerate() {
        let section = (i == 0).then_some(("نتایج", SUMMARY_ROWS));
        let mut cells = leading(section, field.label());
        for student in &seats {
            let found = (!student.is_empty)
                .then(|| {
                    inputs
                        .computation
                        .aggregate_for(&student.id)
                        .zip(inputs.computation.result_for(&student.id))
                })
                .flatten();
            let Some((agg, res)) = found else {
                match field {
                    SummaryField::Totals => cells
                        .extend(std::iter::repeat_with(Cell::blank).take(DATA_COLUMNS_PER_SEAT)),
                    _ => cells.push(Cell::blank().cols(DATA_COLUMNS_PER_SEAT)),
                }
                continue;
            };
            match field {
                SummaryField::Totals => {
                    let mid = agg.has_midterm.then(|| format_number(agg.mid_total));
                    let fin = agg.has_final.then(|| format_number(agg.final_total));
                    let total = agg.has_any_data.then(|| format_number(agg.total));
                    for text in [mid, fin, total] {
                        cells.push(Cell::text(text.unwrap_or_default()));
                    }
                }
                SummaryField::Average => {
                    let text = agg
                        .has_any_data
                        .then(|| format_number(agg.average))
                        .unwrap_or_default();
                    cells.push(Cell::text(text).cols(DATA_COLUMNS_PER_SEAT));
                }
                SummaryField::Outcome => {
                    cells.push(Cell::text(res.result.label()).cols(DATA_COLUMNS_PER_SEAT));
                }
                SummaryField::Rank => {
                    let text = res.rank.map(format_count).unwrap_or_default();
                    cells.push(Cell::text(text).cols(DATA_COLUMNS_PER_SEAT));
                }
            }
        }
        rows.push(SheetRow::Summary { field, cells });
    }

    for (i, field) in AttendanceField::ALL.iter().copied().enumerate() {
        let section = (i == 0).then_some(("حاضری", ATTENDANCE_ROWS));
        let mut cells = leading(section, field.label());
        for student in &seats {
            if student.is_empty {
                cells.extend(std::iter::repeat_with(Cell::blank).take(DATA_COLUMNS_PER_SEAT));
                continue;
            }
            let mid = attendance
                .get(&(student.id.as_str(), ExamType::Midterm))
                .and_then(|a| field.pick(&a.counts));
            let fin = attendance
                .get(&(student.id.as_str(), ExamType::Final))
                .and_then(|a| field.pick(&a.counts));
            cells.push(Cell::text(mid.map(format_number).unwrap_or_default()));
            cells.push(Cell::text(fin.map(format_number).unwrap_or_default()));
            cells.push(Cell::text(sum_text(mid, fin)));
        }
        rows.push(SheetRow::Attendance { field, cells });
    }

    let config = inputs.config.clone();
    let (top_signatures, footer_slots): (Vec<String>, Vec<String>) = if config.header_signatures_at_top {
        (
            MOVABLE_SIGNATURES.iter().map(|s| s.to_string()).collect(),
            FOOTER_SIGNATURES.iter().map(|s| s.to_string()).collect(),
        )
    } else {
        (
            Vec::new(),
            MOVABLE_SIGNATURES
                .iter()
                .chain(FOOTER_SIGNATURES.iter())
                .map(|s| s.to_string())
                .collect(),
        )
    };
    let footer_cols = footer_slots.len();

    let m = config.margins;
    let page = PageSetup {
        margins: m,
        margin_css: format!("{}cm {}cm {}cm {}cm", m.top, m.right, m.bottom, m.left),
        general_font_size_px: config.general_font_size,
        table_font_size_px: config.table_font_size,
        page_number: config
            .show_page_number
            .then(|| format!("صفحه {}", format_count(inputs.page_number.max(1)))),
    };

    let school = inputs.school;
    SheetModel {
        header: SheetHeader {
            title: school.sheet_title.clone(),
            school_name: school.school_name.clone(),
            province: school.province.clone(),
            district: school.district.clone(),
            academic_year: to_persian_digits(&school.academic_year),
            class_name: inputs.class_name.to_string(),
            generated_at: inputs.generated_at.clone(),
            midterm_summary: midterm_table(&inputs.computation.midterm),
            annual_summary: annual_table(&inputs.computation.annual),
        },
        page,
        config,
        top_signatures,
        footer: Footer {
            column_count: footer_cols,
            column_width_percent: 100.0 / footer_cols as f64,
            slots: footer_slots,
        },
        seat_count: seats.len(),
        row_count: rows.len(),
        column_count: column_count(seats.len()),
        observation_row_span: obs_span,
        subjects: inputs.subjects.to_vec(),
        roster: seats,
        rows,
        results: inputs.computation.results.clone(),
    }
}

/// Resolves the grid the way an HTML table does: each cell is anchored at
/// the first free slot of its row and covers `row_span` x `col_span` slots.
/// Anchors carry the text; covered slots are `None`.
pub fn resolve_grid(model: &SheetModel) -> Vec<Vec<Option<String>>> {
    let width = model.column_count;
    let mut grid: Vec<Vec<Option<String>>> = vec![vec![None; width]; model.rows.len()];
    let mut taken: Vec<Vec<bool>> = vec![vec![false; width]; model.rows.len()];

    for (r, row) in model.rows.iter().enumerate() {
        let mut c = 0usize;
        for cell in row.cells() {
            while c < width && taken[r][c] {
                c += 1;
            }
            if c >= width {
                break;
            }
            grid[r][c] = Some(cell.text.clone());
            for dr in 0..cell.row_span {
                for dc in 0..cell.col_span {
                    if let Some(slot) = taken.get_mut(r + dr).and_then(|t| t.get_mut(c + dc)) {
                        *slot = true;
                    }
                }
            }
            c += cell.col_span;
        }
    }
    grid
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Plain grid export; covered span slots are left empty.
pub fn to_csv(model: &SheetModel) -> String {
    let mut out = String::new();
    for row in resolve_grid(model) {
        let line = row
            .iter()
            .map(|slot| csv_quote(slot.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}
