// Grade store ingestion
//
// Builds the `grades` table the advisor reads from a JSON array of cleaned
// section records. This is the only write path in the crate and it never
// runs during advising: the target file is replaced wholesale.

use crate::error::{AdvisorError, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

const CREATE_GRADES_TABLE: &str = r#"
CREATE TABLE grades (
    id INTEGER PRIMARY KEY AUTOINCREMENT, subject TEXT NOT NULL, subject_desc TEXT,
    course_number INTEGER NOT NULL, title TEXT NOT NULL, academic_period TEXT NOT NULL,
    instructor TEXT, a_plus_pct REAL, a_pct REAL, a_minus_pct REAL, b_plus_pct REAL,
    b_pct REAL, b_minus_pct REAL, c_plus_pct REAL, c_pct REAL, c_minus_pct REAL,
    d_plus_pct REAL, d_pct REAL, d_minus_pct REAL, f_pct REAL,
    withdrawn_failing_pct REAL, gpa_estimate_normalized REAL,
    UNIQUE(subject, course_number, academic_period, instructor)
);
"#;

const INSERT_SECTION: &str = r#"
INSERT INTO grades (
    subject, subject_desc, course_number, title, academic_period, instructor,
    a_plus_pct, a_pct, a_minus_pct, b_plus_pct, b_pct, b_minus_pct,
    c_plus_pct, c_pct, c_minus_pct, d_plus_pct, d_pct, d_minus_pct,
    f_pct, withdrawn_failing_pct, gpa_estimate_normalized
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
          ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
"#;

/// Share of students per letter grade, as reported for one section
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GradeDistribution {
    #[serde(default)]
    pub a_plus_pct: Option<f64>,
    #[serde(default)]
    pub a_pct: Option<f64>,
    #[serde(default)]
    pub a_minus_pct: Option<f64>,
    #[serde(default)]
    pub b_plus_pct: Option<f64>,
    #[serde(default)]
    pub b_pct: Option<f64>,
    #[serde(default)]
    pub b_minus_pct: Option<f64>,
    #[serde(default)]
    pub c_plus_pct: Option<f64>,
    #[serde(default)]
    pub c_pct: Option<f64>,
    #[serde(default)]
    pub c_minus_pct: Option<f64>,
    #[serde(default)]
    pub d_plus_pct: Option<f64>,
    #[serde(default)]
    pub d_pct: Option<f64>,
    #[serde(default)]
    pub d_minus_pct: Option<f64>,
    #[serde(default)]
    pub f_pct: Option<f64>,
    #[serde(default)]
    pub e_pct: Option<f64>,
    #[serde(default)]
    pub withdrawn_failing_pct: Option<f64>,
}

impl GradeDistribution {
    fn weighted(&self) -> [(Option<f64>, f64); 15] {
        [
            (self.a_plus_pct, 4.0),
            (self.a_pct, 4.0),
            (self.a_minus_pct, 3.7),
            (self.b_plus_pct, 3.3),
            (self.b_pct, 3.0),
            (self.b_minus_pct, 2.7),
            (self.c_plus_pct, 2.3),
            (self.c_pct, 2.0),
            (self.c_minus_pct, 1.7),
            (self.d_plus_pct, 1.3),
            (self.d_pct, 1.0),
            (self.d_minus_pct, 0.7),
            (self.f_pct, 0.0),
            (self.e_pct, 0.0),
            (self.withdrawn_failing_pct, 0.0),
        ]
    }

    /// GPA estimate renormalized over the graded columns that were reported
    ///
    /// Non-letter outcomes (pass/fail, audit, plain withdrawals) are not part
    /// of the distribution. None when no student received a letter grade, so
    /// the section is stored as NULL and left out of `AVG`.
    pub fn gpa_estimate(&self) -> Option<f64> {
        let weighted = self.weighted();
        let total: f64 = weighted.iter().filter_map(|(pct, _)| *pct).sum();
        if total <= 0.0 {
            return None;
        }

        Some(
            weighted
                .iter()
                .filter_map(|(pct, weight)| pct.map(|p| p / total * weight))
                .sum(),
        )
    }
}

/// One section as exported by the grade cleaning step
#[derive(Debug, Clone, Deserialize)]
pub struct SectionRecord {
    #[serde(rename = "Subject", default)]
    pub subject: Option<String>,
    #[serde(rename = "Subject Desc", default)]
    pub subject_desc: Option<String>,
    /// Kept raw: exports mix integers, floats and strings here
    #[serde(rename = "Course Number", default)]
    pub course_number: Option<Value>,
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
    #[serde(rename = "Academic Period", default)]
    pub academic_period: Option<String>,
    #[serde(rename = "Instructor", default)]
    pub instructor: Option<String>,
    #[serde(flatten)]
    pub grades: GradeDistribution,
    #[serde(default)]
    pub gpa_estimate_normalized: Option<f64>,
}

/// Counts from one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub skipped_invalid: usize,
    pub skipped_duplicate: usize,
}

/// Integer course number from whatever the export put there
fn course_number_of(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Replace `db_path` with a grade store built from the JSON file at `json_path`
///
/// # Errors
/// - IoError if the JSON file cannot be read or the old store removed
/// - SerdeError if the file is not a JSON array of records
/// - SqliteError on database failures
pub fn ingest_file(json_path: &Path, db_path: &Path) -> Result<IngestReport> {
    if !json_path.exists() {
        return Err(AdvisorError::StorageError(format!(
            "JSON file not found at '{}'",
            json_path.display()
        )));
    }

    let content = std::fs::read_to_string(json_path)?;
    let records: Vec<SectionRecord> = serde_json::from_str(&content)?;
    tracing::info!("Loaded {} records from {}", records.len(), json_path.display());

    if db_path.exists() {
        std::fs::remove_file(db_path)?;
    }

    let mut conn = Connection::open(db_path)?;
    conn.execute_batch(CREATE_GRADES_TABLE)?;
    let report = insert_records(&mut conn, records)?;

    tracing::info!(
        "Built {}: {} inserted, {} invalid, {} duplicate",
        db_path.display(),
        report.inserted,
        report.skipped_invalid,
        report.skipped_duplicate
    );
    Ok(report)
}

/// Insert records into an existing `grades` table in one transaction
pub fn insert_records(conn: &mut Connection, records: Vec<SectionRecord>) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut seen: HashSet<(String, i64, String, Option<String>)> = HashSet::new();

    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare(INSERT_SECTION)?;

        for record in records {
            let course_number = record.course_number.as_ref().and_then(course_number_of);
            let Some(course_number) = course_number else {
                tracing::warn!(
                    "Skipping record with bad course number: {:?}",
                    record.course_number
                );
                report.skipped_invalid += 1;
                continue;
            };
            let (Some(subject), Some(title), Some(period)) = (
                record.subject.clone(),
                record.title.clone(),
                record.academic_period.clone(),
            ) else {
                tracing::warn!("Skipping record without subject, title or period");
                report.skipped_invalid += 1;
                continue;
            };

            let fingerprint = (
                subject.clone(),
                course_number,
                period.clone(),
                record.instructor.clone(),
            );
            if !seen.insert(fingerprint) {
                report.skipped_duplicate += 1;
                continue;
            }

            let g = &record.grades;
            let gpa = record
                .gpa_estimate_normalized
                .filter(|v| v.is_finite())
                .or_else(|| g.gpa_estimate());

            insert.execute(params![
                subject,
                record.subject_desc,
                course_number,
                title,
                period,
                record.instructor,
                g.a_plus_pct,
                g.a_pct,
                g.a_minus_pct,
                g.b_plus_pct,
                g.b_pct,
                g.b_minus_pct,
                g.c_plus_pct,
                g.c_pct,
                g.c_minus_pct,
                g.d_plus_pct,
                g.d_pct,
                g.d_minus_pct,
                g.f_pct,
                g.withdrawn_failing_pct,
                gpa,
            ])?;
            report.inserted += 1;
        }
    }
    tx.commit()?;

    Ok(report)
}
