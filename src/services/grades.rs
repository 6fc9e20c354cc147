// SQLite-backed grade statistics source
//
// The store is the `grades` table built by `ingest`. Every lookup opens the
// file read-only on a blocking thread, so no write path exists and no state
// is shared between concurrent requests.

use super::traits::GradeSource;
use crate::error::{AdvisorError, Result, SourceKind};
use crate::evidence::{GradeQuery, GradeResult};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};

/// Read-only grade source over a SQLite file
#[derive(Debug, Clone)]
pub struct SqliteGradeSource {
    db_path: PathBuf,
}

impl SqliteGradeSource {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    async fn with_connection<T, F>(&self, func: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_read_only(&db_path)?;
            func(&connection)
        })
        .await
        .map_err(|e| {
            AdvisorError::unavailable(SourceKind::Grades, format!("query task failed: {}", e))
        })?
    }
}

#[async_trait]
impl GradeSource for SqliteGradeSource {
    async fn average_gpa(&self, query: &GradeQuery) -> Result<GradeResult> {
        let query = query.clone();
        let db_path = self.db_path.display().to_string();

        self.with_connection(move |conn| run_average_query(conn, &query))
            .await
            .map_err(|e| match e {
                AdvisorError::DataSourceUnavailable { .. } => e,
                other => AdvisorError::unavailable(
                    SourceKind::Grades,
                    format!("{} ({})", other, db_path),
                ),
            })
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(AdvisorError::unavailable(
            SourceKind::Grades,
            format!("database file '{}' not found", path.display()),
        ));
    }

    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(connection)
}

/// Escape LIKE wildcards so user text only ever matches literally
fn like_substring(filter: &str) -> String {
    let escaped = filter
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn run_average_query(conn: &Connection, query: &GradeQuery) -> Result<GradeResult> {
    let mut sql = String::from(
        "SELECT AVG(gpa_estimate_normalized), COUNT(gpa_estimate_normalized) FROM grades \
         WHERE subject = ? AND course_number = ? AND instructor LIKE ? ESCAPE '\\'",
    );
    let mut values: Vec<Value> = vec![
        Value::Text(query.course.subject().to_string()),
        Value::Integer(i64::from(query.course.course_number())),
        Value::Text(like_substring(&query.instructor_filter)),
    ];

    if let Some(period) = query.period {
        if let Some(semester) = period.semester {
            sql.push_str(" AND academic_period LIKE ?");
            values.push(Value::Text(format!("{}%", semester)));
        }
        if let Some(year) = period.year {
            sql.push_str(" AND academic_period LIKE ?");
            values.push(Value::Text(format!("%{}%", year)));
        }
    }

    let (metric, sections): (Option<f64>, i64) =
        conn.query_row(&sql, params_from_iter(values), |row| Ok((row.get(0)?, row.get(1)?)))?;

    let title: Option<String> = conn
        .query_row(
            "SELECT title FROM grades WHERE subject = ?1 AND course_number = ?2 LIMIT 1",
            params![query.course.subject(), query.course.course_number()],
            |row| row.get(0),
        )
        .optional()?;

    tracing::debug!(
        "Grade lookup {} instructor='{}' period={:?}: {:?} over {} sections",
        query.course,
        query.instructor_filter,
        query.period,
        metric,
        sections
    );

    Ok(GradeResult::new(metric, sample_note(query, sections)).with_title(title))
}

fn sample_note(query: &GradeQuery, sections: i64) -> String {
    let mut scope = String::new();
    if !query.instructor_filter.is_empty() {
        scope.push_str(&format!(" taught by {}", query.instructor_filter));
    }
    if let Some(period) = query.period {
        scope.push_str(&format!(" in {}", period));
    }

    match sections {
        0 => format!("no graded sections of {}{}", query.course, scope),
        1 => format!("1 section of {}{}", query.course, scope),
        n => format!("{} sections of {}{}", n, query.course, scope),
    }
}
