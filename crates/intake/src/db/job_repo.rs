//! Rows of the `jobs` table.

use rusqlite::{params, Row};

use super::document_repo::DocumentRow;
use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: String,
    pub document_id: String,
    pub status: String,
    pub retry_count: i64,
    pub result_ref: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            status: row.get("status")?,
            retry_count: row.get("retry_count")?,
            result_ref: row.get("result_ref")?,
            error_detail: row.get("error_detail")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    /// Only jobs completed at or after this RFC 3339 timestamp.
    pub completed_since: Option<String>,
    /// Only jobs whose `result_ref` starts with this prefix.
    pub result_prefix: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts the job or overwrites every mutable column of an existing row.
pub fn upsert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, document_id, status, retry_count, result_ref, error_detail,
             created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                retry_count = excluded.retry_count,
                result_ref = excluded.result_ref,
                error_detail = excluded.error_detail,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at",
            params![
                job.id,
                job.document_id,
                job.status,
                job.retry_count,
                job.result_ref,
                job.error_detail,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    })
}

type SqlParams = Vec<Box<dyn rusqlite::types::ToSql>>;

/// Builds the WHERE clause for `filter` against the `jobs` table aliased as
/// `j`, with its positional parameters.
fn filter_clause(filter: &JobFilter) -> (String, SqlParams) {
    let mut conditions = Vec::new();
    let mut param_values: SqlParams = Vec::new();

    if let Some(ref status) = filter.status {
        conditions.push(format!("j.status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.clone()));
    }
    if let Some(ref since) = filter.completed_since {
        conditions.push(format!("j.completed_at >= ?{}", param_values.len() + 1));
        param_values.push(Box::new(since.clone()));
    }
    if let Some(ref prefix) = filter.result_prefix {
        let n = param_values.len() + 1;
        conditions.push(format!("substr(j.result_ref, 1, length(?{n})) = ?{n}"));
        param_values.push(Box::new(prefix.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (where_clause, param_values)
}

/// Runs `select` (which must select from `jobs j` plus `from_extra`) under
/// the filter, newest-completed first, and counts over the same rows.
fn query_rows<T, F>(
    db: &Database,
    filter: &JobFilter,
    select: &str,
    from_extra: &str,
    map: F,
) -> Result<(Vec<T>, u64), DatabaseError>
where
    F: FnMut(&Row<'_>) -> Result<T, rusqlite::Error>,
{
    db.with_conn(|conn| {
        let (where_clause, mut param_values) = filter_clause(filter);

        let count_sql = format!("SELECT COUNT(*) FROM jobs j {} {}", from_extra, where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT {} FROM jobs j {} {} ORDER BY j.completed_at DESC, j.created_at DESC, j.id ASC LIMIT ?{} OFFSET ?{}",
            select,
            from_extra,
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<T> = stmt
            .query_map(params_ref.as_slice(), map)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

const JOB_COLUMNS: &str = "j.id, j.document_id, j.status, j.retry_count, j.result_ref, \
     j.error_detail, j.created_at, j.updated_at, j.completed_at";

fn job_with_document(row: &Row<'_>) -> Result<(JobRow, DocumentRow), rusqlite::Error> {
    let job = JobRow::from_row(row)?;
    let document = DocumentRow {
        id: job.document_id.clone(),
        original_filename: row.get("original_filename")?,
        content_type: row.get("content_type")?,
        size_bytes: row.get("size_bytes")?,
        storage_key: row.get("storage_key")?,
        created_at: row.get("document_created_at")?,
    };
    Ok((job, document))
}

/// Queries jobs newest-completed first, returning `(rows, total_count)`.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    query_rows(db, filter, JOB_COLUMNS, "", JobRow::from_row)
}

/// Like [`query`], with each job's document. Jobs and count come from the
/// same join.
pub fn query_with_documents(
    db: &Database,
    filter: &JobFilter,
) -> Result<(Vec<(JobRow, DocumentRow)>, u64), DatabaseError> {
    let select = format!(
        "{}, d.original_filename, d.content_type, d.size_bytes, d.storage_key, \
         d.created_at AS document_created_at",
        JOB_COLUMNS
    );
    query_rows(
        db,
        filter,
        &select,
        "JOIN documents d ON d.id = j.document_id",
        job_with_document,
    )
}

/// Every job with its document, for rehydrating the in-memory store.
pub fn load_all_with_documents(
    db: &Database,
) -> Result<Vec<(JobRow, DocumentRow)>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {}, d.original_filename, d.content_type, d.size_bytes, d.storage_key,
                    d.created_at AS document_created_at
             FROM jobs j JOIN documents d ON d.id = j.document_id
             ORDER BY j.created_at ASC",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], job_with_document)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
