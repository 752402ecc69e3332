//! Job store: per-job locked cache with write-through persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::document_repo::{self, DocumentRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};
use crate::document::Document;
use crate::error::IntakeError;
use crate::job::model::{Job, JobStatus};
use crate::results::{ResultPage, ResultSummary, ResultsQuery};

// ─── Row mapping ────────────────────────────────────────────────────────────

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, id: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn job_to_row(job: &Job) -> JobRow {
    JobRow {
        id: job.job_id.clone(),
        document_id: job.document.id.clone(),
        status: job.status.as_str().to_string(),
        retry_count: job.retry_count as i64,
        result_ref: job.result_ref.clone(),
        error_detail: job.error_detail.clone(),
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        completed_at: job.completed_at.map(format_timestamp),
    }
}

fn document_to_row(document: &Document, created_at: DateTime<Utc>) -> DocumentRow {
    DocumentRow {
        id: document.id.clone(),
        original_filename: document.original_filename.clone(),
        content_type: document.content_type.clone(),
        size_bytes: document.size_bytes as i64,
        storage_key: document.storage_key.clone(),
        created_at: format_timestamp(created_at),
    }
}

fn job_from_rows(row: &JobRow, doc: &DocumentRow) -> Result<Job, DatabaseError> {
    let status = JobStatus::parse(&row.status).ok_or_else(|| DatabaseError::CorruptRow {
        id: row.id.clone(),
        reason: format!("unknown status '{}'", row.status),
    })?;

    Ok(Job {
        job_id: row.id.clone(),
        document: Document {
            id: doc.id.clone(),
            original_filename: doc.original_filename.clone(),
            content_type: doc.content_type.clone(),
            size_bytes: doc.size_bytes.max(0) as u64,
            storage_key: doc.storage_key.clone(),
        },
        status,
        created_at: parse_timestamp(&row.created_at, &row.id)?,
        updated_at: parse_timestamp(&row.updated_at, &row.id)?,
        completed_at: row
            .completed_at
            .as_deref()
            .map(|s| parse_timestamp(s, &row.id))
            .transpose()?,
        result_ref: row.result_ref.clone(),
        error_detail: row.error_detail.clone(),
        retry_count: row.retry_count.max(0) as u32,
    })
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Owns every job record.
///
/// Each job sits behind its own `Mutex`, and [`JobStore::update`] is the only
/// way to change one, so mutations of a single job are serialized while
/// different jobs proceed in parallel. Committed jobs (Queued and later) are
/// written through to the database before the change becomes visible.
#[derive(Default)]
pub struct JobStore {
    db: RwLock<Option<Database>>,
    jobs: RwLock<HashMap<String, Arc<Mutex<Job>>>>,
}

fn lock_job(slot: &Mutex<Job>) -> MutexGuard<'_, Job> {
    slot.lock().unwrap_or_else(|poisoned| {
        log::warn!("Job lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(db: Database) -> Self {
        let store = Self::new();
        store.set_database(db);
        store
    }

    pub fn set_database(&self, db: Database) {
        let mut guard = self.db.write().unwrap_or_else(|poisoned| {
            log::warn!("Job store DB lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *guard = Some(db);
    }

    pub fn get_database(&self) -> Option<Database> {
        let guard = self.db.read().unwrap_or_else(|poisoned| {
            log::warn!("Job store DB lock was poisoned, recovering");
            poisoned.into_inner()
        });
        guard.clone()
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Mutex<Job>>>> {
        self.jobs.read().unwrap_or_else(|poisoned| {
            log::warn!("Job store cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Mutex<Job>>>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            log::warn!("Job store cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn slot(&self, job_id: &str) -> Option<Arc<Mutex<Job>>> {
        self.read_jobs().get(job_id).cloned()
    }

    /// Loads persisted jobs into memory, replacing nothing already cached.
    /// Returns the number of jobs loaded.
    pub fn load_from_database(&self) -> Result<usize, DatabaseError> {
        let Some(db) = self.get_database() else {
            return Ok(0);
        };

        let rows = job_repo::load_all_with_documents(&db)?;
        let mut jobs = self.write_jobs();
        let mut loaded = 0;
        for (job_row, doc_row) in &rows {
            match job_from_rows(job_row, doc_row) {
                Ok(job) => {
                    jobs.entry(job.job_id.clone()).or_insert_with(|| {
                        loaded += 1;
                        Arc::new(Mutex::new(job))
                    });
                }
                Err(e) => log::error!("Skipping unreadable job row: {}", e),
            }
        }

        log::info!("Loaded {} jobs from database", loaded);
        Ok(loaded)
    }

    /// Adds a job that has not been committed yet (Pending/Uploading).
    /// It lives only in memory until [`JobStore::update`] moves it on.
    pub fn insert_uncommitted(&self, job: Job) -> Result<(), IntakeError> {
        if job.status.is_committed() {
            return Err(IntakeError::invalid_input(format!(
                "job {} is already {}",
                job.job_id, job.status
            )));
        }
        let mut jobs = self.write_jobs();
        if jobs.contains_key(&job.job_id) {
            return Err(IntakeError::Conflict {
                job_id: job.job_id.clone(),
                reason: "job id already exists".to_string(),
            });
        }
        jobs.insert(job.job_id.clone(), Arc::new(Mutex::new(job)));
        Ok(())
    }

    /// Drops a job that never got committed. Committed jobs are kept.
    pub fn discard_uncommitted(&self, job_id: &str) -> bool {
        let mut jobs = self.write_jobs();
        let removable = jobs
            .get(job_id)
            .map(|slot| !lock_job(slot).status.is_committed())
            .unwrap_or(false);
        if removable {
            jobs.remove(job_id);
        }
        removable
    }

    /// Applies `f` to a copy of the job while holding that job's lock. The
    /// copy replaces the stored job only if `f` succeeds and, for committed
    /// jobs, the database write succeeds too.
    pub fn update<T, F>(&self, job_id: &str, f: F) -> Result<(T, Job), IntakeError>
    where
        F: FnOnce(&mut Job) -> Result<T, IntakeError>,
    {
        let slot = self
            .slot(job_id)
            .ok_or_else(|| IntakeError::NotFound(format!("job {}", job_id)))?;
        let mut guard = lock_job(&slot);

        let mut draft = guard.clone();
        let value = f(&mut draft)?;

        if draft != *guard && draft.status.is_committed() {
            self.persist(&draft)?;
        }

        *guard = draft.clone();
        Ok((value, draft))
    }

    fn persist(&self, job: &Job) -> Result<(), DatabaseError> {
        let Some(db) = self.get_database() else {
            return Ok(());
        };
        document_repo::insert_if_absent(&db, &document_to_row(&job.document, job.created_at))?;
        job_repo::upsert(&db, &job_to_row(job))
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.slot(job_id).map(|slot| lock_job(&slot).clone())
    }

    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all jobs, newest first.
    pub fn all(&self) -> Vec<Job> {
        let slots: Vec<Arc<Mutex<Job>>> = self.read_jobs().values().cloned().collect();
        let mut jobs: Vec<Job> = slots.iter().map(|s| lock_job(s).clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// IDs of jobs currently in one of `statuses`. The result is a snapshot;
    /// callers re-check the status under the job lock before acting.
    pub fn ids_with_status(&self, statuses: &[JobStatus]) -> Vec<String> {
        let slots: Vec<(String, Arc<Mutex<Job>>)> = self
            .read_jobs()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();
        slots
            .into_iter()
            .filter(|(_, slot)| statuses.contains(&lock_job(slot).status))
            .map(|(id, _)| id)
            .collect()
    }

    /// Pages through succeeded jobs, newest completion first. Uses the
    /// database when one is attached, the in-memory snapshot otherwise. On
    /// the database path both the page and the total come from the rows, so
    /// an unreadable row fails the listing instead of shortening the page.
    pub fn query_results(&self, query: &ResultsQuery) -> Result<ResultPage, DatabaseError> {
        let Some(db) = self.get_database() else {
            return Ok(query.apply(self.all()));
        };

        let filter = job_repo::JobFilter {
            status: Some(JobStatus::Succeeded.as_str().to_string()),
            completed_since: query.since.map(format_timestamp),
            result_prefix: Some(query.prefix().to_string()),
            limit: Some(query.limit()),
            offset: Some(query.offset()),
        };
        let (rows, total) = job_repo::query_with_documents(&db, &filter)?;
        let mut results = Vec::with_capacity(rows.len());
        for (job_row, doc_row) in &rows {
            let job = job_from_rows(job_row, doc_row).inspect_err(|e| {
                log::error!("Unreadable result row while listing: {}", e);
            })?;
            results.extend(ResultSummary::from_job(&job));
        }

        Ok(ResultPage {
            results,
            total,
            limit: query.limit(),
            offset: query.offset(),
        })
    }

    /// Counts by status, for status pages and logs.
    pub fn counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for job in self.all() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(id: &str) -> Document {
        Document {
            id: format!("doc-{}", id),
            original_filename: "invoice1.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 1024,
            storage_key: format!("{}.pdf", id),
        }
    }

    fn pending(store: &JobStore, id: &str) -> String {
        let job = Job::new(document(id), Utc::now());
        let job_id = job.job_id.clone();
        store.insert_uncommitted(job).unwrap();
        job_id
    }

    #[test]
    fn test_uncommitted_job_is_not_persisted() {
        let db = Database::open_in_memory().unwrap();
        let store = JobStore::with_database(db.clone());
        let job_id = pending(&store, "a");

        assert!(store.get(&job_id).is_some());
        assert!(job_repo::find_by_id(&db, &job_id).unwrap().is_none());

        assert!(store.discard_uncommitted(&job_id));
        assert!(store.get(&job_id).is_none());
    }

    #[test]
    fn test_update_persists_committed_job() {
        let db = Database::open_in_memory().unwrap();
        let store = JobStore::with_database(db.clone());
        let job_id = pending(&store, "b");

        let (_, job) = store
            .update(&job_id, |job| {
                job.enqueue(Utc::now())
                    .map_err(|e| IntakeError::invalid_input(e.to_string()))
            })
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let row = job_repo::find_by_id(&db, &job_id).unwrap().unwrap();
        assert_eq!(row.status, "queued");
        assert!(!store.discard_uncommitted(&job_id));
    }

    #[test]
    fn test_failed_closure_leaves_job_untouched() {
        let store = JobStore::new();
        let job_id = pending(&store, "c");

        let result: Result<((), Job), IntakeError> = store.update(&job_id, |job| {
            job.enqueue(Utc::now()).unwrap();
            Err(IntakeError::invalid_input("nope"))
        });
        assert!(result.is_err());
        assert_eq!(store.get(&job_id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_update_unknown_job_is_not_found() {
        let store = JobStore::new();
        let result = store.update("missing", |_| Ok(()));
        assert!(matches!(result, Err(IntakeError::NotFound(_))));
    }

    #[test]
    fn test_load_from_database_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let first = JobStore::with_database(db.clone());
        let job_id = pending(&first, "d");
        first
            .update(&job_id, |job| {
                job.enqueue(Utc::now()).unwrap();
                job.start_processing(Utc::now()).unwrap();
                job.succeed("resultados/d.csv", Utc::now()).unwrap();
                Ok(())
            })
            .unwrap();

        let second = JobStore::with_database(db);
        assert_eq!(second.load_from_database().unwrap(), 1);
        let job = second.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result_ref.as_deref(), Some("resultados/d.csv"));
        assert_eq!(job.document.original_filename, "invoice1.pdf");
        assert_eq!(job, first.get(&job_id).unwrap());
    }

    fn succeed(store: &JobStore, id: &str) -> String {
        let job_id = pending(store, id);
        store
            .update(&job_id, |job| {
                let result_ref = format!("resultados/{}.csv", job.job_id);
                job.enqueue(Utc::now()).unwrap();
                job.succeed(&result_ref, Utc::now()).unwrap();
                Ok(())
            })
            .unwrap();
        job_id
    }

    #[test]
    fn test_query_results_with_and_without_database() {
        let cached = JobStore::new();
        let persisted = JobStore::with_database(Database::open_in_memory().unwrap());

        for store in [&cached, &persisted] {
            let first = succeed(store, "g");
            std::thread::sleep(std::time::Duration::from_millis(5));
            let second = succeed(store, "h");
            pending(store, "i");

            let page = store.query_results(&ResultsQuery::default()).unwrap();
            assert_eq!(page.total, 2);
            let ids: Vec<&str> = page.results.iter().map(|r| r.job_id.as_str()).collect();
            assert_eq!(ids, vec![second.as_str(), first.as_str()]);

            let page = store
                .query_results(&ResultsQuery {
                    limit: Some(1),
                    offset: Some(1),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(page.total, 2);
            assert_eq!(page.results.len(), 1);
            assert_eq!(page.results[0].job_id, first);
        }
    }

    #[test]
    fn test_query_results_pages_rows_missing_from_cache() {
        let db = Database::open_in_memory().unwrap();
        let writer = JobStore::with_database(db.clone());
        let first = succeed(&writer, "j");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = succeed(&writer, "k");

        // Never loaded: the cache is empty but the rows are there.
        let reader = JobStore::with_database(db);
        assert!(reader.is_empty());

        let page = reader.query_results(&ResultsQuery::default()).unwrap();
        assert_eq!(page.total, 2);
        let ids: Vec<&str> = page.results.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec![second.as_str(), first.as_str()]);
        assert_eq!(page.results[0].original_filename, "invoice1.pdf");
    }

    #[test]
    fn test_unreadable_result_row_fails_listing() {
        let db = Database::open_in_memory().unwrap();
        let store = JobStore::with_database(db.clone());
        let job_id = succeed(&store, "m");

        let mut row = job_repo::find_by_id(&db, &job_id).unwrap().unwrap();
        row.completed_at = Some("yesterday".to_string());
        job_repo::upsert(&db, &row).unwrap();

        assert!(matches!(
            store.query_results(&ResultsQuery::default()),
            Err(DatabaseError::CorruptRow { .. })
        ));
    }

    #[test]
    fn test_ids_with_status_and_counts() {
        let store = JobStore::new();
        let a = pending(&store, "e");
        let _b = pending(&store, "f");
        store
            .update(&a, |job| {
                job.enqueue(Utc::now()).unwrap();
                Ok(())
            })
            .unwrap();

        assert_eq!(store.ids_with_status(&[JobStatus::Queued]), vec![a]);
        let counts = store.counts();
        assert_eq!(counts.get(&JobStatus::Pending), Some(&1));
        assert_eq!(counts.get(&JobStatus::Queued), Some(&1));
        assert_eq!(store.len(), 2);
    }
}
