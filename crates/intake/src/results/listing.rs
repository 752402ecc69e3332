//! Paginated listing of completed results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};
use crate::storage::RESULT_PREFIX;

pub const DEFAULT_LIMIT: u64 = 50;
pub const MAX_LIMIT: u64 = 500;

/// Query parameters for `GET results?since=&limit=&offset=`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsQuery {
    /// Result reference prefix; defaults to the output prefix.
    pub prefix: Option<String>,
    /// Only results completed at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ResultsQuery {
    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(RESULT_PREFIX)
    }

    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }

    fn matches(&self, job: &Job) -> bool {
        if job.status != JobStatus::Succeeded {
            return false;
        }
        let Some(result_ref) = job.result_ref.as_deref() else {
            return false;
        };
        if !result_ref.starts_with(self.prefix()) {
            return false;
        }
        match (self.since, job.completed_at) {
            (Some(since), Some(completed)) => completed >= since,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Filters, orders (newest completion first) and pages a job snapshot.
    pub fn apply(&self, jobs: Vec<Job>) -> ResultPage {
        let mut matching: Vec<Job> = jobs.into_iter().filter(|j| self.matches(j)).collect();
        matching.sort_by(|a, b| {
            b.completed_at
                .cmp(&a.completed_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.job_id.cmp(&b.job_id))
        });

        let total = matching.len() as u64;
        let results = matching
            .iter()
            .skip(self.offset() as usize)
            .take(self.limit() as usize)
            .filter_map(ResultSummary::from_job)
            .collect();

        ResultPage {
            results,
            total,
            limit: self.limit(),
            offset: self.offset(),
        }
    }
}

/// Reference to one completed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub job_id: String,
    pub result_ref: String,
    pub original_filename: String,
    pub completed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl ResultSummary {
    pub fn from_job(job: &Job) -> Option<Self> {
        Some(Self {
            job_id: job.job_id.clone(),
            result_ref: job.result_ref.clone()?,
            original_filename: job.document.original_filename.clone(),
            completed_at: job.completed_at?,
            retry_count: job.retry_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage {
    pub results: Vec<ResultSummary>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use chrono::Duration;

    fn succeeded(name: &str, completed: DateTime<Utc>) -> Job {
        let mut job = Job::new(
            Document {
                id: format!("doc-{}", name),
                original_filename: format!("{}.pdf", name),
                content_type: "application/pdf".to_string(),
                size_bytes: 10,
                storage_key: format!("{}.pdf", name),
            },
            completed - Duration::minutes(1),
        );
        job.enqueue(completed - Duration::minutes(1)).unwrap();
        let result_ref = format!("resultados/{}.csv", job.job_id);
        job.succeed(&result_ref, completed).unwrap();
        job
    }

    #[test]
    fn test_newest_first_and_only_succeeded() {
        let base = Utc::now();
        let old = succeeded("old", base);
        let new = succeeded("new", base + Duration::minutes(5));
        let mut queued = succeeded("queued", base);
        queued.status = JobStatus::Queued;

        let page = ResultsQuery::default().apply(vec![old.clone(), queued, new.clone()]);
        assert_eq!(page.total, 2);
        assert_eq!(page.results[0].job_id, new.job_id);
        assert_eq!(page.results[1].job_id, old.job_id);
        assert_eq!(page.results[1].original_filename, "old.pdf");
    }

    #[test]
    fn test_since_and_pagination() {
        let base = Utc::now();
        let jobs: Vec<Job> = (0..5)
            .map(|i| succeeded(&format!("j{}", i), base + Duration::minutes(i)))
            .collect();

        let query = ResultsQuery {
            since: Some(base + Duration::minutes(1)),
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let page = query.apply(jobs.clone());
        assert_eq!(page.total, 4);
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].job_id, jobs[3].job_id);
        assert_eq!(page.results[1].job_id, jobs[2].job_id);
    }

    #[test]
    fn test_prefix_filter() {
        let job = succeeded("a", Utc::now());
        let query = ResultsQuery {
            prefix: Some("archivo/".to_string()),
            ..Default::default()
        };
        assert_eq!(query.apply(vec![job]).total, 0);
    }

    #[test]
    fn test_limit_is_clamped() {
        let query = ResultsQuery {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(query.limit(), MAX_LIMIT);
        assert_eq!(ResultsQuery::default().limit(), DEFAULT_LIMIT);
        let zero = ResultsQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.limit(), 1);
    }
}
