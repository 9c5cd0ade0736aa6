/// Query log abstraction
///
/// Records every category-partitioned query with a compact copy of its
/// results (title, url, category, score per result) for later analytics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::QnaError;
use crate::search::CategoryResults;

pub mod sqlite;

pub use sqlite::SqliteQueryLogger;

/// The part of a result worth keeping in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedResult {
    pub title: String,
    pub url: String,
    pub category: String,
    pub combined_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedBucket {
    pub bucket: String,
    pub label: String,
    pub results: Vec<LoggedResult>,
}

impl LoggedBucket {
    pub fn from_results(results: &CategoryResults) -> Vec<LoggedBucket> {
        results
            .buckets
            .iter()
            .map(|b| LoggedBucket {
                bucket: b.bucket.clone(),
                label: b.label.clone(),
                results: b
                    .results
                    .iter()
                    .map(|r| LoggedResult {
                        title: r.document.title.clone(),
                        url: r.document.url.clone(),
                        category: r.document.category.clone(),
                        combined_score: r.combined_score,
                    })
                    .collect(),
            })
            .collect()
    }
}

/// One logged query, without its results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: i64,
    pub user_id: String,
    pub query_text: String,
    pub timestamp: DateTime<Utc>,
    /// Result count per bucket name
    pub bucket_counts: BTreeMap<String, i64>,
    pub total_results_count: i64,
    pub response_time_ms: Option<f64>,
}

/// A logged query including the results it returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogDetail {
    #[serde(flatten)]
    pub entry: QueryLogEntry,
    pub buckets: Vec<LoggedBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularQuery {
    pub query: String,
    pub count: i64,
}

/// Aggregates over the last `period_days` days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStatistics {
    pub period_days: i64,
    pub total_queries: i64,
    pub unique_users: i64,
    pub avg_results_per_query: f64,
    pub avg_response_time_ms: f64,
    /// Ten most frequent query texts, most frequent first
    pub popular_queries: Vec<PopularQuery>,
}

/// Persistent log of user queries.
#[async_trait]
pub trait QueryLogger: Send + Sync {
    /// Record a query and its category results. Returns the new log id.
    async fn log_query(
        &self,
        user_id: &str,
        query: &str,
        results: &CategoryResults,
        response_time_ms: Option<f64>,
    ) -> Result<i64, QnaError>;

    /// Most recent queries first.
    async fn recent(&self, limit: i64) -> Result<Vec<QueryLogEntry>, QnaError>;

    async fn statistics(&self, days: i64) -> Result<QueryStatistics, QnaError>;

    /// Queries whose text contains `keyword`, most recent first.
    async fn search_queries(&self, keyword: &str, limit: i64) -> Result<Vec<QueryLogEntry>, QnaError>;

    /// A single query with its results, or None if the id is unknown.
    async fn detail(&self, id: i64) -> Result<Option<QueryLogDetail>, QnaError>;
}
