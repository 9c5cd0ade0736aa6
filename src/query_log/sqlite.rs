/// SQLite-backed implementation of QueryLogger
///
/// Uses sqlx with WAL mode for cross-restart persistence.
/// Runs migrations automatically on initialization.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous},
    Row,
};
use std::collections::BTreeMap;

use super::{
    LoggedBucket, PopularQuery, QueryLogDetail, QueryLogEntry, QueryLogger, QueryStatistics,
};
use crate::errors::QnaError;
use crate::search::CategoryResults;

const ENTRY_COLUMNS: &str =
    "id, user_id, query_text, timestamp, bucket_counts, total_results_count, response_time_ms";

/// SQLite-backed query log using an sqlx connection pool.
pub struct SqliteQueryLogger {
    pool: SqlitePool,
}

impl SqliteQueryLogger {
    /// Open (or create) the log database at db_path.
    ///
    /// Enables WAL mode for better concurrent performance.
    /// Automatically runs pending migrations on startup.
    pub async fn new(db_path: &str) -> Result<Self, QnaError> {
        // Strip "sqlite://" prefix if present for SqliteConnectOptions
        let path = db_path.strip_prefix("sqlite://").unwrap_or(db_path);

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| QnaError::Storage(format!("Failed to open query log '{}': {}", db_path, e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| QnaError::Storage(format!("Migration failed: {}", e)))?;

        tracing::info!(path = %path, "Query log ready");
        Ok(SqliteQueryLogger { pool })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width so string comparison orders chronologically
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Escape LIKE wildcards so the keyword matches literally.
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<QueryLogEntry, QnaError> {
    let id: i64 = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let query_text: String = row.try_get("query_text")?;
    let timestamp_str: String = row.try_get("timestamp")?;
    let counts_str: String = row.try_get("bucket_counts")?;
    let total_results_count: i64 = row.try_get("total_results_count")?;
    let response_time_ms: Option<f64> = row.try_get("response_time_ms")?;

    let timestamp = timestamp_str
        .parse::<DateTime<Utc>>()
        .map_err(|e| QnaError::Storage(format!("Parse timestamp '{}': {}", timestamp_str, e)))?;
    let bucket_counts: BTreeMap<String, i64> = serde_json::from_str(&counts_str)
        .map_err(|e| QnaError::Storage(format!("Parse bucket_counts for log {}: {}", id, e)))?;

    Ok(QueryLogEntry {
        id,
        user_id,
        query_text,
        timestamp,
        bucket_counts,
        total_results_count,
        response_time_ms,
    })
}

#[async_trait]
impl QueryLogger for SqliteQueryLogger {
    async fn log_query(
        &self,
        user_id: &str,
        query: &str,
        results: &CategoryResults,
        response_time_ms: Option<f64>,
    ) -> Result<i64, QnaError> {
        let buckets = LoggedBucket::from_results(results);
        let counts: BTreeMap<&str, usize> = buckets
            .iter()
            .map(|b| (b.bucket.as_str(), b.results.len()))
            .collect();
        let total = results.total() as i64;
        let counts_json = serde_json::to_string(&counts)
            .map_err(|e| QnaError::Storage(format!("Serialize bucket counts: {}", e)))?;
        let results_json = serde_json::to_string(&buckets)
            .map_err(|e| QnaError::Storage(format!("Serialize results: {}", e)))?;
        let now = timestamp(Utc::now());

        let id = sqlx::query(
            "INSERT INTO query_logs \
             (user_id, query_text, timestamp, bucket_counts, total_results_count, results_json, response_time_ms, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(query)
        .bind(&now)
        .bind(&counts_json)
        .bind(total)
        .bind(&results_json)
        .bind(response_time_ms)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| QnaError::Storage(format!("Failed to insert query log: {}", e)))?
        .last_insert_rowid();

        tracing::debug!(id, user_id = %user_id, total, "Query logged");
        Ok(id)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<QueryLogEntry>, QnaError> {
        let sql = format!(
            "SELECT {} FROM query_logs ORDER BY timestamp DESC, id DESC LIMIT ?",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn statistics(&self, days: i64) -> Result<QueryStatistics, QnaError> {
        let days = days.clamp(0, 36_500);
        let cutoff = timestamp(Utc::now() - Duration::days(days));

        let row = sqlx::query(
            "SELECT COUNT(*) AS total_queries, \
                    COUNT(DISTINCT user_id) AS unique_users, \
                    AVG(total_results_count) AS avg_results, \
                    AVG(response_time_ms) AS avg_response_time \
             FROM query_logs WHERE timestamp >= ?",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        let total_queries: i64 = row.try_get("total_queries")?;
        let unique_users: i64 = row.try_get("unique_users")?;
        let avg_results: Option<f64> = row.try_get("avg_results")?;
        let avg_response_time: Option<f64> = row.try_get("avg_response_time")?;

        let popular = sqlx::query(
            "SELECT query_text, COUNT(*) AS count FROM query_logs \
             WHERE timestamp >= ? \
             GROUP BY query_text ORDER BY count DESC, query_text ASC LIMIT 10",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        let popular_queries = popular
            .iter()
            .map(|r| {
                Ok(PopularQuery {
                    query: r.try_get("query_text")?,
                    count: r.try_get("count")?,
                })
            })
            .collect::<Result<Vec<_>, QnaError>>()?;

        Ok(QueryStatistics {
            period_days: days,
            total_queries,
            unique_users,
            avg_results_per_query: round2(avg_results.unwrap_or(0.0)),
            avg_response_time_ms: round2(avg_response_time.unwrap_or(0.0)),
            popular_queries,
        })
    }

    async fn search_queries(&self, keyword: &str, limit: i64) -> Result<Vec<QueryLogEntry>, QnaError> {
        let sql = format!(
            "SELECT {} FROM query_logs WHERE query_text LIKE ? ESCAPE '\\' \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(keyword))
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn detail(&self, id: i64) -> Result<Option<QueryLogDetail>, QnaError> {
        let sql = format!("SELECT {}, results_json FROM query_logs WHERE id = ?", ENTRY_COLUMNS);
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let entry = row_to_entry(&row)?;
        let results_str: String = row.try_get("results_json")?;
        let buckets: Vec<LoggedBucket> = serde_json::from_str(&results_str)
            .map_err(|e| QnaError::Storage(format!("Parse results_json for log {}: {}", id, e)))?;
        Ok(Some(QueryLogDetail { entry, buckets }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::test_document;
    use crate::search::{CategoryBucket, MatchSource, ScoredResult};

    async fn logger(dir: &tempfile::TempDir) -> SqliteQueryLogger {
        let path = dir.path().join("query_logs.db");
        SqliteQueryLogger::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap()
    }

    fn results(product: usize) -> CategoryResults {
        let result = |i: usize| ScoredResult {
            position: i,
            document: test_document(&i.to_string(), &format!("post {i}"), "", "DBS", "https://cafe.naver.com/x"),
            combined_score: 1.0 / (i + 1) as f64,
            lexical_score: 0.0,
            semantic_score: 0.3,
            bonus: 0.0,
            match_source: MatchSource::SemanticOnly,
        };
        CategoryResults {
            buckets: vec![
                CategoryBucket {
                    bucket: "product_qna".into(),
                    label: "Product QnA".into(),
                    results: (0..product).map(result).collect(),
                },
                CategoryBucket { bucket: "bugs_qna".into(), label: "Bugs QnA".into(), results: vec![] },
            ],
        }
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn test_log_and_detail_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(&dir).await;

        let id = logger.log_query("U1", "login error", &results(2), Some(120.5)).await.unwrap();
        let detail = logger.detail(id).await.unwrap().unwrap();

        assert_eq!(detail.entry.query_text, "login error");
        assert_eq!(detail.entry.total_results_count, 2);
        assert_eq!(detail.entry.bucket_counts["product_qna"], 2);
        assert_eq!(detail.entry.bucket_counts["bugs_qna"], 0);
        assert_eq!(detail.entry.response_time_ms, Some(120.5));
        assert_eq!(detail.buckets[0].results[1].title, "post 1");
        assert!(logger.detail(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(&dir).await;
        for q in ["first", "second", "third"] {
            logger.log_query("U1", q, &results(1), None).await.unwrap();
        }

        let recent = logger.recent(2).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|e| e.query_text.as_str()).collect();
        assert_eq!(texts, vec!["third", "second"]);
    }

    #[tokio::test]
    async fn test_statistics_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(&dir).await;
        logger.log_query("U1", "vpn", &results(1), Some(100.0)).await.unwrap();
        logger.log_query("U2", "vpn", &results(3), Some(200.0)).await.unwrap();
        logger.log_query("U2", "license", &results(2), None).await.unwrap();

        let stats = logger.statistics(7).await.unwrap();
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.avg_results_per_query, 2.0);
        assert_eq!(stats.avg_response_time_ms, 150.0);
        assert_eq!(stats.popular_queries[0].query, "vpn");
        assert_eq!(stats.popular_queries[0].count, 2);
    }

    #[tokio::test]
    async fn test_empty_log_statistics_are_zero() {
        let dir = tempfile::tempdir().unwrap();
        let stats = logger(&dir).await.statistics(7).await.unwrap();
        assert_eq!(stats.total_queries, 0);
        assert_eq!(stats.avg_results_per_query, 0.0);
        assert!(stats.popular_queries.is_empty());
    }

    #[tokio::test]
    async fn test_search_queries_matches_substring_literally() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(&dir).await;
        logger.log_query("U1", "manager login error", &results(1), None).await.unwrap();
        logger.log_query("U1", "100% cpu", &results(1), None).await.unwrap();
        logger.log_query("U1", "crash", &results(1), None).await.unwrap();

        assert_eq!(logger.search_queries("login", 10).await.unwrap().len(), 1);
        assert_eq!(logger.search_queries("%", 10).await.unwrap()[0].query_text, "100% cpu");
        assert!(logger.search_queries("backup", 10).await.unwrap().is_empty());
    }
}
