use rmcp::{
    ServerHandler,
    tool,
    model::{
        ServerCapabilities, Implementation, ProtocolVersion, CallToolResult,
        RawResource, ListResourcesResult, ReadResourceResult, ResourceContents,
        ReadResourceRequestParams, AnnotateAble,
    },
    handler::server::wrapper::Parameters,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::SearchEngine;
use crate::errors::QnaError;
use crate::format::{format_category_results, format_results};
use crate::query_log::QueryLogger;
use crate::search::{CategoryResults, ScoredResult};

const STATS_URI: &str = "qna://query-stats";

pub struct QnaService {
    engine: Arc<SearchEngine>,
    logger: Option<Arc<dyn QueryLogger>>,
    start_time: Instant,
}

impl QnaService {
    pub fn new(engine: Arc<SearchEngine>, logger: Option<Arc<dyn QueryLogger>>) -> Self {
        Self {
            engine,
            logger,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.config().search.query_timeout_ms)
    }

    /// Race a query against the configured deadline; a late result is discarded.
    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, QnaError>>,
    ) -> Result<T, CallToolResult> {
        match tokio::time::timeout(self.query_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(qna_error_to_result(e)),
            Err(_) => {
                tracing::warn!(timeout_ms = self.query_timeout().as_millis() as u64, "Query timed out");
                Err(CallToolResult::structured_error(json!({
                    "isError": true,
                    "error": format!("Search timed out after {} ms", self.query_timeout().as_millis()),
                })))
            }
        }
    }
}

// Parameter structs

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchParams {
    /// Free-text question (required)
    pub query: String,
    /// Number of results to return (default: embedding.top_k)
    pub top_k: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CategorySearchParams {
    /// Free-text question (required)
    pub query: String,
    /// Per-bucket result limits, e.g. {"product_qna": 3, "bugs_qna": 2}.
    /// Buckets left out use the configured defaults.
    pub limits: Option<BTreeMap<String, u32>>,
    /// Who asked, recorded in the query log (default: "mcp")
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct RecentQueriesParams {
    /// Maximum entries to return (1-100, default: 20)
    pub limit: Option<u32>,
    /// Only queries containing this text (optional)
    pub keyword: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct QueryStatsParams {
    /// Look-back window in days (default: 7)
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ReindexParams {
    /// Re-embed every document even when its cache is current (default: false)
    pub force: Option<bool>,
}

// Helper: convert QnaError to CallToolResult with isError: true
fn qna_error_to_result(err: QnaError) -> CallToolResult {
    match err {
        QnaError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        QnaError::Storage(msg) => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("Query log error: {}", msg)
            }))
        }
        other => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": other.to_string()
            }))
        }
    }
}

fn result_json(rank: usize, r: &ScoredResult) -> serde_json::Value {
    json!({
        "rank": rank,
        "id": r.document.id,
        "title": r.document.title,
        "category": r.document.category,
        "url": r.document.url,
        "combined_score": r.combined_score,
        "lexical_score": r.lexical_score,
        "semantic_score": r.semantic_score,
        "bonus": r.bonus,
        "match_source": r.match_source,
        "keyword_matched": r.keyword_matched(),
    })
}

fn category_json(results: &CategoryResults) -> serde_json::Value {
    let buckets: serde_json::Map<String, serde_json::Value> = results
        .buckets
        .iter()
        .map(|b| {
            let items: Vec<_> = b.results.iter().enumerate().map(|(i, r)| result_json(i + 1, r)).collect();
            (b.bucket.clone(), json!({ "label": b.label, "count": items.len(), "results": items }))
        })
        .collect();
    serde_json::Value::Object(buckets)
}

fn empty_query_error() -> CallToolResult {
    CallToolResult::structured_error(json!({
        "isError": true,
        "error": "Field 'query' is required and cannot be empty",
        "field": "query"
    }))
}

fn logging_disabled() -> CallToolResult {
    CallToolResult::structured_error(json!({
        "isError": true,
        "error": "Query logging is disabled",
        "hint": "Set query_log.enabled = true in qnasearch.toml"
    }))
}

// Tool implementations
#[rmcp::tool_router]
impl QnaService {
    #[tool(description = "Hybrid keyword + semantic search over community Q&A posts and issue-tracker tickets. Returns a single ranked list.")]
    async fn search(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "search",
            query = %params.query,
            top_k = ?params.top_k,
            "Tool called"
        );

        if params.query.trim().is_empty() {
            return Ok(empty_query_error());
        }

        let top_k = params.top_k.map(|k| k.min(100) as usize);
        let results = match self.with_deadline(self.engine.search(&params.query, top_k)).await {
            Ok(r) => r,
            Err(e) => return Ok(e),
        };

        let items: Vec<_> = results.iter().enumerate().map(|(i, r)| result_json(i + 1, r)).collect();
        Ok(CallToolResult::structured(json!({
            "query": params.query,
            "count": items.len(),
            "results": items,
            "text": format_results(&results, &params.query),
        })))
    }

    #[tool(description = "Hybrid search with results split by source: Product QnA (community posts) and Bugs QnA (issue tracker), each with its own result limit. Queries are recorded in the query log.")]
    async fn search_by_category(
        &self,
        Parameters(params): Parameters<CategorySearchParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "search_by_category",
            query = %params.query,
            limits = ?params.limits,
            "Tool called"
        );

        if params.query.trim().is_empty() {
            return Ok(empty_query_error());
        }

        let mut limits = self.engine.default_limits();
        for (bucket, k) in params.limits.unwrap_or_default() {
            limits.insert(bucket, k.min(100) as usize);
        }

        let started = Instant::now();
        let results = match self
            .with_deadline(self.engine.search_by_category(&params.query, &limits))
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(e),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut log_id = None;
        if let Some(logger) = &self.logger {
            let user_id = params.user_id.as_deref().unwrap_or("mcp");
            match logger.log_query(user_id, &params.query, &results, Some(elapsed_ms)).await {
                Ok(id) => log_id = Some(id),
                Err(e) => tracing::warn!(error = %e, "Failed to record query log"),
            }
        }

        Ok(CallToolResult::structured(json!({
            "query": params.query,
            "total": results.total(),
            "buckets": category_json(&results),
            "response_time_ms": elapsed_ms,
            "log_id": log_id,
            "text": format_category_results(&results, &params.query),
        })))
    }

    #[tool(description = "List recently logged queries, newest first. Optionally filter by a substring of the query text.")]
    async fn recent_queries(
        &self,
        Parameters(params): Parameters<RecentQueriesParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "recent_queries", limit = ?params.limit, keyword = ?params.keyword, "Tool called");

        let Some(logger) = &self.logger else {
            return Ok(logging_disabled());
        };
        let limit = params.limit.unwrap_or(20).clamp(1, 100) as i64;
        let entries = match params.keyword.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(keyword) => logger.search_queries(keyword, limit).await,
            None => logger.recent(limit).await,
        };

        match entries {
            Ok(entries) => Ok(CallToolResult::structured(json!({
                "count": entries.len(),
                "queries": entries,
            }))),
            Err(e) => Ok(qna_error_to_result(e)),
        }
    }

    #[tool(description = "Query log statistics: totals, unique users, average results and response time, most popular queries.")]
    async fn query_stats(
        &self,
        Parameters(params): Parameters<QueryStatsParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "query_stats", days = ?params.days, "Tool called");

        let Some(logger) = &self.logger else {
            return Ok(logging_disabled());
        };
        match logger.statistics(params.days.unwrap_or(7) as i64).await {
            Ok(stats) => Ok(CallToolResult::structured(json!(stats))),
            Err(e) => Ok(qna_error_to_result(e)),
        }
    }

    #[tool(description = "Reload the corpus files and rebuild both indices, swapping them in once complete. Queries keep using the current index meanwhile. Set force to re-embed every document.")]
    async fn reindex(
        &self,
        Parameters(params): Parameters<ReindexParams>,
    ) -> Result<CallToolResult, McpError> {
        let force = params.force.unwrap_or(false);
        tracing::info!(tool = "reindex", force, "Tool called");

        match self.engine.rebuild(force).await {
            Ok(stats) => Ok(CallToolResult::structured(json!({
                "status": "rebuilt",
                "index": stats,
            }))),
            Err(e) => Ok(qna_error_to_result(e)),
        }
    }

    #[tool(description = "Check server health, index size and embedding model")]
    async fn health_check(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        let response = json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.uptime_seconds(),
            "index": self.engine.stats(),
            "query_log": self.logger.is_some(),
        });

        Ok(CallToolResult::structured(response))
    }
}

// ServerHandler implementation
#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for QnaService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "qnasearch".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Hybrid keyword and semantic search over Q&A posts and bug tickets".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Q&A retrieval server. Tools: search, search_by_category, recent_queries, query_stats, reindex, health_check. Resources: qna://query-stats (last 7 days of query statistics).".to_string()
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            meta: None,
            resources: vec![
                RawResource {
                    uri: STATS_URI.to_string(),
                    name: "query-stats".to_string(),
                    title: Some("Query Statistics".to_string()),
                    description: Some("Query log statistics for the last 7 days".to_string()),
                    mime_type: Some("application/json".to_string()),
                    size: None,
                    icons: None,
                    meta: None,
                }
                .no_annotation(),
            ],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        match request.uri.as_str() {
            STATS_URI => {
                let text = match &self.logger {
                    Some(logger) => {
                        let stats = logger
                            .statistics(7)
                            .await
                            .map_err(|e| McpError::resource_not_found(e.to_string(), None))?;
                        serde_json::to_string_pretty(&stats)
                            .map_err(|e| McpError::internal_error(e.to_string(), None))?
                    }
                    None => "Query logging is disabled.".to_string(),
                };

                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(text, request.uri)],
                })
            }
            uri => Err(McpError::resource_not_found(
                format!("Resource not found: {}", uri),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SourceFile};
    use crate::query_log::SqliteQueryLogger;
    use crate::test_utils::HashEmbedder;
    use std::path::Path;

    async fn service(dir: &Path, with_logger: bool) -> (QnaService, Option<Arc<SqliteQueryLogger>>) {
        std::fs::write(
            dir.join("dbs.csv"),
            "게시글ID,제목,내용,댓글,URL\n\
             1,Login error,cannot log in,,https://cafe.naver.com/pnp/1\n\
             2,License renewal,renew key,,https://cafe.naver.com/pnp/2\n\
             3,Install guide,agent setup,,https://cafe.naver.com/pnp/3\n",
        )
        .unwrap();
        let mut config = Config::default();
        config.data.articles_path = dir.to_string_lossy().into_owned();
        config.data.primary_sources = vec![SourceFile { file: "dbs.csv".into(), category: "DBS".into() }];
        config.embedding.cache_dir = dir.join("cache").to_string_lossy().into_owned();
        config.embedding.bugs_cache_dir = dir.join("cache/bugs").to_string_lossy().into_owned();

        let engine = SearchEngine::initialize_with_provider(config, Arc::new(HashEmbedder::new(16)))
            .await
            .unwrap();
        let logger = if with_logger {
            let path = dir.join("logs.db");
            Some(Arc::new(SqliteQueryLogger::new(&path.to_string_lossy()).await.unwrap()))
        } else {
            None
        };
        let dyn_logger = logger.clone().map(|l| l as Arc<dyn QueryLogger>);
        (QnaService::new(Arc::new(engine), dyn_logger), logger)
    }

    #[tokio::test]
    async fn test_health_check_reports_index() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path(), false).await;
        let result = service.health_check().await.unwrap();
        let body = result.structured_content.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["index"]["documents"], 3);
        assert_eq!(body["query_log"], false);
    }

    #[tokio::test]
    async fn test_search_rejects_blank_query() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path(), false).await;
        let result = service
            .search(Parameters(SearchParams { query: "  ".into(), top_k: None }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_search_returns_ranked_results() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path(), false).await;
        let result = service
            .search(Parameters(SearchParams { query: "login error".into(), top_k: Some(2) }))
            .await
            .unwrap();
        let body = result.structured_content.unwrap();
        assert_eq!(body["results"][0]["id"], "1");
        assert!(body["count"].as_u64().unwrap() <= 2);
    }

    #[tokio::test]
    async fn test_category_search_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let (service, logger) = service(dir.path(), true).await;
        let result = service
            .search_by_category(Parameters(CategorySearchParams {
                query: "license".into(),
                limits: Some(BTreeMap::from([("product_qna".to_string(), 1)])),
                user_id: Some("U42".into()),
            }))
            .await
            .unwrap();
        let body = result.structured_content.unwrap();
        assert_eq!(body["buckets"]["product_qna"]["count"], 1);
        assert_eq!(body["buckets"]["bugs_qna"]["count"], 0);

        let recent = logger.unwrap().recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user_id, "U42");
        assert_eq!(recent[0].total_results_count, 1);
    }

    #[tokio::test]
    async fn test_reindex_picks_up_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path(), false).await;
        let mut csv = std::fs::read_to_string(dir.path().join("dbs.csv")).unwrap();
        csv.push_str("4,Backup schedule,nightly job,,https://cafe.naver.com/pnp/4\n");
        std::fs::write(dir.path().join("dbs.csv"), csv).unwrap();

        let result = service
            .reindex(Parameters(ReindexParams { force: None }))
            .await
            .unwrap();
        let body = result.structured_content.unwrap();
        assert_eq!(body["status"], "rebuilt");
        assert_eq!(body["index"]["documents"], 4);

        let result = service
            .search(Parameters(SearchParams { query: "backup schedule".into(), top_k: Some(1) }))
            .await
            .unwrap();
        assert_eq!(result.structured_content.unwrap()["results"][0]["id"], "4");
    }

    #[tokio::test]
    async fn test_failed_reindex_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path(), false).await;
        std::fs::remove_file(dir.path().join("dbs.csv")).unwrap();

        let result = service
            .reindex(Parameters(ReindexParams { force: Some(true) }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(service.engine.stats().documents, 3);
    }

    #[tokio::test]
    async fn test_log_tools_need_a_logger() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path(), false).await;
        let result = service
            .query_stats(Parameters(QueryStatsParams { days: None }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }
}
