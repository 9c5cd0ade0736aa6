/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: qnasearch.toml (in working directory, or --config path)
/// 3. Environment variables: prefixed QNASEARCH_, nested with `__`
///    (e.g., QNASEARCH_EMBEDDING__BATCH_SIZE=64)

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::errors::QnaError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub query_log: QueryLogConfig,
}

/// Embedding backend, cache locations and default result counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "local" (fastembed) or "openai"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier passed to the provider
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Where fastembed keeps downloaded model weights
    #[serde(default = "default_model_cache_dir")]
    pub model_cache_dir: String,

    /// Embedding cache directory for the primary (articles) partition
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Embedding cache directory for the secondary (bugs) partition
    #[serde(default = "default_bugs_cache_dir")]
    pub bugs_cache_dir: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_bucket_top_k")]
    pub product_top_k: usize,

    #[serde(default = "default_bucket_top_k")]
    pub bugs_top_k: usize,

    #[serde(default)]
    pub openai_api_key: Option<String>,
}

/// One primary corpus file and the category stamped on its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub file: String,
    pub category: String,
}

/// CSV header names for each document field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default = "default_id_column")]
    pub id: String,
    #[serde(default = "default_title_column")]
    pub title: String,
    #[serde(default = "default_body_column")]
    pub body: String,
    #[serde(default = "default_comments_column")]
    pub comments: String,
    #[serde(default = "default_url_column")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding every corpus CSV
    #[serde(default = "default_articles_path")]
    pub articles_path: String,

    /// Primary sources, loaded and concatenated in this order
    #[serde(default = "default_primary_sources")]
    pub primary_sources: Vec<SourceFile>,

    /// Issue-tracker export (secondary, optional corpus)
    #[serde(default = "default_bugs_file")]
    pub bugs_file: String,

    #[serde(default = "default_bugs_category")]
    pub bugs_category: String,

    #[serde(default)]
    pub enable_bugs_data: bool,

    #[serde(default)]
    pub columns: ColumnConfig,
}

/// A URL routing rule for category-partitioned search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub bucket: String,
    pub label: String,
    pub url_contains: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Evaluated in order; the first matching route wins
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,

    /// Deadline applied by the service layer around a single query
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogConfig {
    #[serde(default = "default_query_log_enabled")]
    pub enabled: bool,

    /// SQLite database path. Supports sqlite:// URI scheme.
    #[serde(default = "default_query_log_db_path")]
    pub db_path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider() -> String {
    "local".to_string()
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_model_cache_dir() -> String {
    dirs::cache_dir()
        .map(|d| d.join("qnasearch").join("models"))
        .unwrap_or_else(|| PathBuf::from(".fastembed_cache"))
        .to_string_lossy()
        .into_owned()
}

fn default_cache_dir() -> String {
    "embeddings_cache".to_string()
}

fn default_bugs_cache_dir() -> String {
    "embeddings_cache/bugs".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_top_k() -> usize {
    5
}

fn default_bucket_top_k() -> usize {
    3
}

fn default_id_column() -> String {
    "게시글ID".to_string()
}

fn default_title_column() -> String {
    "제목".to_string()
}

fn default_body_column() -> String {
    "내용".to_string()
}

fn default_comments_column() -> String {
    "댓글".to_string()
}

fn default_url_column() -> String {
    "URL".to_string()
}

fn default_articles_path() -> String {
    "./scripts".to_string()
}

fn default_primary_sources() -> Vec<SourceFile> {
    vec![
        SourceFile { file: "cafe_articles_dbs.csv".to_string(), category: "DBS".to_string() },
        SourceFile { file: "cafe_articles_mgr.csv".to_string(), category: "Manager".to_string() },
        SourceFile { file: "cafe_articles_sa.csv".to_string(), category: "SA".to_string() },
    ]
}

fn default_bugs_file() -> String {
    "mantis_bugs.csv".to_string()
}

fn default_bugs_category() -> String {
    "Bugs".to_string()
}

fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            bucket: "product_qna".to_string(),
            label: "Product QnA".to_string(),
            url_contains: "cafe.naver.com".to_string(),
        },
        RouteConfig {
            bucket: "bugs_qna".to_string(),
            label: "Bugs QnA".to_string(),
            url_contains: "bugs.pnpsecure.com".to_string(),
        },
    ]
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn default_query_log_enabled() -> bool {
    true
}

fn default_query_log_db_path() -> String {
    "sqlite://query_logs.db".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_provider(),
            model_name: default_model_name(),
            model_cache_dir: default_model_cache_dir(),
            cache_dir: default_cache_dir(),
            bugs_cache_dir: default_bugs_cache_dir(),
            batch_size: default_batch_size(),
            top_k: default_top_k(),
            product_top_k: default_bucket_top_k(),
            bugs_top_k: default_bucket_top_k(),
            openai_api_key: None,
        }
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        ColumnConfig {
            id: default_id_column(),
            title: default_title_column(),
            body: default_body_column(),
            comments: default_comments_column(),
            url: default_url_column(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            articles_path: default_articles_path(),
            primary_sources: default_primary_sources(),
            bugs_file: default_bugs_file(),
            bugs_category: default_bugs_category(),
            enable_bugs_data: false,
            columns: ColumnConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            routes: default_routes(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        QueryLogConfig {
            enabled: default_query_log_enabled(),
            db_path: default_query_log_db_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            embedding: EmbeddingConfig::default(),
            data: DataConfig::default(),
            search: SearchConfig::default(),
            query_log: QueryLogConfig::default(),
        }
    }
}

impl DataConfig {
    /// Full path of a corpus file inside `articles_path`.
    pub fn path_of(&self, file: &str) -> PathBuf {
        Path::new(&self.articles_path).join(file)
    }
}

impl Config {
    /// Load configuration from defaults, qnasearch.toml, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: QNASEARCH_LOG_LEVEL=debug overrides log_level in qnasearch.toml
    pub fn load() -> Result<Config, QnaError> {
        Self::load_from(Path::new("qnasearch.toml"))
    }

    /// Same as `load`, reading the TOML layer from an explicit path.
    pub fn load_from(path: &Path) -> Result<Config, QnaError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("QNASEARCH_").split("__"))
            .extract()
            .map_err(|e| QnaError::Config(format!("Failed to load config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), QnaError> {
        if self.embedding.batch_size == 0 {
            return Err(QnaError::Config("embedding.batch_size must be greater than 0".to_string()));
        }
        if self.data.primary_sources.is_empty() {
            return Err(QnaError::Config("data.primary_sources must list at least one file".to_string()));
        }
        if self.search.routes.is_empty() {
            return Err(QnaError::Config("search.routes must define at least one bucket".to_string()));
        }
        if self.embedding.cache_dir == self.embedding.bugs_cache_dir {
            return Err(QnaError::Config(
                "embedding.cache_dir and embedding.bugs_cache_dir must differ".to_string(),
            ));
        }
        Ok(())
    }
}
