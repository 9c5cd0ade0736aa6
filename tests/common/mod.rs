//! Shared fixtures for integration tests: CSV corpora and an engine over them.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use qnasearch::config::{Config, SourceFile};
pub use qnasearch::test_utils::HashEmbedder;
use qnasearch::SearchEngine;

pub const HEADER: &str = "게시글ID,제목,내용,댓글,URL\n";

/// Community posts: three categories in three files.
pub fn write_articles(dir: &Path) {
    std::fs::write(
        dir.join("cafe_articles_dbs.csv"),
        format!(
            "{HEADER}101,Login error on DBSAFER manager,Users see a login error after the password change,댓글 없음,https://cafe.naver.com/pnpsecure/101\n\
             102,Policy sync delay,Policies take minutes to apply,Restart the agent,https://cafe.naver.com/pnpsecure/102\n"
        ),
    )
    .unwrap();
    std::fs::write(
        dir.join("cafe_articles_mgr.csv"),
        format!(
            "{HEADER}201,License renewal steps,How do I renew the license key,,https://cafe.naver.com/pnpsecure/201\n\
             202,Backup schedule,Nightly backup of the audit database,nan,https://cafe.naver.com/pnpsecure/202\n"
        ),
    )
    .unwrap();
    std::fs::write(
        dir.join("cafe_articles_sa.csv"),
        format!(
            "{HEADER}301,Agent install guide,Install the agent on Windows servers,,https://cafe.naver.com/pnpsecure/301\n\
             302,Report export,Export monthly reports as PDF,,https://cafe.naver.com/pnpsecure/302\n"
        ),
    )
    .unwrap();
}

/// Issue-tracker tickets.
pub fn write_bugs(dir: &Path) {
    std::fs::write(
        dir.join("mantis_bugs.csv"),
        format!(
            "{HEADER}9001,Crash on startup,The gateway crashes on startup when the config is empty,,https://bugs.pnpsecure.com/view.php?id=9001\n\
             9002,Memory leak in audit service,Audit service memory grows daily,,https://bugs.pnpsecure.com/view.php?id=9002\n"
        ),
    )
    .unwrap();
}

/// Defaults pointed at `dir` for data and caches.
pub fn config(dir: &Path, enable_bugs: bool) -> Config {
    let mut config = Config::default();
    config.data.articles_path = dir.to_string_lossy().into_owned();
    config.data.primary_sources = vec![
        SourceFile { file: "cafe_articles_dbs.csv".into(), category: "DBS".into() },
        SourceFile { file: "cafe_articles_mgr.csv".into(), category: "Manager".into() },
        SourceFile { file: "cafe_articles_sa.csv".into(), category: "SA".into() },
    ];
    config.data.enable_bugs_data = enable_bugs;
    config.embedding.cache_dir = dir.join("embeddings_cache").to_string_lossy().into_owned();
    config.embedding.bugs_cache_dir = dir.join("embeddings_cache/bugs").to_string_lossy().into_owned();
    config
}

pub async fn engine(dir: &Path, enable_bugs: bool) -> (SearchEngine, Arc<HashEmbedder>) {
    let embedder = Arc::new(HashEmbedder::new(64));
    let engine = SearchEngine::initialize_with_provider(config(dir, enable_bugs), embedder.clone())
        .await
        .unwrap();
    (engine, embedder)
}
