pub mod config;
pub mod corpus;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod format;
pub mod logging;
pub mod query_log;
pub mod search;
pub mod server;

#[doc(hidden)]
pub mod test_utils;

pub use engine::SearchEngine;
pub use errors::QnaError;
