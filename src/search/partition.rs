/// Category partitioner
///
/// Routes fused hits into disjoint buckets by URL substring (first matching
/// route wins) and truncates every bucket to its own limit. Hits whose URL
/// matches no route are dropped.

use serde::Serialize;
use std::collections::HashMap;

use super::fusion::{rank, FusedHit};
use super::ScoredResult;
use crate::config::RouteConfig;
use crate::corpus::Corpus;

/// Per-bucket result limits, keyed by bucket name. A missing bucket gets 0.
pub type CategoryLimits = HashMap<String, usize>;

/// Ordered URL routing rules.
#[derive(Debug, Clone)]
pub struct CategoryRouter {
    routes: Vec<RouteConfig>,
}

/// One bucket of category-partitioned results.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryBucket {
    pub bucket: String,
    /// Human-readable name, e.g. "Product QnA"
    pub label: String,
    pub results: Vec<ScoredResult>,
}

/// Every configured bucket, in route order, even when empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryResults {
    pub buckets: Vec<CategoryBucket>,
}

impl CategoryResults {
    pub fn get(&self, bucket: &str) -> Option<&CategoryBucket> {
        self.buckets.iter().find(|b| b.bucket == bucket)
    }

    /// Results across all buckets.
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.results.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl CategoryRouter {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        CategoryRouter { routes }
    }

    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }

    /// Index of the first route whose substring occurs in `url`.
    pub fn route(&self, url: &str) -> Option<usize> {
        self.routes
            .iter()
            .position(|r| !r.url_contains.is_empty() && url.contains(&r.url_contains))
    }

    /// Split fused hits into buckets, rank each bucket and truncate it to its limit.
    pub fn partition(
        &self,
        hits: Vec<FusedHit>,
        corpus: &Corpus,
        limits: &CategoryLimits,
    ) -> CategoryResults {
        let mut grouped: Vec<Vec<FusedHit>> = vec![Vec::new(); self.routes.len()];
        let mut dropped = 0usize;

        for hit in hits {
            let url = corpus.get(hit.position).map(|d| d.url.as_str()).unwrap_or("");
            match self.route(url) {
                Some(i) => grouped[i].push(hit),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, "Results matched no category route");
        }

        let buckets = self
            .routes
            .iter()
            .zip(grouped)
            .map(|(route, mut group)| {
                rank(&mut group);
                let limit = limits.get(&route.bucket).copied().unwrap_or(0);
                let results = group
                    .iter()
                    .take(limit)
                    .filter_map(|hit| ScoredResult::from_hit(hit, corpus))
                    .collect();
                CategoryBucket {
                    bucket: route.bucket.clone(),
                    label: route.label.clone(),
                    results,
                }
            })
            .collect();

        CategoryResults { buckets }
    }
}
