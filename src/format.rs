/// Plain-text rendering of search results for chat replies and the CLI.

use std::fmt::Write;

use crate::search::{CategoryResults, ScoredResult};

const RULE_WIDTH: usize = 27;

fn write_result(out: &mut String, rank: usize, label: Option<&str>, result: &ScoredResult) {
    let doc = &result.document;
    match label {
        Some(label) => {
            let _ = writeln!(out, "{}. [{}] {}", rank, label, doc.title);
        }
        None => {
            let _ = writeln!(out, "{}. {}", rank, doc.title);
        }
    }
    let _ = writeln!(out, "   Category: {}", doc.category);
    let _ = writeln!(out, "   Score: {:.3}", result.combined_score);
    let _ = writeln!(
        out,
        "   {}",
        if result.keyword_matched() { "Keyword match" } else { "Semantic match" }
    );
    let _ = writeln!(out, "   {}", doc.url);
    out.push('\n');
}

/// Render a globally ranked result list.
pub fn format_results(results: &[ScoredResult], query: &str) -> String {
    if results.is_empty() {
        return format!("No related posts found for '{}'.", query);
    }
    let mut out = format!("Hybrid search results for '{}'\n\n", query);
    for (i, result) in results.iter().enumerate() {
        write_result(&mut out, i + 1, None, result);
    }
    out.truncate(out.trim_end().len());
    out
}

/// Render category-partitioned results, one section per bucket in route order.
pub fn format_category_results(results: &CategoryResults, query: &str) -> String {
    let mut out = format!("Hybrid search results by category for '{}'\n\n", query);
    let rule = "=".repeat(RULE_WIDTH);
    for bucket in &results.buckets {
        let _ = writeln!(out, "{rule}\n{} results\n{rule}", bucket.label);
        if bucket.results.is_empty() {
            let _ = writeln!(out, "No related results in {}.\n", bucket.label);
            continue;
        }
        for (i, result) in bucket.results.iter().enumerate() {
            write_result(&mut out, i + 1, Some(&bucket.label), result);
        }
    }
    out.truncate(out.trim_end().len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::test_document;
    use crate::search::{CategoryBucket, MatchSource};

    fn result(title: &str, url: &str, score: f64, lexical: f64) -> ScoredResult {
        ScoredResult {
            position: 0,
            document: test_document("1", title, "", "DBS", url),
            combined_score: score,
            lexical_score: lexical,
            semantic_score: 0.5,
            bonus: 0.0,
            match_source: MatchSource::Hybrid,
        }
    }

    #[test]
    fn test_empty_list_message() {
        assert_eq!(format_results(&[], "vpn"), "No related posts found for 'vpn'.");
    }

    #[test]
    fn test_ranked_list_shows_title_score_and_url() {
        let text = format_results(
            &[
                result("Login error", "https://cafe.naver.com/1", 1.23456, 0.4),
                result("Crash", "https://cafe.naver.com/2", 0.5, 0.0),
            ],
            "login error",
        );
        assert!(text.starts_with("Hybrid search results for 'login error'"));
        assert!(text.contains("1. Login error"));
        assert!(text.contains("Score: 1.235"));
        assert!(text.contains("Keyword match"));
        assert!(text.contains("2. Crash"));
        assert!(text.contains("Semantic match"));
        assert!(text.ends_with("https://cafe.naver.com/2"));
    }

    #[test]
    fn test_empty_bucket_gets_its_own_message() {
        let results = CategoryResults {
            buckets: vec![
                CategoryBucket {
                    bucket: "product_qna".into(),
                    label: "Product QnA".into(),
                    results: vec![result("Login error", "https://cafe.naver.com/1", 0.9, 0.2)],
                },
                CategoryBucket { bucket: "bugs_qna".into(), label: "Bugs QnA".into(), results: vec![] },
            ],
        };
        let text = format_category_results(&results, "login");
        assert!(text.contains("Product QnA results"));
        assert!(text.contains("1. [Product QnA] Login error"));
        assert!(text.contains("No related results in Bugs QnA."));
        let product = text.find("Product QnA results").unwrap();
        let bugs = text.find("Bugs QnA results").unwrap();
        assert!(product < bugs);
    }
}
