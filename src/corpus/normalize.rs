/// Document normalizer: raw record fields → dense and lexical text forms.

use super::Document;

/// Placeholder the crawler writes into the comments column of uncommented posts.
const NO_COMMENTS_PLACEHOLDER: &str = "댓글 없음";

/// How many times the title is repeated in the lexical text.
const TITLE_REPEAT: usize = 5;

/// Record fields exactly as read from a source file.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub id: String,
    pub title: String,
    pub body: String,
    pub comments: String,
    pub url: String,
}

/// Trim a field; blank cells and spreadsheet `nan` markers count as absent.
fn clean(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn clean_comments(raw: &str) -> Option<String> {
    clean(raw).filter(|c| c != NO_COMMENTS_PLACEHOLDER)
}

/// Title, body and comments separated by blank lines, absent segments omitted.
pub fn dense_text(title: &str, body: &str, comments: Option<&str>) -> String {
    [Some(title), Some(body), comments]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Title repeated five times, then body, then comments, space separated.
pub fn lexical_text(title: &str, body: &str, comments: Option<&str>) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(TITLE_REPEAT + 2);
    if !title.is_empty() {
        parts.extend(std::iter::repeat(title).take(TITLE_REPEAT));
    }
    if !body.is_empty() {
        parts.push(body);
    }
    if let Some(c) = comments.filter(|c| !c.is_empty()) {
        parts.push(c);
    }
    parts.join(" ")
}

/// Stamp a raw record with its category and derive both text forms.
pub fn normalize(raw: RawRecord, category: &str) -> Document {
    let title = clean(&raw.title).unwrap_or_default();
    let body = clean(&raw.body).unwrap_or_default();
    let comments = clean_comments(&raw.comments);

    let dense_text = dense_text(&title, &body, comments.as_deref());
    let lexical_text = lexical_text(&title, &body, comments.as_deref());

    Document {
        id: raw.id.trim().to_string(),
        title,
        body,
        comments,
        category: category.to_string(),
        url: raw.url.trim().to_string(),
        dense_text,
        lexical_text,
    }
}
