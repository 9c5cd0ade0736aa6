/// Corpus loader
///
/// Reads category-tagged CSV exports, normalizes every record and appends the
/// result to the corpus in source order. The primary sources are required;
/// the issue-tracker export is optional and degrades to a smaller corpus.

use std::path::{Path, PathBuf};

use super::{normalize, Corpus, Document, Partition, RawRecord};
use crate::config::{ColumnConfig, DataConfig};
use crate::errors::QnaError;

/// One tabular file and the category stamped on each of its records.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub category: String,
}

/// Outcome of loading the optional secondary corpus.
#[derive(Debug)]
pub enum SecondaryLoad {
    Disabled,
    Missing(PathBuf),
    Failed(QnaError),
    Loaded(Vec<Document>),
}

/// Column positions resolved from the header row.
struct ColumnIndex {
    id: Option<usize>,
    title: usize,
    body: Option<usize>,
    comments: Option<usize>,
    url: usize,
}

impl ColumnIndex {
    fn resolve(headers: &csv::StringRecord, columns: &ColumnConfig) -> Result<Self, String> {
        // Excel-style exports prefix the first header with a BOM
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == name)
        };
        Ok(ColumnIndex {
            id: find(&columns.id),
            title: find(&columns.title).ok_or_else(|| format!("missing '{}' column", columns.title))?,
            body: find(&columns.body),
            comments: find(&columns.comments),
            url: find(&columns.url).ok_or_else(|| format!("missing '{}' column", columns.url))?,
        })
    }
}

/// Read every record of one CSV file.
fn read_source(spec: &SourceSpec, columns: &ColumnConfig) -> Result<Vec<Document>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(&spec.path)
        .map_err(|e| format!("{}: {}", spec.path.display(), e))?;

    let headers = reader
        .headers()
        .map_err(|e| format!("{}: {}", spec.path.display(), e))?
        .clone();
    let index = ColumnIndex::resolve(&headers, columns)
        .map_err(|e| format!("{}: {}", spec.path.display(), e))?;

    let cell = |record: &csv::StringRecord, idx: Option<usize>| {
        idx.and_then(|i| record.get(i)).unwrap_or_default().to_string()
    };

    let mut documents = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("{}: {}", spec.path.display(), e))?;
        let mut id = cell(&record, index.id);
        if id.trim().is_empty() {
            id = format!("{}#{}", spec.category, row + 1);
        }
        let raw = RawRecord {
            id,
            title: cell(&record, Some(index.title)),
            body: cell(&record, index.body),
            comments: cell(&record, index.comments),
            url: cell(&record, Some(index.url)),
        };
        documents.push(normalize(raw, &spec.category));
    }
    Ok(documents)
}

/// Load and concatenate the given sources in order.
///
/// Any unreadable source fails the whole call; use `load_secondary` for
/// sources that may be absent.
pub fn load(sources: &[SourceSpec], columns: &ColumnConfig) -> Result<Vec<Document>, QnaError> {
    let mut documents = Vec::new();
    for spec in sources {
        if !spec.path.exists() {
            return Err(QnaError::PrimaryData(format!(
                "corpus file not found: {}",
                spec.path.display()
            )));
        }
        let loaded = read_source(spec, columns).map_err(QnaError::PrimaryData)?;
        tracing::info!(
            path = %spec.path.display(),
            category = %spec.category,
            count = loaded.len(),
            "Loaded corpus source"
        );
        documents.extend(loaded);
    }
    Ok(documents)
}

/// Load the issue-tracker export if it is enabled and present.
pub fn load_secondary(data: &DataConfig) -> SecondaryLoad {
    if !data.enable_bugs_data {
        return SecondaryLoad::Disabled;
    }
    let path = data.path_of(&data.bugs_file);
    if !Path::new(&path).exists() {
        return SecondaryLoad::Missing(path);
    }
    let spec = SourceSpec { path, category: data.bugs_category.clone() };
    match read_source(&spec, &data.columns) {
        Ok(documents) => SecondaryLoad::Loaded(documents),
        Err(e) => SecondaryLoad::Failed(QnaError::SecondaryData(e)),
    }
}

/// Build the unified corpus: primary sources first, then the secondary corpus.
pub fn load_corpus(data: &DataConfig) -> Result<Corpus, QnaError> {
    let primary: Vec<SourceSpec> = data
        .primary_sources
        .iter()
        .map(|s| SourceSpec { path: data.path_of(&s.file), category: s.category.clone() })
        .collect();

    let articles = load(&primary, &data.columns)?;
    if articles.is_empty() {
        return Err(QnaError::PrimaryData("primary corpus contains no records".to_string()));
    }

    let mut corpus = Corpus::new();
    let article_count = articles.len();
    corpus.push_partition(Partition::Articles, articles);

    let bugs = match load_secondary(data) {
        SecondaryLoad::Loaded(documents) => documents,
        SecondaryLoad::Disabled => {
            tracing::info!("Issue-tracker corpus disabled (data.enable_bugs_data=false)");
            Vec::new()
        }
        SecondaryLoad::Missing(path) => {
            tracing::warn!(path = %path.display(), "Issue-tracker corpus file not found, continuing without it");
            Vec::new()
        }
        SecondaryLoad::Failed(e) => {
            tracing::warn!(error = %e, "Issue-tracker corpus unreadable, continuing without it");
            Vec::new()
        }
    };
    let bug_count = bugs.len();
    corpus.push_partition(Partition::Bugs, bugs);

    tracing::info!(
        total = corpus.len(),
        articles = article_count,
        bugs = bug_count,
        "Corpus loaded"
    );
    Ok(corpus)
}
