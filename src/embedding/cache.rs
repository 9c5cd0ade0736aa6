/// On-disk embedding cache, one file per corpus partition.
///
/// Files are bincode snapshots written through a temporary file and renamed
/// into place. Each snapshot records the model that produced it and a
/// fingerprint of the embedded texts; a snapshot whose model or fingerprint no
/// longer matches is reported as stale and recomputed by the caller.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

use super::EmbeddingMatrix;
use crate::errors::QnaError;

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    model: String,
    fingerprint: String,
    matrix: EmbeddingMatrix,
}

/// Result of looking up a partition cache.
#[derive(Debug)]
pub enum CacheLoad {
    Missing,
    Hit(EmbeddingMatrix),
    /// Readable, but produced from a different model or corpus
    Stale(String),
    /// Unreadable or undecodable
    Corrupt(QnaError),
}

/// SHA-256 over the document count and every text, in order.
pub fn fingerprint<'a, I>(texts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    let mut count: u64 = 0;
    for text in texts {
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
        count += 1;
    }
    hasher.update(count.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn load(path: &Path, model: &str, fingerprint: &str) -> CacheLoad {
    if !path.exists() {
        return CacheLoad::Missing;
    }
    let buf = match fs::read(path) {
        Ok(buf) => buf,
        Err(e) => return CacheLoad::Corrupt(QnaError::Cache(format!("{}: {}", path.display(), e))),
    };
    let file: CacheFile = match bincode::deserialize(&buf) {
        Ok(file) => file,
        Err(e) => return CacheLoad::Corrupt(QnaError::Cache(format!("{}: {}", path.display(), e))),
    };
    if file.version != CACHE_FORMAT_VERSION {
        return CacheLoad::Stale(format!("format version {} != {}", file.version, CACHE_FORMAT_VERSION));
    }
    if file.model != model {
        return CacheLoad::Stale(format!("built with model '{}'", file.model));
    }
    if file.fingerprint != fingerprint {
        return CacheLoad::Stale("corpus content changed".to_string());
    }
    if !file.matrix.is_well_formed() {
        return CacheLoad::Corrupt(QnaError::Cache(format!(
            "{}: matrix data does not match {} rows x {} dims",
            path.display(),
            file.matrix.len(),
            file.matrix.dim()
        )));
    }
    CacheLoad::Hit(file.matrix)
}

pub fn save(path: &Path, model: &str, fingerprint: &str, matrix: &EmbeddingMatrix) -> Result<(), QnaError> {
    let cache_err = |e: &dyn std::fmt::Display| QnaError::Cache(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| cache_err(&e))?;
    }
    let file = CacheFile {
        version: CACHE_FORMAT_VERSION,
        model: model.to_string(),
        fingerprint: fingerprint.to_string(),
        matrix: matrix.clone(),
    };
    let data = bincode::serialize(&file).map_err(|e| cache_err(&e))?;

    let tmp_path = path.with_extension("tmp");
    {
        let mut out = fs::File::create(&tmp_path).map_err(|e| cache_err(&e))?;
        out.write_all(&data).map_err(|e| cache_err(&e))?;
        out.sync_all().map_err(|e| cache_err(&e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| cache_err(&e))?;
    Ok(())
}

/// Write a cache file with an arbitrary matrix layout, bypassing `EmbeddingMatrix`.
#[cfg(test)]
pub(crate) fn write_raw(path: &Path, model: &str, fingerprint: &str, dim: usize, rows: usize, data: Vec<f32>) {
    #[derive(Serialize)]
    struct RawMatrix {
        dim: usize,
        rows: usize,
        data: Vec<f32>,
    }
    #[derive(Serialize)]
    struct RawFile {
        version: u32,
        model: String,
        fingerprint: String,
        matrix: RawMatrix,
    }
    let file = RawFile {
        version: CACHE_FORMAT_VERSION,
        model: model.to_string(),
        fingerprint: fingerprint.to_string(),
        matrix: RawMatrix { dim, rows, data },
    };
    fs::write(path, bincode::serialize(&file).unwrap()).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(2, vec![vec![0.5, -1.0], vec![0.25, 3.0]]).unwrap()
    }

    #[test]
    fn test_save_then_load_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("article_embeddings.bin");
        let fp = fingerprint(["a", "b"]);

        save(&path, "m", &fp, &matrix()).unwrap();
        match load(&path, "m", &fp) {
            CacheLoad::Hit(m) => assert_eq!(m, matrix()),
            other => panic!("expected hit, got {:?}", other),
        }
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_fingerprint_or_model_change_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bin");
        save(&path, "m", &fingerprint(["a"]), &matrix()).unwrap();

        assert!(matches!(load(&path, "m", &fingerprint(["a", "b"])), CacheLoad::Stale(_)));
        assert!(matches!(load(&path, "other", &fingerprint(["a"])), CacheLoad::Stale(_)));
    }

    #[test]
    fn test_garbage_is_corrupt_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bin");
        fs::write(&path, b"\x01\x02not bincode").unwrap();
        match load(&path, "m", "fp") {
            CacheLoad::Corrupt(e) => assert!(!e.is_fatal()),
            other => panic!("expected corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_short_matrix_is_corrupt_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bin");
        let fp = fingerprint(["a", "b"]);
        write_raw(&path, "m", &fp, 4, 2, vec![1.0, 2.0, 3.0]);
        match load(&path, "m", &fp) {
            CacheLoad::Corrupt(e) => assert!(!e.is_fatal()),
            other => panic!("expected corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_well_formed_raw_matrix_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bin");
        write_raw(&path, "m", "fp", 2, 2, vec![0.5, -1.0, 0.25, 3.0]);
        match load(&path, "m", "fp") {
            CacheLoad::Hit(m) => assert_eq!(m, matrix()),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(&dir.path().join("none.bin"), "m", "fp"), CacheLoad::Missing));
    }

    #[test]
    fn test_fingerprint_depends_on_boundaries() {
        assert_ne!(fingerprint(["ab", "c"]), fingerprint(["a", "bc"]));
        assert_eq!(fingerprint(["x"]), fingerprint(["x"]));
    }
}
