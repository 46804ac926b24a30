use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CatalogError;

pub const CATALOG_FORMAT_VERSION: u32 = 1;

/// One uploaded movie. Created on upload, deleted on request, never mutated
/// in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieRecord {
    pub id: String,
    pub title: String,
    /// Generated storage name, decoupled from whatever the user uploaded.
    pub filename: String,
    pub original_filename: String,
    pub size: u64,
    pub uploaded_at: i64,
    pub mime_type: String,
    /// Whether a browser can play the container natively.
    pub streamable: bool,
}

#[derive(Serialize, Deserialize)]
struct CatalogDocument {
    version: u32,
    movies: Vec<MovieRecord>,
}

/// Whole-document JSON store: the complete collection is rewritten on every
/// mutation through a temp-then-rename replace, so a crash mid-write keeps
/// the previous state on disk. Mutations hold the write lock across the file
/// write, which is the only concurrency control this store needs.
#[derive(Clone)]
pub struct CatalogStore {
    movies: Arc<RwLock<Vec<MovieRecord>>>,
    path: PathBuf,
    upload_dir: PathBuf,
}

impl CatalogStore {
    pub fn open(path: PathBuf, upload_dir: PathBuf) -> Self {
        let movies = load(&path);
        Self {
            movies: Arc::new(RwLock::new(movies)),
            path,
            upload_dir,
        }
    }

    pub fn list(&self) -> Vec<MovieRecord> {
        self.movies.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<MovieRecord> {
        self.movies.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn append(&self, record: MovieRecord) -> Result<(), CatalogError> {
        let mut movies = self.movies.write();
        movies.push(record);
        if let Err(err) = persist(&self.path, &movies) {
            movies.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Removes a record and its backing file. The file goes first: when that
    /// deletion fails the record stays and the error surfaces to the caller.
    pub fn remove(&self, id: &str) -> Result<MovieRecord, CatalogError> {
        let mut movies = self.movies.write();
        let index = movies
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;

        let backing = self.upload_dir.join(&movies[index].filename);
        if backing.exists() {
            fs::remove_file(&backing)?;
        }

        let record = movies.remove(index);
        persist(&self.path, &movies)?;
        Ok(record)
    }
}

fn persist(path: &Path, movies: &[MovieRecord]) -> Result<(), CatalogError> {
    let document = CatalogDocument {
        version: CATALOG_FORMAT_VERSION,
        movies: movies.to_vec(),
    };
    let bytes = serde_json::to_vec_pretty(&document)
        .map_err(|err| CatalogError::StorageFailure(std::io::Error::other(err)))?;

    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn load(path: &Path) -> Vec<MovieRecord> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!("Failed to read catalog file: {err}. Starting fresh.");
            return Vec::new();
        }
    };

    if let Ok(document) = serde_json::from_slice::<CatalogDocument>(&bytes) {
        return document.movies;
    }

    // Stores written before the version tag were a bare array.
    match serde_json::from_slice::<Vec<MovieRecord>>(&bytes) {
        Ok(movies) => movies,
        Err(err) => {
            warn!("Failed to deserialize catalog file: {err}. Starting fresh.");
            Vec::new()
        }
    }
}
