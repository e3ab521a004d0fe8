//! Content-addressed cache of conclusive oracle answers.
//!
//! Entries are keyed by the SHA-256 of the exact `.net` and `.xml` text
//! handed to the solver, so a hit is only possible for a byte-identical
//! query. Each entry is one JSON file that is written once and never
//! rewritten.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::oracle::OracleVerdict;

pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache entry {path} could not be encoded: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheEntry {
    schema_version: u32,
    key: String,
    verdict: OracleVerdict,
}

#[derive(Debug)]
pub struct ResultCache {
    dir: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(ResultCache {
            dir,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key(net_text: &str, xml_text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(net_text.as_bytes());
        hasher.update([0u8]);
        hasher.update(xml_text.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Look up a key, counting the outcome. Unreadable or foreign entries
    /// count as misses.
    pub fn get(&self, key: &str) -> Option<OracleVerdict> {
        let path = self.entry_path(key);
        let found = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<CacheEntry>(&text) {
                Ok(entry) if entry.schema_version == CACHE_SCHEMA_VERSION && entry.key == key => {
                    Some(entry.verdict)
                }
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "ignoring cache entry with mismatched key or schema");
                    None
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                    None
                }
            },
            Err(_) => None,
        };
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store a conclusive verdict. Timeouts are never cached and an
    /// existing entry is left untouched.
    pub fn put(&self, key: &str, verdict: &OracleVerdict) -> Result<(), CacheError> {
        if !verdict.is_conclusive() {
            return Ok(());
        }
        let path = self.entry_path(key);
        let entry = CacheEntry {
            schema_version: CACHE_SCHEMA_VERSION,
            key: key.to_string(),
            verdict: verdict.clone(),
        };
        let text = serde_json::to_string_pretty(&entry).map_err(|source| CacheError::Encode {
            path: path.clone(),
            source,
        })?;
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        let mut staged = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        staged.write_all(text.as_bytes()).map_err(io_err)?;
        match staged.persist_noclobber(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(io_err(e.error)),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
