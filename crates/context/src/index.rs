//! Repository keyword index.
//!
//! A lightweight inverted-ish index over the workspace tree: each text file
//! maps to the set of identifier-like tokens it contains, together with its
//! size and mtime. Search scores files by how many distinct query tokens
//! they contain (presence only, no term frequency), which is cheap, fully
//! deterministic, and good enough for picking candidate context files.

use chrono::{DateTime, Utc};
use codeforge_config::ContextConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::ContextError;

/// Directories never descended into while indexing.
const SKIP_DIRS: &[&str] = &[
    ".git",
    ".venv",
    ".codeforge",
    "target",
    "node_modules",
    "__pycache__",
];

/// File extensions treated as binary and skipped.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "bmp", "webp", "pdf", "zip", "tar", "gz", "bz2", "xz",
    "7z", "exe", "dll", "so", "dylib", "a", "o", "bin", "class", "jar", "pyc", "wasm", "woff",
    "woff2", "ttf", "eot", "mp3", "mp4", "avi", "mov", "db", "sqlite",
];

/// Words too common to carry retrieval signal.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "are", "was", "were", "not", "but",
    "can", "will", "you", "your", "has", "have", "had", "all", "any", "its", "into", "out",
    "use", "used", "get", "set", "new", "one", "two", "when", "then", "than", "also",
];

/// Caps applied while indexing a single file.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Maximum distinct tokens kept per file.
    pub max_tokens_per_file: usize,
    /// Maximum bytes read from any one file.
    pub max_read_bytes: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_tokens_per_file: 800,
            max_read_bytes: 200_000,
        }
    }
}

impl From<&ContextConfig> for IndexOptions {
    fn from(config: &ContextConfig) -> Self {
        Self {
            max_tokens_per_file: config.max_index_tokens,
            max_read_bytes: config.max_read_bytes,
        }
    }
}

/// Index record for a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,

    /// File size in bytes
    pub size: u64,

    /// Sorted, deduplicated tokens found in the file
    pub tokens: Vec<String>,
}

impl IndexEntry {
    fn contains(&self, token: &str) -> bool {
        self.tokens.binary_search_by(|t| t.as_str().cmp(token)).is_ok()
    }
}

/// A search hit, highest score first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub path: String,
    pub score: usize,
}

/// The full workspace index, keyed by root-relative path.
///
/// `BTreeMap` keeps iteration order stable so rebuilds and persistence are
/// byte-for-byte reproducible for an unchanged tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextIndex {
    pub files: BTreeMap<String, IndexEntry>,
    pub built_at: DateTime<Utc>,
}

impl ContextIndex {
    /// Walk `root` and index every text file under it.
    pub fn build(root: &Path, options: &IndexOptions) -> Self {
        let mut files = BTreeMap::new();

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIP_DIRS.contains(&name)))
        });

        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_binary_path(path) {
                continue;
            }
            let Some(relative) = relative_path(root, path) else {
                continue;
            };
            match index_file(path, options) {
                Some(record) => {
                    files.insert(relative, record);
                }
                None => {
                    tracing::debug!(path = %path.display(), "Skipped unreadable file");
                }
            }
        }

        tracing::info!(files = files.len(), root = %root.display(), "Built context index");
        Self {
            files,
            built_at: Utc::now(),
        }
    }

    /// Look up a single file's record.
    pub fn entry(&self, path: &str) -> Option<&IndexEntry> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Score every indexed file against a free-text query and return the
    /// top `limit` hits.
    ///
    /// Score is the number of distinct query tokens present in the file.
    /// Ties break by mtime (newest first), then by path, so results are
    /// stable across runs.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query_tokens: BTreeSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() {
            return vec![];
        }

        let mut hits: Vec<(&String, &IndexEntry, usize)> = self
            .files
            .iter()
            .filter_map(|(path, entry)| {
                let score = query_tokens.iter().filter(|t| entry.contains(t)).count();
                (score > 0).then_some((path, entry, score))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.2.cmp(&a.2)
                .then(b.1.mtime.cmp(&a.1.mtime))
                .then(a.0.cmp(b.0))
        });
        hits.truncate(limit);

        hits.into_iter()
            .map(|(path, _, score)| SearchHit {
                path: path.clone(),
                score,
            })
            .collect()
    }

    /// Persist the index as JSON.
    pub fn save(&self, path: &Path) -> Result<(), ContextError> {
        let json =
            serde_json::to_string(self).map_err(|e| ContextError::Persistence(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ContextError::Persistence(e.to_string()))
    }

    /// Load a previously saved index.
    pub fn load(path: &Path) -> Result<Self, ContextError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ContextError::Persistence(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ContextError::Persistence(e.to_string()))
    }
}

/// Split text into lowercase identifier-like tokens.
///
/// A token is a run of ASCII alphanumerics and underscores, longer than two
/// characters, and not a stop word.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            push_token(&mut tokens, std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, current);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, token: String) {
    if token.len() > 2 && !STOP_WORDS.contains(&token.as_str()) {
        tokens.push(token);
    }
}

fn index_file(path: &Path, options: &IndexOptions) -> Option<IndexEntry> {
    let metadata = std::fs::metadata(path).ok()?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut bytes = std::fs::read(path).ok()?;
    if bytes.len() as u64 > options.max_read_bytes {
        bytes.truncate(options.max_read_bytes as usize);
    }
    let content = String::from_utf8_lossy(&bytes);

    let raw = tokenize(&content);
    let capped: BTreeSet<String> = raw
        .into_iter()
        .take(options.max_tokens_per_file)
        .collect();

    Some(IndexEntry {
        mtime,
        size: metadata.len(),
        tokens: capped.into_iter().collect(),
    })
}

fn is_binary_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("parser.rs"),
            "fn parse_config(input: &str) -> Config { tokenizer lexer grammar }",
        )
        .unwrap();
        fs::write(
            dir.path().join("server.rs"),
            "async fn handle_request(socket: TcpStream) { router middleware }",
        )
        .unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(
            dir.path().join("docs").join("guide.md"),
            "How the parser and the grammar interact with the lexer.",
        )
        .unwrap();
        dir
    }

    #[test]
    fn tokenize_filters_short_and_stop_words() {
        let tokens = tokenize("The parse_config fn is ok and READY");
        assert_eq!(tokens, vec!["parse_config", "ready"]);
    }

    #[test]
    fn tokenize_keeps_underscores() {
        let tokens = tokenize("handle_request(socket)");
        assert!(tokens.contains(&"handle_request".to_string()));
        assert!(tokens.contains(&"socket".to_string()));
    }

    #[test]
    fn build_indexes_text_files() {
        let dir = scratch_tree();
        let index = ContextIndex::build(dir.path(), &IndexOptions::default());
        assert_eq!(index.len(), 3);
        assert!(index.entry("parser.rs").is_some());
        assert!(index.entry("docs/guide.md").is_some());
    }

    #[test]
    fn build_skips_excluded_dirs() {
        let dir = scratch_tree();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target").join("junk.rs"), "fn junk() {}").unwrap();
        let index = ContextIndex::build(dir.path(), &IndexOptions::default());
        assert!(index.entry("target/junk.rs").is_none());
    }

    #[test]
    fn build_skips_binary_extensions() {
        let dir = scratch_tree();
        fs::write(dir.path().join("logo.png"), [0u8, 1, 2, 3]).unwrap();
        let index = ContextIndex::build(dir.path(), &IndexOptions::default());
        assert!(index.entry("logo.png").is_none());
    }

    #[test]
    fn options_follow_retrieval_config() {
        let config = ContextConfig {
            max_index_tokens: 10,
            max_read_bytes: 64,
            ..ContextConfig::default()
        };
        let options = IndexOptions::from(&config);
        assert_eq!(options.max_tokens_per_file, 10);
        assert_eq!(options.max_read_bytes, 64);
    }

    #[test]
    fn token_cap_respected() {
        let dir = tempfile::tempdir().unwrap();
        let many: String = (0..2000).map(|i| format!("word{i} ")).collect();
        fs::write(dir.path().join("big.txt"), many).unwrap();
        let index = ContextIndex::build(
            dir.path(),
            &IndexOptions {
                max_tokens_per_file: 10,
                ..Default::default()
            },
        );
        assert!(index.entry("big.txt").unwrap().tokens.len() <= 10);
    }

    #[test]
    fn search_scores_by_distinct_token_presence() {
        let dir = scratch_tree();
        let index = ContextIndex::build(dir.path(), &IndexOptions::default());

        let hits = index.search("parser grammar lexer", 10);
        assert!(!hits.is_empty());
        // Both parser.rs and docs/guide.md contain all three tokens.
        assert_eq!(hits[0].score, 3);
        assert!(hits.iter().all(|h| h.path != "server.rs"));
    }

    #[test]
    fn search_ties_break_by_mtime_then_path() {
        let mut files = BTreeMap::new();
        files.insert(
            "a.rs".to_string(),
            IndexEntry {
                mtime: 100,
                size: 1,
                tokens: vec!["alpha".into()],
            },
        );
        files.insert(
            "b.rs".to_string(),
            IndexEntry {
                mtime: 200,
                size: 1,
                tokens: vec!["alpha".into()],
            },
        );
        files.insert(
            "c.rs".to_string(),
            IndexEntry {
                mtime: 200,
                size: 1,
                tokens: vec!["alpha".into()],
            },
        );
        let index = ContextIndex {
            files,
            built_at: Utc::now(),
        };

        let hits = index.search("alpha", 10);
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["b.rs", "c.rs", "a.rs"]);
    }

    #[test]
    fn search_empty_query_yields_nothing() {
        let dir = scratch_tree();
        let index = ContextIndex::build(dir.path(), &IndexOptions::default());
        assert!(index.search("", 10).is_empty());
        assert!(index.search("a an in", 10).is_empty());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = scratch_tree();
        let index = ContextIndex::build(dir.path(), &IndexOptions::default());
        let path = dir.path().join("index.json");
        index.save(&path).unwrap();

        let loaded = ContextIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(
            loaded.entry("parser.rs").unwrap().tokens,
            index.entry("parser.rs").unwrap().tokens
        );
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(ContextIndex::load(Path::new("/nonexistent/index.json")).is_err());
    }
}
