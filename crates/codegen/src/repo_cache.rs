//! Read-only cache of upstream board constraint files.
//!
//! Cached content is keyed by `(board name, upstream revision)` and carries
//! a sha256 sidecar; a checksum mismatch is treated as a miss. At most one
//! network fetch happens per build, bounded by a timeout, and every failure
//! path falls back silently to the board's built-in pinout.

use pciforge_config::BoardDescriptor;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upstream revision the cache is pinned to. Bumping this invalidates every
/// cached entry at once.
pub const DEFAULT_UPSTREAM_REV: &str = "v4.14";

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinoutSource {
    /// Served from the on-disk cache (possibly freshly fetched).
    Cached,
    /// Built-in fallback; the output carries a warning comment.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinoutConstraints {
    pub text: String,
    pub source: PinoutSource,
}

impl PinoutConstraints {
    pub fn is_fallback(&self) -> bool {
        self.source == PinoutSource::Fallback
    }

    pub fn source_label(&self) -> &'static str {
        match self.source {
            PinoutSource::Cached => "upstream snapshot",
            PinoutSource::Fallback => "built-in fallback",
        }
    }

    /// The board's built-in pinout, or a marker comment when it has none.
    pub fn fallback_for(board: &BoardDescriptor) -> Self {
        let text = board
            .fallback_pinout_xdc
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "# No pinout data available for board '{}'.\n\
                     # Populate the constraint cache or supply constraints by hand.\n",
                    board.name
                )
            });
        Self {
            text,
            source: PinoutSource::Fallback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepoCache {
    cache_dir: PathBuf,
    /// Base URL of the upstream constraint repository; `None` disables
    /// fetching entirely (cache hits and fallbacks only).
    upstream_base: Option<String>,
    upstream_rev: String,
    timeout: Duration,
}

impl RepoCache {
    pub fn new(cache_dir: impl Into<PathBuf>, upstream_base: Option<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            upstream_base,
            upstream_rev: DEFAULT_UPSTREAM_REV.to_string(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// A cache that never fetches and never hits: every lookup falls back.
    pub fn offline() -> Self {
        Self::new(std::env::temp_dir().join("pciforge-cache-disabled"), None)
    }

    pub fn with_upstream_rev(mut self, rev: impl Into<String>) -> Self {
        self.upstream_rev = rev.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve pinout constraints for a board: cache hit, else one fetch
    /// attempt, else fallback. Never fails the build.
    pub fn resolve_pinout(&self, board: &BoardDescriptor) -> PinoutConstraints {
        if let Some(text) = self.read_cached(board.name) {
            tracing::debug!(board = board.name, "constraint cache hit");
            return PinoutConstraints {
                text,
                source: PinoutSource::Cached,
            };
        }

        if let Some(base) = &self.upstream_base {
            match self.fetch_upstream(base, board.name) {
                Ok(text) => {
                    if let Err(e) = self.write_cached(board.name, &text) {
                        tracing::warn!(board = board.name, "cannot persist cache entry: {e}");
                    }
                    return PinoutConstraints {
                        text,
                        source: PinoutSource::Cached,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        board = board.name,
                        "upstream constraint fetch failed, using fallback: {e}"
                    );
                }
            }
        }

        PinoutConstraints::fallback_for(board)
    }

    fn entry_path(&self, board: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{board}-{}.xdc", self.upstream_rev))
    }

    fn read_cached(&self, board: &str) -> Option<String> {
        let path = self.entry_path(board);
        let text = std::fs::read_to_string(&path).ok()?;
        let recorded = std::fs::read_to_string(checksum_path(&path)).ok()?;
        if recorded.trim() != sha256_hex(text.as_bytes()) {
            tracing::warn!(board, "cache checksum mismatch, discarding entry");
            return None;
        }
        Some(text)
    }

    /// Write-with-lock: one writer at a time, readers keep seeing the
    /// previous entry until both files land.
    fn write_cached(&self, board: &str, text: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let path = self.entry_path(board);
        let lock_path = path.with_extension("lock");

        let _lock = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(board, "another writer holds the cache lock, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let result = std::fs::write(&path, text)
            .and_then(|_| std::fs::write(checksum_path(&path), sha256_hex(text.as_bytes())));
        let _ = std::fs::remove_file(&lock_path);
        result
    }

    fn fetch_upstream(
        &self,
        base: &str,
        board: &str,
    ) -> std::result::Result<String, pciforge_core::Error> {
        let url = format!(
            "{}/{}/{}/pinout.xdc",
            base.trim_end_matches('/'),
            self.upstream_rev,
            board
        );
        tracing::info!(%url, "fetching board constraints");

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| pciforge_core::Error::CacheFetch(e.to_string()))?;
        let response = client
            .get(&url)
            .send()
            .map_err(|e| pciforge_core::Error::CacheFetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(pciforge_core::Error::CacheFetch(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }
        response
            .text()
            .map_err(|e| pciforge_core::Error::CacheFetch(e.to_string()))
    }
}

fn checksum_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".sha256");
    PathBuf::from(os)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
