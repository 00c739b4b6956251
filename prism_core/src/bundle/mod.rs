//! Turns a source tree into one size-bounded, secret-scrubbed text artifact.

pub mod patterns;
pub mod secrets;
pub mod walker;

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::BundleError;
use patterns::{matches_simple_glob, ExcludeRuleSet};

pub const DEFAULT_MAX_SIZE_KB: usize = 500;

/// Files above this size are skipped without being read.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

const BINARY_SNIFF_BYTES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Included,
    Excluded,
    BlockedSecret,
    SkippedBinary,
    SkippedOversize,
    SkippedUnreadable,
    Truncated,
    NotIncluded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub classification: Classification,
    /// Scrubbed content, present only for included files.
    #[serde(skip)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleManifest {
    pub included: Vec<String>,
    pub blocked: Vec<String>,
    pub redacted_count: usize,
    pub truncated_count: usize,
    pub excluded_count: usize,
    pub binary_count: usize,
    pub oversize_count: usize,
    pub unreadable_count: usize,
    pub negation_lines: usize,
    pub malformed_lines: usize,
    /// Size of the file sections, excluding the header.
    pub total_bytes: usize,
    pub used_gitignore: bool,
    pub strategy: String,
    pub entries: Vec<FileEntry>,
}

impl BundleManifest {
    fn record(&mut self, path: &str, classification: Classification) {
        match classification {
            Classification::Excluded => self.excluded_count += 1,
            Classification::BlockedSecret => self.blocked.push(path.to_string()),
            Classification::SkippedBinary => self.binary_count += 1,
            Classification::SkippedOversize => self.oversize_count += 1,
            Classification::SkippedUnreadable => self.unreadable_count += 1,
            Classification::Truncated => self.truncated_count += 1,
            Classification::Included | Classification::NotIncluded => {}
        }
        self.entries.push(FileEntry {
            path: path.to_string(),
            classification,
            content: None,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOptions {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_size_kb: usize,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_size_kb: DEFAULT_MAX_SIZE_KB,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub artifact: String,
    pub manifest: BundleManifest,
}

#[derive(Debug, Clone, Default)]
pub struct Bundler {
    options: BundleOptions,
}

impl Bundler {
    pub fn new(options: BundleOptions) -> Self {
        Self { options }
    }

    /// Walks `root` and builds the artifact. Only an unusable root is an
    /// error; per-file problems are recorded in the manifest.
    pub fn bundle(&self, root: &Path) -> Result<Bundle, BundleError> {
        let files = walker::walk(root)?;
        let rules = ExcludeRuleSet::for_root(root, self.options.exclude.clone());
        let budget = self.options.max_size_kb.saturating_mul(1024);

        tracing::info!(
            root = %root.display(),
            files = files.len(),
            strategy = %rules.strategy(),
            "bundling tree"
        );

        let mut manifest = BundleManifest {
            used_gitignore: rules.uses_gitignore(),
            negation_lines: rules.negations(),
            malformed_lines: rules.malformed(),
            strategy: rules.strategy(),
            ..BundleManifest::default()
        };
        let mut body = String::new();
        let mut budget_exhausted = false;

        for file in &files {
            let path = file.relative.as_str();

            if !self.options.include.is_empty()
                && !self
                    .options
                    .include
                    .iter()
                    .any(|p| matches_simple_glob(path, p))
            {
                manifest.record(path, Classification::NotIncluded);
                continue;
            }
            if rules.is_excluded(path) {
                tracing::trace!(path, "excluded");
                manifest.record(path, Classification::Excluded);
                continue;
            }
            if secrets::is_secret_file(path) {
                tracing::debug!(path, "blocked secret file");
                manifest.record(path, Classification::BlockedSecret);
                continue;
            }

            let bytes = match read_bounded(&file.path) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    tracing::debug!(path, "skipping oversize file");
                    manifest.record(path, Classification::SkippedOversize);
                    continue;
                }
                Err(err) => {
                    tracing::debug!(path, error = %err, "skipping unreadable file");
                    manifest.record(path, Classification::SkippedUnreadable);
                    continue;
                }
            };
            if looks_binary(&bytes) {
                tracing::trace!(path, "skipping binary file");
                manifest.record(path, Classification::SkippedBinary);
                continue;
            }

            let text = String::from_utf8_lossy(&bytes);
            let (scrubbed, redactions) = secrets::redact(&text);
            let section = format!("=== {} ===\n{}\n", path, scrubbed);

            if budget_exhausted || body.len() + section.len() > budget {
                budget_exhausted = true;
                manifest.record(path, Classification::Truncated);
                continue;
            }

            body.push_str(&section);
            manifest.redacted_count += redactions;
            manifest.included.push(path.to_string());
            manifest.entries.push(FileEntry {
                path: path.to_string(),
                classification: Classification::Included,
                content: Some(scrubbed),
            });
        }

        manifest.total_bytes = body.len();
        tracing::info!(
            included = manifest.included.len(),
            blocked = manifest.blocked.len(),
            excluded = manifest.excluded_count,
            truncated = manifest.truncated_count,
            redacted = manifest.redacted_count,
            bytes = manifest.total_bytes,
            "bundle built"
        );

        let artifact = format!("{}{}", header(&manifest), body);
        Ok(Bundle { artifact, manifest })
    }
}

fn header(manifest: &BundleManifest) -> String {
    let mut lines = vec![
        format!(
            "# Project bundle generated {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!(
            "# Files: {} | Size: {:.1} KB | Excludes: {}",
            manifest.included.len(),
            manifest.total_bytes as f64 / 1024.0,
            manifest.strategy
        ),
    ];
    if !manifest.blocked.is_empty() {
        lines.push(format!(
            "# Blocked secret files: {}",
            manifest.blocked.len()
        ));
    }
    if manifest.redacted_count > 0 {
        lines.push(format!("# Redacted values: {}", manifest.redacted_count));
    }
    if manifest.truncated_count > 0 {
        lines.push(format!(
            "# Truncated: {} file(s) over the size budget",
            manifest.truncated_count
        ));
    }
    if manifest.negation_lines > 0 {
        lines.push(format!(
            "# Ignored {} unsupported .gitignore negation line(s)",
            manifest.negation_lines
        ));
    }
    if manifest.malformed_lines > 0 {
        lines.push(format!(
            "# Skipped {} malformed .gitignore line(s)",
            manifest.malformed_lines
        ));
    }
    format!("{}\n\n", lines.join("\n"))
}

/// Reads the file unless it exceeds [`MAX_FILE_BYTES`] (`Ok(None)`).
fn read_bounded(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    let metadata = fs::metadata(path)?;
    if metadata.len() > MAX_FILE_BYTES {
        return Ok(None);
    }
    fs::read(path).map(Some)
}

/// More than 10% control bytes (excluding common whitespace) in the first
/// [`BINARY_SNIFF_BYTES`] bytes.
fn looks_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sample.is_empty() {
        return false;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t' | 0x0c))
        .count();
    control * 10 > sample.len()
}
