// crucible-governance/src/scan.rs
// ============================================================================
// Module: Content Scanner
// Description: Pattern-based sensitive-content detection for staged releases.
// Purpose: Report DLP violations; the hub decides quarantine policy.
// Dependencies: crate::config, regex, serde, walkdir
// ============================================================================

//! ## Overview
//! A flat label-to-regex table scanned over text-like files. The scanner is
//! purely advisory: it reports violations with truncated samples and leaves
//! quarantine decisions to the governance hub. Samples are cut to eight
//! characters so the scan output never re-leaks the value it found.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::DlpConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Extensions considered text-like and safe to scan.
const SAFE_EXTENSIONS: &[&str] = &["json", "md", "txt", "csv", "log", "yaml", "yml"];

/// Maximum sample length surfaced in a violation.
const SAMPLE_MAX_LEN: usize = 8;

/// Built-in pattern table: label, regex.
const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    ("email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
    ("us_ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("credit_card", r"\b(?:\d{4}[ -]?){3}\d{4}\b"),
    ("aws_key", r"\bAKIA[0-9A-Z]{16}\b"),
    ("openai_key", r"\bsk-[A-Za-z0-9]{20,}\b"),
];

// ============================================================================
// SECTION: Violations
// ============================================================================

/// One detected sensitive-content class inside a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Pattern label.
    #[serde(rename = "type")]
    pub kind: String,
    /// Match count.
    pub count: usize,
    /// Truncated first-match sample.
    pub sample: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Scanner construction and traversal errors.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A configured pattern failed to compile.
    #[error("dlp pattern {label} failed to compile: {reason}")]
    BadPattern {
        /// Pattern label.
        label: String,
        /// Compiler failure description.
        reason: String,
    },
    /// Directory traversal failed.
    #[error("scan traversal failure: {0}")]
    Walk(String),
    /// File read failed.
    #[error("scan read failure at {0}: {1}")]
    Read(String, String),
}

// ============================================================================
// SECTION: Content Scanner
// ============================================================================

/// Compiled label-to-pattern scanner.
pub struct ContentScanner {
    /// Compiled patterns in label order.
    patterns: Vec<(String, Regex)>,
}

impl ContentScanner {
    /// Builds the scanner from the DLP policy merged over the built-ins.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::BadPattern`] on an uncompilable configured
    /// pattern.
    pub fn new(config: &DlpConfig) -> Result<Self, ScanError> {
        let mut table: BTreeMap<String, String> = DEFAULT_PATTERNS
            .iter()
            .map(|(label, pattern)| ((*label).to_string(), (*pattern).to_string()))
            .collect();
        for (label, pattern) in &config.patterns {
            table.insert(label.clone(), pattern.clone());
        }

        let mut patterns = Vec::with_capacity(table.len());
        for (label, pattern) in table {
            let regex = Regex::new(&pattern).map_err(|err| ScanError::BadPattern {
                label: label.clone(),
                reason: err.to_string(),
            })?;
            patterns.push((label, regex));
        }
        Ok(Self {
            patterns,
        })
    }

    /// Scans one text and returns every violated pattern class.
    #[must_use]
    pub fn scan_text(&self, text: &str) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (label, regex) in &self.patterns {
            let mut count = 0_usize;
            let mut sample = String::new();
            for found in regex.find_iter(text) {
                if count == 0 {
                    sample = truncate_sample(found.as_str());
                }
                count += 1;
            }
            if count > 0 {
                violations.push(Violation {
                    kind: label.clone(),
                    count,
                    sample,
                });
            }
        }
        violations
    }

    /// Scans one file when its extension is text-like.
    ///
    /// Returns `None` for skipped (non-text) files.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Read`] when a text-like file cannot be read.
    pub fn scan_file(&self, path: &Path) -> Result<Option<Vec<Violation>>, ScanError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let Some(extension) = extension else {
            return Ok(None);
        };
        if !SAFE_EXTENSIONS.contains(&extension.as_str()) {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .map_err(|err| ScanError::Read(path.display().to_string(), err.to_string()))?;
        Ok(Some(self.scan_text(&text)))
    }

    /// Scans a directory tree and returns violations keyed by relative path.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] on traversal or read failure.
    pub fn scan_directory(
        &self,
        root: &Path,
    ) -> Result<BTreeMap<String, Vec<Violation>>, ScanError> {
        let mut findings = BTreeMap::new();
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|err| ScanError::Walk(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(violations) = self.scan_file(entry.path())? {
                if violations.is_empty() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(root)
                    .unwrap_or(entry.path())
                    .display()
                    .to_string();
                findings.insert(relative, violations);
            }
        }
        Ok(findings)
    }
}

/// Truncates a match sample to the surfacing cap.
fn truncate_sample(found: &str) -> String {
    found.chars().take(SAMPLE_MAX_LEN).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use super::*;

    /// Builds a scanner with default policy.
    fn scanner() -> ContentScanner {
        ContentScanner::new(&DlpConfig::default()).expect("scanner")
    }

    #[test]
    fn aws_key_is_detected_with_truncated_sample() {
        let violations = scanner().scan_text("key = AKIA0123456789ABCDEF");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, "aws_key");
        assert_eq!(violations[0].count, 1);
        assert_eq!(violations[0].sample, "AKIA0123");
    }

    #[test]
    fn clean_text_reports_nothing() {
        assert!(scanner().scan_text("latency_p95 118.3 error_rate 0.001").is_empty());
    }

    #[test]
    fn email_and_ssn_count_separately() {
        let text = "contact ops@example.com or admin@example.com; ssn 123-45-6789";
        let violations = scanner().scan_text(text);
        let email = violations.iter().find(|v| v.kind == "email").expect("email");
        assert_eq!(email.count, 2);
        assert!(violations.iter().any(|v| v.kind == "us_ssn"));
    }

    #[test]
    fn binary_extensions_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("weights.bin");
        std::fs::write(&path, b"AKIA0123456789ABCDEF").expect("write");
        assert!(scanner().scan_file(&path).expect("scan").is_none());
    }

    #[test]
    fn directory_scan_keys_by_relative_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("evidence_pack");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(nested.join("table.csv"), "id,key\n1,AKIA0123456789ABCDEF\n")
            .expect("write");
        std::fs::write(dir.path().join("clean.md"), "nothing sensitive").expect("write");

        let findings = scanner().scan_directory(dir.path()).expect("scan");
        assert_eq!(findings.len(), 1);
        assert!(findings.contains_key("evidence_pack/table.csv"));
    }

    #[test]
    fn configured_patterns_extend_the_table() {
        let mut config = DlpConfig::default();
        config
            .patterns
            .insert("internal_ticket".to_string(), r"CRU-[0-9]{4}".to_string());
        let scanner = ContentScanner::new(&config).expect("scanner");
        let violations = scanner.scan_text("see CRU-1234 for context");
        assert!(violations.iter().any(|v| v.kind == "internal_ticket"));
    }
}
