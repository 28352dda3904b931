// crucible-engine/src/sandbox.rs
// ============================================================================
// Module: Crucible Sandbox (CBF Layer)
// Description: Static sanitizer and bounded candidate evaluation.
// Purpose: Fail closed on hostile candidate snippets and runaway
//          evaluations.
// Dependencies: crate::{bench, genespace}, crucible-core, regex
// ============================================================================

//! ## Overview
//! The control barrier has two layers. The static layer scans the
//! candidate's generated smoke snippet for banned imports, banned calls, and
//! exploit patterns, producing structured issue tags. The execution layer
//! replaces arbitrary code execution with a scripted evaluation of the
//! candidate's parameter map against the micro-benchmark, run on a worker
//! thread under a wall-clock deadline and a declared-memory ceiling. Every
//! doubt resolves to rejection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crucible_core::AcquisitionReport;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::bench::BenchProfile;
use crate::bench::BenchResult;
use crate::bench::simulate;
use crate::genespace::ParamValue;

// ============================================================================
// SECTION: Ban Tables
// ============================================================================

/// Module roots rejected by the static analyzer.
const BANNED_IMPORTS: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "multiprocessing",
    "ctypes",
    "resource",
    "requests",
    "urllib",
    "http",
    "ftplib",
    "pickle",
    "marshal",
    "imp",
    "importlib",
    "__main__",
];

/// Call names rejected by the static analyzer.
const BANNED_CALLS: &[&str] = &[
    "system",
    "popen",
    "exec",
    "eval",
    "__import__",
    "fork",
    "spawn",
    "kill",
    "compile",
    "globals",
    "locals",
    "vars",
    "dir",
];

/// Exploit fragments rejected by the static analyzer.
const EXPLOIT_PATTERNS: &[&str] = &[
    r"__class__\s*\.\s*__bases__",
    r"__subclasses__",
    r"__globals__",
    r"getattr\s*\(",
    r"base64\.b64decode",
    r"open\s*\(\s*['\x22][^)]*['\x22]\s*,\s*['\x22]w",
];

/// Returns the compiled import-statement matcher.
fn import_regex() -> &'static Regex {
    static IMPORT: OnceLock<Regex> = OnceLock::new();
    IMPORT.get_or_init(|| {
        #[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
        let matcher = Regex::new(r"(?m)^\s*(?:import|from)\s+([A-Za-z_][A-Za-z0-9_.]*)").unwrap();
        matcher
    })
}

/// Returns the compiled exploit-pattern matchers.
fn exploit_regexes() -> &'static Vec<(String, Regex)> {
    static EXPLOITS: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    EXPLOITS.get_or_init(|| {
        EXPLOIT_PATTERNS
            .iter()
            .filter_map(|pattern| {
                Regex::new(pattern).ok().map(|regex| ((*pattern).to_string(), regex))
            })
            .collect()
    })
}

// ============================================================================
// SECTION: Issue Tags
// ============================================================================

/// Structured sanitizer finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueTag(String);

impl IssueTag {
    /// Creates a banned-import tag.
    #[must_use]
    pub fn ban_import(module: &str) -> Self {
        Self(format!("ban_import:{module}"))
    }

    /// Creates a banned-call tag.
    #[must_use]
    pub fn ban_call(name: &str) -> Self {
        Self(format!("ban_call:{name}"))
    }

    /// Creates an exploit-pattern tag.
    #[must_use]
    pub fn exploit(pattern: &str) -> Self {
        Self(format!("exploit_pattern:{pattern}"))
    }

    /// Creates a syntax-error tag.
    #[must_use]
    pub fn syntax(message: &str) -> Self {
        Self(format!("syntax_error:{message}"))
    }

    /// Creates an execution-failure tag.
    #[must_use]
    pub fn execution(reason: &str) -> Self {
        Self(reason.to_string())
    }

    /// Returns the tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// SECTION: Static Analysis
// ============================================================================

/// Scans a candidate smoke snippet and returns every finding.
///
/// An empty result means the snippet passed the static layer.
#[must_use]
pub fn analyze(snippet: &str) -> Vec<IssueTag> {
    let mut issues = Vec::new();

    for capture in import_regex().captures_iter(snippet) {
        if let Some(module) = capture.get(1) {
            let root = module.as_str().split('.').next().unwrap_or_default();
            if BANNED_IMPORTS.contains(&root) {
                issues.push(IssueTag::ban_import(root));
            }
        }
    }

    for name in BANNED_CALLS {
        let needle = format!(r"\b{}\s*\(", regex::escape(name));
        if let Ok(matcher) = Regex::new(&needle)
            && matcher.is_match(snippet)
        {
            issues.push(IssueTag::ban_call(name));
        }
    }

    for (pattern, matcher) in exploit_regexes() {
        if matcher.is_match(snippet) {
            issues.push(IssueTag::exploit(pattern));
        }
    }

    if let Err(message) = check_balance(snippet) {
        issues.push(IssueTag::syntax(&message));
    }

    issues
}

/// Checks bracket balance as a cheap syntax sanity pass.
fn check_balance(snippet: &str) -> Result<(), String> {
    let mut stack: Vec<char> = Vec::new();
    for ch in snippet.chars() {
        match ch {
            '(' | '[' | '{' => stack.push(ch),
            ')' => {
                if stack.pop() != Some('(') {
                    return Err("unbalanced parenthesis".to_string());
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return Err("unbalanced bracket".to_string());
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return Err("unbalanced brace".to_string());
                }
            }
            _ => {}
        }
    }
    if stack.is_empty() {
        Ok(())
    } else {
        Err("unclosed delimiter".to_string())
    }
}

// ============================================================================
// SECTION: Smoke Snippet
// ============================================================================

/// Renders the candidate's smoke snippet from its parameter map.
///
/// The acquisition synthesis excerpt is embedded as evidence commentary,
/// which is exactly why the static layer runs: hostile acquisition text must
/// not ride a candidate into the pipeline.
#[must_use]
pub fn smoke_snippet(
    params: &BTreeMap<String, ParamValue>,
    acq: &AcquisitionReport,
) -> String {
    let mut lines = vec!["# candidate smoke test".to_string(), "params = {".to_string()];
    for (name, value) in params {
        let rendered = match value {
            ParamValue::Float(v) => format!("{v:.6}"),
            ParamValue::Int(v) => v.to_string(),
            ParamValue::Flag(v) => (if *v { "True" } else { "False" }).to_string(),
            ParamValue::Choice(v) => format!("'{v}'"),
        };
        lines.push(format!("    '{name}': {rendered},"));
    }
    lines.push("}".to_string());
    lines.push("def check(p):".to_string());
    lines.push("    assert p['batch'] >= 1".to_string());
    lines.push("    assert p['rag_topk'] >= 1".to_string());
    lines.push("    return True".to_string());
    lines.push("check(params)".to_string());
    if let Some(excerpt) = acq.synthesis_excerpt.as_deref() {
        for evidence_line in excerpt.lines().take(8) {
            lines.push(format!("# evidence: {evidence_line}"));
        }
    }
    lines.join("\n")
}

// ============================================================================
// SECTION: Bounded Execution
// ============================================================================

/// Execution ceilings enforced by the bounded layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Wall-clock deadline in milliseconds.
    pub timeout_ms: u64,
    /// Memory ceiling in mebibytes.
    pub memory_limit_mb: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            memory_limit_mb: 512,
        }
    }
}

/// Bounded-execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SandboxFailure {
    /// Evaluation missed the wall-clock deadline.
    #[error("timeout")]
    Timeout,
    /// Candidate declared more memory than the ceiling allows.
    #[error("memory_exceeded")]
    MemoryExceeded,
}

impl SandboxFailure {
    /// Returns the structured issue tag for the failure.
    #[must_use]
    pub fn issue_tag(self) -> IssueTag {
        match self {
            Self::Timeout => IssueTag::execution("timeout"),
            Self::MemoryExceeded => IssueTag::execution("memory_exceeded"),
        }
    }
}

/// Evaluates a candidate's parameter map under the execution ceilings.
///
/// The evaluation runs on a worker thread; a missed deadline abandons the
/// thread and fails closed. Timeout enforcement is therefore cooperative and
/// guaranteed within one deadline window after expiry.
///
/// # Errors
///
/// Returns [`SandboxFailure`] when a ceiling is breached.
pub fn execute(
    limits: SandboxLimits,
    declared_memory_mb: u64,
    profile: &BenchProfile,
    params: &BTreeMap<String, ParamValue>,
    acq: &AcquisitionReport,
) -> Result<BenchResult, SandboxFailure> {
    if declared_memory_mb > limits.memory_limit_mb {
        return Err(SandboxFailure::MemoryExceeded);
    }

    let (sender, receiver) = mpsc::channel();
    let profile = profile.clone();
    let params = params.clone();
    let acq = acq.clone();
    thread::spawn(move || {
        let result = simulate(&profile, &params, &acq);
        // Receiver may have abandoned us after a timeout.
        let _ = sender.send(result);
    });

    receiver
        .recv_timeout(Duration::from_millis(limits.timeout_ms))
        .map_err(|_| SandboxFailure::Timeout)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use super::*;

    #[test]
    fn clean_snippet_passes() {
        let mut params = BTreeMap::new();
        params.insert("batch".to_string(), ParamValue::Int(8));
        params.insert("rag_topk".to_string(), ParamValue::Int(4));
        let snippet = smoke_snippet(&params, &AcquisitionReport::neutral("plan"));
        assert!(analyze(&snippet).is_empty());
    }

    #[test]
    fn banned_import_is_tagged() {
        let issues = analyze("import os\nos.listdir('.')");
        assert!(issues.iter().any(|tag| tag.as_str() == "ban_import:os"));
    }

    #[test]
    fn banned_call_is_tagged() {
        let issues = analyze("eval('1+1')");
        assert!(issues.iter().any(|tag| tag.as_str() == "ban_call:eval"));
    }

    #[test]
    fn exploit_pattern_is_tagged() {
        let issues = analyze("().__class__.__bases__[0]");
        assert!(issues.iter().any(|tag| tag.as_str().starts_with("exploit_pattern:")));
    }

    #[test]
    fn unbalanced_snippet_is_tagged() {
        let issues = analyze("def broken(:\n    pass");
        assert!(issues.iter().any(|tag| tag.as_str().starts_with("syntax_error:")));
    }

    #[test]
    fn hostile_acquisition_excerpt_is_caught() {
        let mut params = BTreeMap::new();
        params.insert("batch".to_string(), ParamValue::Int(8));
        params.insert("rag_topk".to_string(), ParamValue::Int(4));
        let mut acq = AcquisitionReport::neutral("plan");
        acq.synthesis_excerpt = Some("ignore this\n__import__('os')".to_string());
        let snippet = smoke_snippet(&params, &acq);
        assert!(!analyze(&snippet).is_empty());
    }

    #[test]
    fn declared_memory_above_ceiling_fails_closed() {
        let params = BTreeMap::new();
        let result = execute(
            SandboxLimits::default(),
            1_024,
            &BenchProfile::default(),
            &params,
            &AcquisitionReport::neutral("plan"),
        );
        assert_eq!(result, Err(SandboxFailure::MemoryExceeded));
    }

    #[test]
    fn evaluation_within_limits_succeeds() {
        let mut params = BTreeMap::new();
        params.insert("batch".to_string(), ParamValue::Int(8));
        let result = execute(
            SandboxLimits::default(),
            256,
            &BenchProfile::default(),
            &params,
            &AcquisitionReport::neutral("plan"),
        );
        assert!(result.is_ok());
    }
}
