//! Static scan of plugin source files.
//!
//! Line-oriented regex rules flag dynamic code execution, child process
//! spawning, network calls to undeclared hosts, and raw filesystem access
//! that bypasses the sandbox API. Any finding fails the scan.

use std::path::{Path, PathBuf};

use {
    regex::Regex,
    serde::Serialize,
    tracing::{debug, warn},
    walkdir::WalkDir,
};

use crate::{Error, Result};

const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;
const MAX_SNIPPET_CHARS: usize = 160;
const SCANNED_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "ts", "mts", "cts", "jsx", "tsx"];
const SKIPPED_DIRS: &[&str] = &[".git"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanRule {
    DynamicCode,
    ChildProcess,
    UndeclaredNetwork,
    RawFilesystem,
    /// A source file that could not be read as text.
    Unscannable,
}

impl ScanRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DynamicCode => "dynamic_code",
            Self::ChildProcess => "child_process",
            Self::UndeclaredNetwork => "undeclared_network",
            Self::RawFilesystem => "raw_filesystem",
            Self::Unscannable => "unscannable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFinding {
    pub rule: ScanRule,
    /// Relative to the scanned directory.
    pub file: PathBuf,
    /// 1-based. Zero for findings about the whole file.
    pub line: usize,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub passed: bool,
    pub findings: Vec<ScanFinding>,
    pub files_scanned: usize,
}

impl ScanReport {
    /// One-line summary for error messages.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .findings
            .iter()
            .take(3)
            .map(|f| format!("{} at {}:{}", f.rule.as_str(), f.file.display(), f.line))
            .collect();
        if self.findings.len() > 3 {
            parts.push(format!("and {} more", self.findings.len() - 3));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone)]
pub struct CodeScanner {
    rules: Vec<(ScanRule, Regex)>,
    network_call: Regex,
    url_host: Regex,
    allowed_hosts: Vec<String>,
    max_file_bytes: u64,
}

impl CodeScanner {
    pub fn new(allowed_hosts: &[String]) -> Result<Self> {
        let compile = |pattern: &str| Regex::new(pattern).map_err(Error::scan);
        let rules = vec![
            (ScanRule::DynamicCode, compile(r"\beval\s*\(")?),
            (ScanRule::DynamicCode, compile(r"\bnew\s+Function\s*\(")?),
            (
                ScanRule::ChildProcess,
                compile(r#"\brequire\s*\(\s*["'](?:node:)?child_process["']"#)?,
            ),
            (
                ScanRule::ChildProcess,
                compile(r#"\bfrom\s+["'](?:node:)?child_process["']"#)?,
            ),
            (
                ScanRule::ChildProcess,
                compile(r#"\bimport\s*\(\s*["'](?:node:)?child_process["']"#)?,
            ),
            (
                ScanRule::RawFilesystem,
                compile(r#"\brequire\s*\(\s*["'](?:node:)?fs(?:/promises)?["']"#)?,
            ),
            (
                ScanRule::RawFilesystem,
                compile(r#"\bfrom\s+["'](?:node:)?fs(?:/promises)?["']"#)?,
            ),
            (ScanRule::RawFilesystem, compile(r"\bDeno\.(?:read|write|open|remove)\w*\s*\(")?),
        ];
        Ok(Self {
            rules,
            network_call: compile(
                r"\b(?:fetch|axios(?:\.\w+)?|https?\.(?:get|request)|WebSocket|XMLHttpRequest)\s*\(",
            )?,
            url_host: compile(r"(?i)\b(?:https?|wss?)://([a-z0-9.-]+)")?,
            allowed_hosts: allowed_hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        })
    }

    #[must_use]
    pub fn with_max_file_bytes(mut self, max: u64) -> Self {
        self.max_file_bytes = max;
        self
    }

    /// Scan `dir` on the blocking pool.
    pub async fn scan(&self, dir: &Path) -> Result<ScanReport> {
        let scanner = self.clone();
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&dir))
            .await
            .map_err(Error::scan)
    }

    pub fn scan_blocking(&self, dir: &Path) -> ScanReport {
        let mut report = ScanReport::default();
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .is_some_and(|n| SKIPPED_DIRS.contains(&n)))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(dir);
                    warn!(path = %path.display(), error = %e, "unreadable entry fails the scan");
                    report.findings.push(unscannable(relative(dir, path), "unreadable entry"));
                    continue;
                },
            };
            if !entry.file_type().is_file() || !is_scanned(entry.path()) {
                continue;
            }
            let rel = relative(dir, entry.path());
            match entry.metadata().map(|m| m.len()) {
                Ok(len) if len > self.max_file_bytes => {
                    warn!(file = %entry.path().display(), len, "oversized file fails the scan");
                    report.findings.push(unscannable(
                        rel,
                        &format!("{len} bytes exceeds the {} byte limit", self.max_file_bytes),
                    ));
                    continue;
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(file = %entry.path().display(), error = %e, "unreadable file fails the scan");
                    report.findings.push(unscannable(rel, "unreadable file"));
                    continue;
                },
            }
            let text = match std::fs::read_to_string(entry.path()) {
                Ok(text) => text,
                Err(e) => {
                    debug!(file = %entry.path().display(), error = %e, "file is not readable text");
                    report.findings.push(unscannable(rel, "not valid UTF-8 text"));
                    continue;
                },
            };
            report.files_scanned += 1;
            self.scan_text(&rel, &text, &mut report.findings);
        }

        report.passed = report.findings.is_empty();
        report
    }

    fn scan_text(&self, file: &Path, text: &str, out: &mut Vec<ScanFinding>) {
        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") || trimmed.starts_with('*') {
                continue;
            }
            let mut push = |rule| {
                out.push(ScanFinding {
                    rule,
                    file: file.to_path_buf(),
                    line: idx + 1,
                    snippet: snippet(line),
                });
            };
            for (rule, re) in &self.rules {
                if re.is_match(line) {
                    push(*rule);
                }
            }
            if self.network_call.is_match(line) && self.has_undeclared_host(line) {
                push(ScanRule::UndeclaredNetwork);
            }
        }
    }

    fn has_undeclared_host(&self, line: &str) -> bool {
        self.url_host.captures_iter(line).any(|caps| {
            let host = caps
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            !self.host_allowed(&host)
        })
    }

    fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.iter().any(|allowed| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

fn is_scanned(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SCANNED_EXTENSIONS.contains(&ext))
}

fn relative(dir: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(dir).unwrap_or(path).to_path_buf()
}

fn unscannable(file: PathBuf, reason: &str) -> ScanFinding {
    ScanFinding {
        rule: ScanRule::Unscannable,
        file,
        line: 0,
        snippet: reason.to_string(),
    }
}

fn snippet(line: &str) -> String {
    let line = line.trim();
    if line.chars().count() <= MAX_SNIPPET_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX_SNIPPET_CHARS).collect();
    format!("{cut}…")
}

/// Scan a plugin directory with the default size limit.
pub async fn scan_plugin_dir(dir: &Path, allowed_hosts: &[String]) -> Result<ScanReport> {
    CodeScanner::new(allowed_hosts)?.scan(dir).await
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn scan_line(line: &str, hosts: &[&str]) -> Vec<ScanRule> {
        let hosts: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        let scanner = CodeScanner::new(&hosts).unwrap();
        let mut out = Vec::new();
        scanner.scan_text(Path::new("index.js"), line, &mut out);
        out.into_iter().map(|f| f.rule).collect()
    }

    #[rstest]
    #[case("const r = eval(code);", ScanRule::DynamicCode)]
    #[case("const f = new Function('a', body);", ScanRule::DynamicCode)]
    #[case("const cp = require('child_process');", ScanRule::ChildProcess)]
    #[case("import { spawn } from \"node:child_process\";", ScanRule::ChildProcess)]
    #[case("const fs = require(\"fs\");", ScanRule::RawFilesystem)]
    #[case("import { readFile } from 'fs/promises';", ScanRule::RawFilesystem)]
    #[case("await fetch('https://evil.test/x')", ScanRule::UndeclaredNetwork)]
    fn flags_dangerous_lines(#[case] line: &str, #[case] rule: ScanRule) {
        assert_eq!(scan_line(line, &[]), vec![rule]);
    }

    #[rstest]
    #[case("const evaluate = (x) => x;")]
    #[case("// eval(code) is not allowed")]
    #[case("await fetch('https://api.weather.gov/points')")]
    #[case("await fetch('https://eu.api.weather.gov/points')")]
    #[case("const url = 'https://docs.example.com';")]
    #[case("import { tool } from 'warren';")]
    fn clean_lines_pass(#[case] line: &str) {
        assert!(scan_line(line, &["api.weather.gov"]).is_empty(), "{line}");
    }

    #[test]
    fn suffix_match_requires_dot_boundary() {
        assert_eq!(
            scan_line("fetch('https://evilapi.weather.gov/')", &["api.weather.gov"]),
            vec![ScanRule::UndeclaredNetwork]
        );
    }

    #[tokio::test]
    async fn scans_directory_with_file_and_line() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("lib")).unwrap();
        std::fs::write(
            tmp.path().join("lib/run.js"),
            "const x = 1;\nconst cp = require('child_process');\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("README.md"), "eval(x)").unwrap();

        let report = scan_plugin_dir(tmp.path(), &[]).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.findings.len(), 1);
        let f = &report.findings[0];
        assert_eq!(f.rule, ScanRule::ChildProcess);
        assert_eq!(f.file, PathBuf::from("lib/run.js"));
        assert_eq!(f.line, 2);
        assert!(report.summary().contains("lib/run.js:2"));
    }

    #[tokio::test]
    async fn clean_directory_passes() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("index.ts"), "export const ok = 1;\n").unwrap();
        let report = scan_plugin_dir(tmp.path(), &[]).await.unwrap();
        assert!(report.passed);
    }

    #[tokio::test]
    async fn oversized_files_fail_the_scan() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("big.js"), "eval(x);\n".repeat(100)).unwrap();
        let scanner = CodeScanner::new(&[]).unwrap().with_max_file_bytes(10);
        let report = scanner.scan(tmp.path()).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.files_scanned, 0);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].rule, ScanRule::Unscannable);
        assert_eq!(report.findings[0].file, PathBuf::from("big.js"));
    }

    #[tokio::test]
    async fn non_utf8_sources_fail_the_scan() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("index.js"), [0xff, 0xfe, b'e', b'v', 0xc3]).unwrap();
        std::fs::write(tmp.path().join("logo.png"), [0xff, 0xd8, 0xff]).unwrap();
        let report = scan_plugin_dir(tmp.path(), &[]).await.unwrap();
        assert!(!report.passed);
        let rules: Vec<_> = report.findings.iter().map(|f| (f.rule, f.file.clone())).collect();
        assert_eq!(rules, vec![(ScanRule::Unscannable, PathBuf::from("index.js"))]);
    }

    #[tokio::test]
    async fn node_modules_is_scanned() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("index.js"), "export const ok = 1;\n").unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules/dep")).unwrap();
        std::fs::write(tmp.path().join("node_modules/dep/evil.js"), "eval(payload)\n").unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/hook.js"), "eval(x)\n").unwrap();

        let report = scan_plugin_dir(tmp.path(), &[]).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].rule, ScanRule::DynamicCode);
        assert_eq!(
            report.findings[0].file,
            PathBuf::from("node_modules/dep/evil.js")
        );
    }
}
