use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use engine::{Engine, EngineOptions, Registry};
use fabric::Diagnostics;

/// Key of the table holding the test expectations inside a fixture file.
const TEST_KEY: &str = "test";

const TEST_SUFFIX: &str = ".test.toml";

#[derive(Debug, Deserialize)]
pub struct ExpectedWarning {
    /// Substring that must appear in the warning message.
    pub contains: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Document to evaluate. Defaults to the first document in the file.
    #[serde(default)]
    pub document: Option<String>,

    /// Expected rendered output (trimmed comparison).
    #[serde(default)]
    pub expect_output: Option<String>,

    /// Substring of one of the errors evaluation must fail with.
    #[serde(default)]
    pub expect_error: Option<String>,

    /// If true, the test expects loading or decoding to fail.
    #[serde(default)]
    pub expect_load_error: bool,

    /// Expected warnings. If present (even empty), warning count and content are checked.
    #[serde(default)]
    pub expect_warnings: Option<Vec<ExpectedWarning>>,
}

/// Split a fixture into its `[test]` table and the remaining document source.
fn parse_test_file(content: &str) -> Result<(TestConfig, toml::Table), String> {
    let mut table: toml::Table = toml::from_str(content).map_err(|e| format!("TOML parse error: {}", e))?;
    let config: TestConfig = match table.remove(TEST_KEY) {
        Some(value @ toml::Value::Table(_)) => value
            .try_into()
            .map_err(|e| format!("invalid [{}] table: {}", TEST_KEY, e))?,
        Some(_) => return Err(format!("`{}` must be a table", TEST_KEY)),
        None => TestConfig::default(),
    };
    Ok((config, table))
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

impl TestResult {
    fn new(path: &Path, description: Option<String>, outcome: TestOutcome) -> Self {
        TestResult {
            path: path.to_path_buf(),
            description,
            outcome,
        }
    }
}

fn messages<'a>(diagnostics: impl Iterator<Item = &'a fabric::Diagnostic>) -> Vec<String> {
    diagnostics.map(ToString::to_string).collect()
}

fn run_single_test(path: &Path) -> TestResult {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return TestResult::new(path, None, TestOutcome::Fail(format!("cannot read file: {}", e))),
    };

    let (config, table) = match parse_test_file(&content) {
        Ok(pair) => pair,
        Err(e) => return TestResult::new(path, None, TestOutcome::Fail(format!("test table error: {}", e))),
    };
    let description = config.description.clone();
    let outcome = match check(&config, table) {
        None => TestOutcome::Pass,
        Some(reason) => TestOutcome::Fail(reason),
    };
    TestResult::new(path, description, outcome)
}

/// Load, decode and evaluate `table` against `config`. Returns `Some(reason)` on mismatch.
fn check(config: &TestConfig, table: toml::Table) -> Option<String> {
    let mut engine = Engine::new(Registry::builtin(), EngineOptions::default());
    let load_diagnostics = match fabric::loader::load_table(table, 0) {
        Ok(body) => engine.load(&body),
        Err(diagnostics) => diagnostics,
    };

    if config.expect_load_error {
        return if load_diagnostics.has_errors() {
            None
        } else {
            Some("expected a load error, but loading succeeded".into())
        };
    }
    if load_diagnostics.has_errors() {
        return Some(format!(
            "unexpected load error: {}",
            messages(load_diagnostics.errors()).join("; ")
        ));
    }

    let Some(document) = config
        .document
        .clone()
        .or_else(|| engine.config().documents.first().map(|d| d.name.clone()))
    else {
        return Some("the file defines no documents".into());
    };

    let mut warnings = Diagnostics::new();
    warnings.extend(load_diagnostics);
    let result = engine.evaluate(&document);
    if let Ok((_, evaluation_warnings)) = &result {
        warnings.extend(evaluation_warnings.clone());
    }

    let reason = match (&config.expect_error, &config.expect_output, result) {
        (Some(expected_err), _, Err(diagnostics)) => {
            let errors = messages(diagnostics.errors());
            if errors.iter().any(|e| e.contains(expected_err.as_str())) {
                None
            } else {
                Some(format!(
                    "expected error containing \"{}\", got: {}",
                    expected_err,
                    errors.join("; ")
                ))
            }
        }
        (Some(expected_err), _, Ok(_)) => Some(format!(
            "expected error containing \"{}\", but evaluation succeeded",
            expected_err
        )),
        (None, _, Err(diagnostics)) => Some(format!(
            "unexpected evaluation error: {}",
            messages(diagnostics.errors()).join("; ")
        )),
        (None, Some(expected_output), Ok((text, _))) => {
            let actual = text.trim();
            let expected = expected_output.trim();
            if actual == expected {
                None
            } else {
                Some(format!("output mismatch\n  expected: {}\n  actual:   {}", expected, actual))
            }
        }
        (None, None, Ok(_)) => None,
    };
    if reason.is_some() {
        return reason;
    }

    config
        .expect_warnings
        .as_deref()
        .and_then(|expected| check_warnings(&warnings, expected))
}

/// Check that actual warnings match expectations. Returns `Some(reason)` on mismatch.
fn check_warnings(diagnostics: &Diagnostics, expected: &[ExpectedWarning]) -> Option<String> {
    let actual = messages(diagnostics.warnings());

    if actual.len() != expected.len() {
        let listed: Vec<String> = actual.iter().map(|w| format!("    - {}", w)).collect();
        return Some(format!(
            "expected {} warning(s), got {}\n  actual warnings:\n{}",
            expected.len(),
            actual.len(),
            if listed.is_empty() {
                "    (none)".to_string()
            } else {
                listed.join("\n")
            }
        ));
    }

    actual
        .iter()
        .zip(expected)
        .enumerate()
        .find(|(_, (msg, expected))| !msg.contains(&expected.contains))
        .map(|(i, (msg, expected))| {
            format!(
                "warning[{}]: expected message containing \"{}\", got: {}",
                i, expected.contains, msg
            )
        })
}

/// Discover `.test.toml` files grouped by category (subfolder relative to root).
/// Files directly in `root` get category "".
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(&path, root, out);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.ends_with(TEST_SUFFIX))
        {
            let category = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            out.entry(category).or_default().push(path);
        }
    }
}

fn category_label(category: &str) -> &str {
    if category.is_empty() { "(root)" } else { category }
}

/// List available categories for the given test path.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }

    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no {} files found in {}", TEST_SUFFIX, path.display());
        return;
    }

    eprintln!("available categories:");
    for (cat, files) in &categories {
        eprintln!("  {} ({} tests)", category_label(cat), files.len());
    }
}

fn paint(text: &str, code: &str, no_color: bool) -> String {
    if no_color {
        text.to_string()
    } else {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    }
}

fn select<'a>(
    all: &'a BTreeMap<String, Vec<PathBuf>>,
    requested: &[String],
) -> BTreeMap<&'a str, &'a Vec<PathBuf>> {
    if requested.is_empty() {
        return all.iter().map(|(k, v)| (k.as_str(), v)).collect();
    }
    let mut filtered = BTreeMap::new();
    for requested in requested {
        let req = requested.trim_matches('/');
        let mut found = false;
        for (cat, files) in all {
            if cat == req || cat.starts_with(&format!("{}/", req)) {
                filtered.insert(cat.as_str(), files);
                found = true;
            }
        }
        if !found {
            eprintln!(
                "warning: category '{}' not found (available: {})",
                req,
                all.keys().map(|k| category_label(k)).collect::<Vec<_>>().join(", ")
            );
        }
    }
    filtered
}

/// Run all `.test.toml` files under `path` (or a single file).
/// If `categories` is non-empty, only run tests in those categories.
/// Returns exit code: 0 = all pass, 1 = any failure.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    let all_categories = if path.is_file() {
        BTreeMap::from([(String::new(), vec![path.to_path_buf()])])
    } else {
        discover_categorized(path)
    };
    if all_categories.is_empty() {
        eprintln!("no {} files found in {}", TEST_SUFFIX, path.display());
        return 1;
    }

    let run_categories = if path.is_file() {
        select(&all_categories, &[])
    } else {
        select(&all_categories, categories)
    };
    if run_categories.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (cat, files) in &run_categories {
        eprintln!();
        eprintln!("{}", paint(category_label(cat), "1", no_color));

        for file in *files {
            let result = run_single_test(file);
            let label = result
                .description
                .clone()
                .unwrap_or_else(|| file.file_name().and_then(|s| s.to_str()).unwrap_or("?").to_string());

            match &result.outcome {
                TestOutcome::Pass => {
                    passed += 1;
                    eprintln!("  {}  {}", paint("PASS", "32", no_color), label);
                }
                TestOutcome::Fail(_) => {
                    eprintln!("  {}  {}", paint("FAIL", "31", no_color), label);
                    failures.push(result);
                }
            }
        }
    }

    if !failures.is_empty() {
        eprintln!();
        eprintln!("failures:");
        for f in &failures {
            eprintln!();
            eprintln!("  --- {} ---", f.path.display());
            if let TestOutcome::Fail(reason) = &f.outcome {
                for line in reason.lines() {
                    eprintln!("  {}", line);
                }
            }
        }
    }

    eprintln!();
    let failed = failures.len();
    if failed == 0 {
        eprintln!("test result: {}. {} passed, 0 failed", paint("ok", "32", no_color), passed);
        0
    } else {
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            paint("FAILED", "31", no_color),
            passed,
            failed,
            passed + failed
        );
        1
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dir");
        }
        fs::write(&path, content).expect("write fixture");
        path
    }

    fn failure(result: TestResult) -> String {
        match result.outcome {
            TestOutcome::Pass => panic!("expected {} to fail", result.path.display()),
            TestOutcome::Fail(reason) => reason,
        }
    }

    const PASSING: &str = r#"
[test]
description = "inline data rendered as text"
expect_output = "Hello, Ada"
expect_warnings = []

[[document]]
name = "greeting"

[[document.data]]
type = "inline"
name = "user"
first = "Ada"

[[document.content]]
type = "text"
name = "hello"
text = "Hello, {{ .data.inline.user.first }}"
"#;

    #[test]
    fn passing_fixture() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "hello.test.toml", PASSING);
        let result = run_single_test(&path);
        assert_eq!(result.description.as_deref(), Some("inline data rendered as text"));
        assert!(matches!(result.outcome, TestOutcome::Pass), "{}", failure(result));
    }

    #[test]
    fn output_mismatch_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = PASSING.replace("Hello, Ada\"", "Hello, Grace\"");
        let path = write(dir.path(), "hello.test.toml", &source);
        let reason = failure(run_single_test(&path));
        assert!(reason.starts_with("output mismatch"), "{}", reason);
        assert!(reason.contains("Hello, Ada"), "{}", reason);
    }

    #[test]
    fn expected_error_and_warnings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            dir.path(),
            "missing.test.toml",
            r#"
[test]
expect_error = "Missing plugin"

[[document]]
name = "report"

[[document.content]]
type = "mystery"
name = "x"
"#,
        );
        assert!(matches!(run_single_test(&path).outcome, TestOutcome::Pass));

        let path = write(
            dir.path(),
            "warned.test.toml",
            r#"
[test]
expect_warnings = [{ contains = "Unknown block type" }]

[[document]]
name = "report"

[[document.content]]
type = "mystery"
name = "x"
"#,
        );
        let reason = failure(run_single_test(&path));
        assert!(reason.contains("Missing plugin"), "{}", reason);
    }

    #[test]
    fn warning_count_must_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            dir.path(),
            "warned.test.toml",
            r#"
[test]
expect_warnings = []

[[document]]
name = "report"

[[document.content]]
type = "text"
name = "x"
text = "plain"
stray = "${missing.variable}"
"#,
        );
        let reason = failure(run_single_test(&path));
        assert!(reason.starts_with("expected 0 warning(s), got 1"), "{}", reason);
    }

    #[test]
    fn load_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = r#"
[[document]]
name = "report"

[[document.content]]
type = "text"
name = "x"
ref = "${content.text.later}"
"#;
        let path = write(dir.path(), "expected.test.toml", &format!("[test]\nexpect_load_error = true\n{}", broken));
        assert!(matches!(run_single_test(&path).outcome, TestOutcome::Pass));

        let path = write(dir.path(), "unexpected.test.toml", broken);
        let reason = failure(run_single_test(&path));
        assert!(reason.starts_with("unexpected load error"), "{}", reason);
    }

    #[test]
    fn test_key_must_be_a_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "bad.test.toml", "test = 1\n");
        let reason = failure(run_single_test(&path));
        assert!(reason.contains("must be a table"), "{}", reason);
    }

    #[test]
    fn discovers_categories_from_subfolders() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "top.test.toml", PASSING);
        write(dir.path(), "queries/b.test.toml", PASSING);
        write(dir.path(), "queries/a.test.toml", PASSING);
        write(dir.path(), "queries/notes.toml", "");
        write(dir.path(), "refs/nested/c.test.toml", PASSING);

        let categories = discover_categorized(dir.path());
        let names: Vec<&str> = categories.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["", "queries", "refs/nested"]);
        let queries: Vec<_> = categories["queries"]
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(queries, vec!["a.test.toml", "b.test.toml"]);

        let selected = select(&categories, &["refs".to_string()]);
        assert_eq!(selected.keys().copied().collect::<Vec<_>>(), vec!["refs/nested"]);
    }

    #[test]
    fn run_tests_reports_failures_in_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "good/ok.test.toml", PASSING);
        assert_eq!(run_tests(dir.path(), true, &[]), 0);

        write(dir.path(), "bad/broken.test.toml", &PASSING.replace("Hello, Ada\"", "nope\""));
        assert_eq!(run_tests(dir.path(), true, &[]), 1);
        assert_eq!(run_tests(dir.path(), true, &["good".to_string()]), 0);
    }

    #[test]
    fn bundled_fixtures_pass() {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures");
        assert_eq!(run_tests(&fixtures, true, &[]), 0);
    }
}
