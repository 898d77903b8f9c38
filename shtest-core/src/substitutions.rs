//! Expansion of `%`-tokens in test commands.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::test::TestCase;

const PERCENT_MARKER: &str = "#_MARKER_#";

static DEBUG_MARKER_REGEX: LazyLock<Result<regex::Regex, regex::Error>> =
    LazyLock::new(|| regex::Regex::new(r#"%dbg\(([^)'"]*)\)"#));

/// Returns the temporary directory and the temporary path base of a test. Both live under an
/// `Output` directory next to the test's output path.
pub fn temp_paths(test: &TestCase) -> (PathBuf, PathBuf) {
    let exec_path = test.exec_path();
    let exec_dir = exec_path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_dir = exec_dir.join("Output");

    let tmp_base = match exec_path.file_name() {
        Some(name) => tmp_dir.join(name),
        None => tmp_dir.join("test"),
    };

    (tmp_dir, tmp_base)
}

/// Builds the substitution table for a test: the configuration's substitutions, followed by
/// the standard path tokens and their slash- and colon-normalized variants.
///
/// # Arguments
///
/// * `test` - The test whose paths are substituted.
/// * `tmp_dir` - The test's temporary directory.
/// * `tmp_base` - The test's temporary path base.
/// * `interpreter` - Value of the `%{interpreter}` token.
/// * `normalize_slashes` - Whether backslashes in paths are turned into forward slashes.
pub fn default_substitutions(
    test: &TestCase,
    tmp_dir: &Path,
    tmp_base: &Path,
    interpreter: &str,
    normalize_slashes: bool,
) -> Vec<(String, String)> {
    let source_path = test.source_path();
    let source_dir = source_path.parent().unwrap_or_else(|| Path::new("."));

    let normalize = |p: &Path| {
        let s = p.to_string_lossy().to_string();
        if normalize_slashes {
            s.replace('\\', "/")
        } else {
            s
        }
    };

    let source_path = normalize(&source_path);
    let source_dir = normalize(source_dir);
    let tmp_dir = normalize(tmp_dir);
    let tmp_base = normalize(tmp_base);
    let tmp_name = format!("{tmp_base}.tmp");
    let base_name = Path::new(&tmp_base)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut substitutions = vec![(String::from("%%"), String::from(PERCENT_MARKER))];
    substitutions.extend(test.config.substitutions.iter().cloned());

    let path_separator = if cfg!(windows) { ";" } else { ":" };

    let forward = |s: &str| s.replace('\\', "/");

    let standard = [
        ("%s", source_path.clone()),
        ("%S", source_dir.clone()),
        ("%p", source_dir.clone()),
        ("%{pathsep}", path_separator.to_owned()),
        ("%t", tmp_name.clone()),
        ("%basename_t", base_name),
        ("%T", tmp_dir.clone()),
        ("%{interpreter}", interpreter.to_owned()),
        ("%/s", forward(&source_path)),
        ("%/S", forward(&source_dir)),
        ("%/p", forward(&source_dir)),
        ("%/t", forward(&tmp_name)),
        ("%/T", forward(&tmp_dir)),
        ("%:s", colon_normalize(&source_path)),
        ("%:S", colon_normalize(&source_dir)),
        ("%:p", colon_normalize(&source_dir)),
        ("%:t", colon_normalize(&tmp_name)),
        ("%:T", colon_normalize(&tmp_dir)),
        (PERCENT_MARKER, String::from("%")),
    ];

    substitutions.extend(
        standard
            .into_iter()
            .map(|(pattern, value)| (pattern.to_owned(), value)),
    );

    substitutions
}

/// Converts a path into a form without colons and without a leading slash, suitable for
/// embedding within another path.
fn colon_normalize(path: &str) -> String {
    if cfg!(windows) {
        let path = path.replace('\\', "/");
        let mut chars = path.chars();
        match (chars.next(), chars.next()) {
            (Some(drive), Some(':')) => format!("{drive}{}", chars.as_str()),
            _ => path,
        }
    } else {
        path.strip_prefix('/').unwrap_or(path).to_owned()
    }
}

/// Applies substitutions, in order, to every line of a script. Patterns are matched
/// literally. Each resulting line is trimmed.
///
/// # Arguments
///
/// * `script` - The lines to expand.
/// * `substitutions` - Ordered `(pattern, value)` pairs.
pub fn apply_substitutions(script: &[String], substitutions: &[(String, String)]) -> Vec<String> {
    script
        .iter()
        .map(|line| {
            let mut line = line.clone();
            for (pattern, value) in substitutions {
                if pattern.is_empty() || !line.contains(pattern.as_str()) {
                    continue;
                }

                let value: Cow<'_, str> = if cfg!(windows) {
                    Cow::Owned(value.replace('\\', "\\\\"))
                } else {
                    Cow::Borrowed(value)
                };

                line = line.replace(pattern.as_str(), &value);
            }
            line.trim().to_owned()
        })
        .collect()
}

/// Replaces `%dbg(...)` markers with a no-op shell command that echoes the marker's text,
/// e.g. `: 'RUN: at line 3'; `.
pub fn expand_debug_markers(line: &str) -> String {
    match DEBUG_MARKER_REGEX.as_ref() {
        Ok(regex) => regex.replace_all(line, ": '$1'; ").to_string(),
        Err(_) => line.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunnerConfig, TestingConfig};
    use crate::test::TestSuite;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn make_test(substitutions: &[(&str, &str)]) -> TestCase {
        let mut config = TestingConfig::root(&RunnerConfig::default());
        config.substitutions = substitutions
            .iter()
            .map(|(p, v)| ((*p).to_owned(), (*v).to_owned()))
            .collect();
        let config = Arc::new(config);

        let suite = Arc::new(TestSuite {
            name: String::from("suite"),
            source_root: PathBuf::from("/src"),
            exec_root: PathBuf::from("/out"),
            config: config.clone(),
        });

        TestCase::new(suite, vec!["dir".into(), "test.txt".into()], config)
    }

    fn expand(test: &TestCase, line: &str) -> String {
        let (tmp_dir, tmp_base) = temp_paths(test);
        let substitutions = default_substitutions(test, &tmp_dir, &tmp_base, "/bin/sh", false);
        apply_substitutions(&[line.to_owned()], &substitutions)
            .pop()
            .unwrap_or_default()
    }

    #[test]
    fn temp_paths_live_under_output() {
        let test = make_test(&[]);
        let (tmp_dir, tmp_base) = temp_paths(&test);
        assert_eq!(tmp_dir, PathBuf::from("/out/dir/Output"));
        assert_eq!(tmp_base, PathBuf::from("/out/dir/Output/test.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn standard_tokens() {
        let test = make_test(&[]);
        assert_eq!(expand(&test, "cat %s"), "cat /src/dir/test.txt");
        assert_eq!(expand(&test, "cd %S && ls %p"), "cd /src/dir && ls /src/dir");
        assert_eq!(
            expand(&test, "echo > %t; ls %T"),
            "echo > /out/dir/Output/test.txt.tmp; ls /out/dir/Output"
        );
        assert_eq!(expand(&test, "%basename_t"), "test.txt");
        assert_eq!(expand(&test, "a%{pathsep}b"), "a:b");
        assert_eq!(expand(&test, "%{interpreter} x"), "/bin/sh x");
        assert_eq!(expand(&test, "%/s"), "/src/dir/test.txt");
        assert_eq!(expand(&test, "/root/%:s"), "/root/src/dir/test.txt");
        assert_eq!(expand(&test, "%:t"), "out/dir/Output/test.txt.tmp");
    }

    #[test]
    fn percent_escape() {
        let test = make_test(&[]);
        assert_eq!(expand(&test, "printf 100%%s"), "printf 100%s");
        assert_eq!(expand(&test, "  padded  "), "padded");
    }

    #[test]
    fn config_substitutions_apply_first_and_literally() {
        let test = make_test(&[("%sort", "sort -u"), ("%{tool}", "tool.*")]);
        assert_eq!(expand(&test, "%sort x | %{tool}"), "sort -u x | tool.*");
    }

    #[test]
    fn debug_markers() {
        assert_eq!(
            expand_debug_markers("%dbg(RUN: at line 3) echo hi"),
            ": 'RUN: at line 3';  echo hi"
        );
        assert_eq!(expand_debug_markers("echo hi"), "echo hi");
    }
}
