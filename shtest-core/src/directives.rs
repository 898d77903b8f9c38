//! Scanning of the directives embedded in test files (`RUN:`, `XFAIL:`, `REQUIRES:`, ...).
//!
//! A single regex alternation over the registered keywords is matched against the raw file
//! contents; each match's value is everything after the keyword up to the end of the line.
//! Each keyword has a [`KeywordKind`] that determines how its values are accumulated.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use indexmap::IndexMap;
use itertools::Itertools;
use shtest_parser::boolexpr::BooleanExpression;

use crate::results::{ResultCode, TestResult};
use crate::test::TestCase;
use crate::{error, trace_categories};

/// Keyword introducing a shell command.
pub const RUN: &str = "RUN:";
/// Keyword introducing expressions under which the test is expected to fail.
pub const XFAIL: &str = "XFAIL:";
/// Keyword introducing expressions that must all hold for the test to run.
pub const REQUIRES: &str = "REQUIRES:";
/// Keyword introducing expressions at least one of which must hold for the test to run.
pub const REQUIRES_ANY: &str = "REQUIRES-ANY:";
/// Keyword introducing expressions any of which makes the test unsupported.
pub const UNSUPPORTED: &str = "UNSUPPORTED:";
/// Keyword introducing the number of times a failing test is retried.
pub const ALLOW_RETRIES: &str = "ALLOW_RETRIES:";
/// Keyword ending the scan of a test file.
pub const END: &str = "END.";

/// Handler for a custom keyword: receives the line number, the value following the keyword,
/// and the accumulated values of the keyword's slot.
pub type CustomHandler =
    fn(line_number: usize, line: &str, output: &mut Vec<String>) -> Result<(), String>;

/// How the values of a keyword are parsed and accumulated.
#[derive(Clone, Copy, Debug)]
pub enum KeywordKind {
    /// Takes no value; becomes set once the keyword appears with nothing after it.
    Tag,
    /// Accumulates shell commands; a trailing `\` continues onto the next matching line.
    Command,
    /// Accumulates comma-separated, trimmed items.
    List,
    /// Accumulates comma-separated boolean expressions, each checked for syntax eagerly.
    BooleanExpr,
    /// Accumulates one integer per occurrence.
    Integer,
    /// Accumulates values through a custom handler.
    Custom(CustomHandler),
}

/// A registered keyword.
#[derive(Clone, Debug)]
pub struct KeywordDefinition {
    /// The keyword literal, e.g. `RUN:`.
    pub keyword: String,
    /// How its values are parsed.
    pub kind: KeywordKind,
    /// The keyword whose values this keyword's values are accumulated with.
    pub slot: String,
}

/// The directives parsed from a test that can be run.
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// The logical commands to run, in order, each prefixed with a `%dbg(...)` marker.
    pub commands: Vec<String>,
    /// Number of retries requested by the test itself.
    pub allowed_retries: Option<u32>,
    /// Values accumulated for keywords other than the standard ones.
    pub values: HashMap<String, Vec<String>>,
}

/// The outcome of parsing a test's directives.
#[derive(Clone, Debug)]
pub enum ParsedScript {
    /// The test can be run.
    Runnable(Script),
    /// The test's outcome was decided while parsing.
    Finished(TestResult),
}

#[derive(Default)]
struct ScanState {
    values: HashMap<String, Vec<String>>,
    tags: HashSet<String>,
    integers: HashMap<String, Vec<i64>>,
}

static LINE_NUMBER_REGEX: LazyLock<Result<regex::Regex, regex::Error>> =
    LazyLock::new(|| regex::Regex::new(r"%\(line *([+-]) *(\d+)\)"));

/// An explicitly constructed registry of directive keywords.
#[derive(Clone, Debug, Default)]
pub struct KeywordRegistry {
    definitions: IndexMap<String, KeywordDefinition>,
    regex: Option<regex::bytes::Regex>,
}

impl KeywordRegistry {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a registry holding the standard keywords.
    pub fn standard() -> Self {
        let mut registry = Self::new();

        let standard = [
            (RUN, KeywordKind::Command, RUN),
            (XFAIL, KeywordKind::BooleanExpr, XFAIL),
            (REQUIRES, KeywordKind::BooleanExpr, REQUIRES),
            (REQUIRES_ANY, KeywordKind::Custom(handle_requires_any), REQUIRES),
            (UNSUPPORTED, KeywordKind::BooleanExpr, UNSUPPORTED),
            (ALLOW_RETRIES, KeywordKind::Integer, ALLOW_RETRIES),
            (END, KeywordKind::Tag, END),
        ];

        for (keyword, kind, slot) in standard {
            registry.insert(keyword, kind, slot);
        }
        registry.rebuild_regex();

        registry
    }

    /// Registers a keyword whose values accumulate under its own name.
    ///
    /// # Arguments
    ///
    /// * `keyword` - The keyword literal; tags must end in `.`, all others in `:`.
    /// * `kind` - How the keyword's values are parsed.
    pub fn register(&mut self, keyword: &str, kind: KeywordKind) -> Result<(), error::Error> {
        self.register_into(keyword, kind, keyword)
    }

    /// Registers a keyword whose values accumulate with those of another keyword.
    ///
    /// # Arguments
    ///
    /// * `keyword` - The keyword literal; tags must end in `.`, all others in `:`.
    /// * `kind` - How the keyword's values are parsed.
    /// * `slot` - The keyword whose values are shared.
    pub fn register_into(
        &mut self,
        keyword: &str,
        kind: KeywordKind,
        slot: &str,
    ) -> Result<(), error::Error> {
        match kind {
            KeywordKind::Tag if !keyword.ends_with('.') => {
                return Err(error::Error::InvalidDirective(format!(
                    "Keyword '{keyword}' should end in '.'"
                )));
            }
            KeywordKind::Tag => (),
            _ if !keyword.ends_with(':') => {
                return Err(error::Error::InvalidDirective(format!(
                    "Keyword '{keyword}' should end in ':'"
                )));
            }
            _ => (),
        }

        if self.definitions.contains_key(keyword) {
            return Err(error::Error::InvalidDirective(format!(
                "Parser for keyword '{keyword}' already exists"
            )));
        }

        self.insert(keyword, kind, slot);
        self.rebuild_regex();
        Ok(())
    }

    /// Returns the registered keywords, in registration order.
    pub fn keywords(&self) -> impl Iterator<Item = &KeywordDefinition> {
        self.definitions.values()
    }

    fn insert(&mut self, keyword: &str, kind: KeywordKind, slot: &str) {
        self.definitions.insert(
            keyword.to_owned(),
            KeywordDefinition {
                keyword: keyword.to_owned(),
                kind,
                slot: slot.to_owned(),
            },
        );
    }

    fn rebuild_regex(&mut self) {
        if self.definitions.is_empty() {
            self.regex = None;
            return;
        }

        let alternation = self.definitions.keys().map(|k| regex::escape(k)).join("|");
        self.regex = regex::bytes::Regex::new(&format!("(?-u)({alternation})(.*)\n")).ok();
    }

    /// Scans file contents for directives, yielding the line number, keyword, and value of
    /// each one found.
    ///
    /// # Arguments
    ///
    /// * `data` - The raw file contents.
    pub fn scan(&self, data: &[u8]) -> Vec<(usize, String, String)> {
        let Some(regex) = &self.regex else {
            return vec![];
        };

        let mut owned;
        let data = if data.ends_with(b"\n") {
            data
        } else {
            owned = data.to_vec();
            owned.push(b'\n');
            owned.as_slice()
        };

        let mut directives = vec![];
        let mut line_number = 1;
        let mut last_match_position = 0;

        for captures in regex.captures_iter(data) {
            let (Some(whole), Some(keyword), Some(value)) =
                (captures.get(0), captures.get(1), captures.get(2))
            else {
                continue;
            };

            let match_position = whole.start();
            line_number += data[last_match_position..match_position]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            last_match_position = match_position;

            let keyword = String::from_utf8_lossy(keyword.as_bytes()).to_string();
            let value = String::from_utf8_lossy(value.as_bytes());
            let value = value.strip_suffix('\r').unwrap_or(&value).to_owned();

            directives.push((line_number, keyword, value));
        }

        directives
    }

    /// Parses the directives of a test, filling in its expected-failure, requirement, and
    /// unsupported lists. Returns the script to run, or the test's result when the directives
    /// alone decide it.
    ///
    /// # Arguments
    ///
    /// * `test` - The test whose file is parsed.
    /// * `require_script` - Whether a test without `RUN:` lines is an error.
    pub fn parse_test(
        &self,
        test: &mut TestCase,
        require_script: bool,
    ) -> Result<ParsedScript, error::Error> {
        let data = std::fs::read(test.file_path())?;
        let mut state = ScanState::default();

        for (line_number, keyword, line) in self.scan(&data) {
            let Some(definition) = self.definitions.get(&keyword) else {
                continue;
            };

            tracing::debug!(
                target: trace_categories::DIRECTIVES,
                "{}:{line_number}: {keyword}{line}",
                test.full_name()
            );

            if let Err(message) = parse_line(definition, line_number, &line, &mut state) {
                return Ok(unresolved(format!(
                    "{message}\nin {keyword} directive on test line {line_number}"
                )));
            }

            if matches!(definition.kind, KeywordKind::Tag) && state.tags.contains(&keyword) {
                break;
            }
        }

        let commands = state.values.remove(RUN).unwrap_or_default();

        if require_script && commands.is_empty() {
            return Ok(unresolved("Test has no run line!"));
        }

        if commands.last().is_some_and(|c| c.ends_with('\\')) {
            return Ok(unresolved("Test has unterminated run lines (with '\\')"));
        }

        for definition in self.definitions.values() {
            if !matches!(definition.kind, KeywordKind::BooleanExpr) {
                continue;
            }

            let unterminated = state
                .values
                .get(&definition.slot)
                .and_then(|v| v.last())
                .is_some_and(|v| v.ends_with('\\'));

            if unterminated {
                return Ok(unresolved(format!(
                    "Test has unterminated {} lines (with '\\')",
                    definition.keyword
                )));
            }
        }

        let mut allowed_retries = None;
        if let Some(values) = state.integers.remove(ALLOW_RETRIES) {
            if values.len() != 1 {
                return Ok(unresolved("Test has more than one ALLOW_RETRIES lines"));
            }
            allowed_retries = Some(u32::try_from(values[0].max(0)).unwrap_or(u32::MAX));
        }

        test.xfails
            .extend(state.values.remove(XFAIL).unwrap_or_default());
        test.requires
            .extend(state.values.remove(REQUIRES).unwrap_or_default());
        test.unsupported
            .extend(state.values.remove(UNSUPPORTED).unwrap_or_default());

        let missing = test.missing_required_features()?;
        if !missing.is_empty() {
            return Ok(ParsedScript::Finished(TestResult::new(
                ResultCode::Unsupported,
                format!(
                    "Test requires the following unavailable features: {}",
                    missing.join(", ")
                ),
            )));
        }

        let unsupported = test.unsupported_features()?;
        if !unsupported.is_empty() {
            return Ok(ParsedScript::Finished(TestResult::new(
                ResultCode::Unsupported,
                format!(
                    "Test does not support the following features and/or targets: {}",
                    unsupported.join(", ")
                ),
            )));
        }

        if !test.is_within_feature_limits()? {
            return Ok(ParsedScript::Finished(TestResult::new(
                ResultCode::Unsupported,
                format!(
                    "Test does not require any of the features specified in limit_to_features: {}",
                    test.config.limit_to_features.iter().join(", ")
                ),
            )));
        }

        let mut values = state.values;
        for (keyword, integers) in state.integers {
            values.insert(keyword, integers.iter().map(ToString::to_string).collect());
        }
        for tag in state.tags {
            values.entry(tag).or_default();
        }

        Ok(ParsedScript::Runnable(Script {
            commands,
            allowed_retries,
            values,
        }))
    }
}

fn unresolved<S: Into<String>>(message: S) -> ParsedScript {
    ParsedScript::Finished(TestResult::new(ResultCode::Unresolved, message))
}

fn parse_line(
    definition: &KeywordDefinition,
    line_number: usize,
    line: &str,
    state: &mut ScanState,
) -> Result<(), String> {
    match definition.kind {
        KeywordKind::Tag => {
            if line.trim().is_empty() {
                state.tags.insert(definition.slot.clone());
            }
            Ok(())
        }
        KeywordKind::Command => {
            let output = state.values.entry(definition.slot.clone()).or_default();
            handle_command(&definition.keyword, line_number, line, output)
        }
        KeywordKind::List => {
            let output = state.values.entry(definition.slot.clone()).or_default();
            handle_list(line_number, line, output)
        }
        KeywordKind::BooleanExpr => {
            let output = state.values.entry(definition.slot.clone()).or_default();
            handle_boolean_expr(line_number, line, output)
        }
        KeywordKind::Integer => {
            let value = line.trim().parse::<i64>().map_err(|_| {
                format!("INTEGER parser requires the input to be an integer (got {line})")
            })?;
            state
                .integers
                .entry(definition.slot.clone())
                .or_default()
                .push(value);
            Ok(())
        }
        KeywordKind::Custom(handler) => {
            let output = state.values.entry(definition.slot.clone()).or_default();
            handler(line_number, line, output)
        }
    }
}

/// Substitutes `%(line)`, `%(line+N)` and `%(line-N)` with line numbers relative to the
/// directive's own line.
fn substitute_line_numbers(line_number: usize, line: &str) -> Result<String, String> {
    let line = line.replace("%(line)", &line_number.to_string());

    let regex = LINE_NUMBER_REGEX.as_ref().map_err(ToString::to_string)?;

    let mut result = String::with_capacity(line.len());
    let mut last = 0;
    for captures in regex.captures_iter(&line) {
        let (Some(whole), Some(sign), Some(offset)) =
            (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };

        let offset: usize = offset
            .as_str()
            .parse()
            .map_err(|_| format!("invalid line offset in '{}'", whole.as_str()))?;

        let value = if sign.as_str() == "+" {
            line_number.saturating_add(offset).to_string()
        } else if let Some(value) = line_number.checked_sub(offset) {
            value.to_string()
        } else {
            format!("-{}", offset - line_number)
        };

        result.push_str(&line[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&line[last..]);

    Ok(result)
}

fn handle_command(
    keyword: &str,
    line_number: usize,
    line: &str,
    output: &mut Vec<String>,
) -> Result<(), String> {
    let line = substitute_line_numbers(line_number, line.trim_end())?;

    if let Some(last) = output.last_mut() {
        if let Some(continued) = last.strip_suffix('\\') {
            *last = format!("{}{line}", continued.trim_end());
            return Ok(());
        }
    }

    output.push(format!(
        "%dbg({keyword} at line {line_number}) {}",
        line.trim_start()
    ));
    Ok(())
}

fn handle_list(_line_number: usize, line: &str, output: &mut Vec<String>) -> Result<(), String> {
    output.extend(line.split(',').map(|s| s.trim().to_owned()));
    Ok(())
}

fn handle_boolean_expr(
    _line_number: usize,
    line: &str,
    output: &mut Vec<String>,
) -> Result<(), String> {
    let mut parts = line
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);

    if let Some(last) = output.last_mut() {
        if let Some(continued) = last.strip_suffix('\\') {
            if let Some(first) = parts.next() {
                *last = format!("{continued}{first}");
            }
        }
    }

    output.extend(parts);

    for expr in output.iter() {
        if expr != "*" && !expr.ends_with('\\') {
            BooleanExpression::check_syntax(expr).map_err(|e| e.to_string())?;
        }
    }

    Ok(())
}

/// Rewrites `REQUIRES-ANY: a, b, c` into the requirement `a || b || c`.
fn handle_requires_any(line_number: usize, line: &str, output: &mut Vec<String>) -> Result<(), String> {
    let mut conditions = vec![];
    handle_list(line_number, line, &mut conditions)?;
    handle_boolean_expr(line_number, &conditions.join(" || "), output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunnerConfig, TestingConfig};
    use crate::test::TestSuite;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        test: TestCase,
    }

    fn fixture(contents: &str, features: &[&str], limits: &[&str]) -> Result<Fixture> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("test.txt"), contents)?;

        let mut config = TestingConfig::root(&RunnerConfig::default());
        config.available_features = features.iter().map(|s| (*s).to_owned()).collect();
        config.limit_to_features = limits.iter().map(|s| (*s).to_owned()).collect();
        config.target_triple = String::from("x86_64-unknown-linux-gnu");
        let config = Arc::new(config);

        let suite = Arc::new(TestSuite {
            name: String::from("suite"),
            source_root: dir.path().to_path_buf(),
            exec_root: dir.path().to_path_buf(),
            config: config.clone(),
        });

        let test = TestCase::new(suite, vec![String::from("test.txt")], config);
        Ok(Fixture { _dir: dir, test })
    }

    fn parse(contents: &str, features: &[&str]) -> Result<(ParsedScript, TestCase)> {
        let mut fixture = fixture(contents, features, &[])?;
        let parsed = KeywordRegistry::standard().parse_test(&mut fixture.test, true)?;
        Ok((parsed, fixture.test))
    }

    fn runnable(parsed: ParsedScript) -> Script {
        match parsed {
            ParsedScript::Runnable(script) => script,
            ParsedScript::Finished(result) => Script {
                commands: vec![format!("unexpected result: {}: {}", result.code, result.output)],
                ..Script::default()
            },
        }
    }

    fn finished(parsed: ParsedScript) -> (ResultCode, String) {
        match parsed {
            ParsedScript::Finished(result) => (result.code, result.output),
            ParsedScript::Runnable(script) => (ResultCode::Pass, script.commands.join("\n")),
        }
    }

    #[test]
    fn scan_tracks_line_numbers() {
        let registry = KeywordRegistry::standard();
        let directives = registry.scan(b"// RUN: a\n\n// XFAIL: *\r\nRUN: b");
        assert_eq!(
            directives,
            [
                (1, String::from("RUN:"), String::from(" a")),
                (3, String::from("XFAIL:"), String::from(" *")),
                (4, String::from("RUN:"), String::from(" b")),
            ]
        );
    }

    #[test]
    fn run_lines_get_debug_markers() -> Result<()> {
        let (parsed, _) = parse("// RUN: echo a\n// RUN: echo b\n", &[])?;
        assert_eq!(
            runnable(parsed).commands,
            [
                "%dbg(RUN: at line 1) echo a",
                "%dbg(RUN: at line 2) echo b"
            ]
        );
        Ok(())
    }

    #[test]
    fn run_line_continuation() -> Result<()> {
        let (parsed, _) = parse("// RUN: cmd1 \\\n// RUN:   cmd2\n", &[])?;
        assert_eq!(
            runnable(parsed).commands,
            ["%dbg(RUN: at line 1) cmd1   cmd2"]
        );
        Ok(())
    }

    #[test]
    fn line_number_substitutions() -> Result<()> {
        let (parsed, _) = parse("\n\n# RUN: echo %(line) %(line+2) %(line - 1)\n", &[])?;
        assert_eq!(
            runnable(parsed).commands,
            ["%dbg(RUN: at line 3) echo 3 5 2"]
        );
        Ok(())
    }

    #[test]
    fn missing_run_line() -> Result<()> {
        let (parsed, _) = parse("no directives here\n", &[])?;
        assert_eq!(
            finished(parsed),
            (ResultCode::Unresolved, String::from("Test has no run line!"))
        );
        Ok(())
    }

    #[test]
    fn unterminated_run_line() -> Result<()> {
        let (parsed, _) = parse("RUN: a \\\n", &[])?;
        assert_eq!(
            finished(parsed),
            (
                ResultCode::Unresolved,
                String::from("Test has unterminated run lines (with '\\')")
            )
        );
        Ok(())
    }

    #[test]
    fn end_tag_stops_scanning() -> Result<()> {
        let (parsed, _) = parse("RUN: a\nEND.notreally\nRUN: b\nEND.\nRUN: c\n", &[])?;
        assert_eq!(
            runnable(parsed).commands,
            ["%dbg(RUN: at line 1) a", "%dbg(RUN: at line 3) b"]
        );
        Ok(())
    }

    #[test]
    fn gating_lists_are_filled() -> Result<()> {
        let contents = "RUN: true\nXFAIL: a, b \\\nXFAIL: || c\nREQUIRES: x\nREQUIRES-ANY: y, z\nUNSUPPORTED: windows\n";
        let (parsed, test) = parse(contents, &["x", "z"])?;
        runnable(parsed);

        assert_eq!(test.xfails, ["a", "b || c"]);
        assert_eq!(test.requires, ["x", "y || z"]);
        assert_eq!(test.unsupported, ["windows"]);
        Ok(())
    }

    #[test]
    fn missing_requirements_are_unsupported() -> Result<()> {
        let (parsed, _) = parse("RUN: true\nREQUIRES: x, y\n", &["x"])?;
        assert_eq!(
            finished(parsed),
            (
                ResultCode::Unsupported,
                String::from("Test requires the following unavailable features: y")
            )
        );
        Ok(())
    }

    #[test]
    fn unsupported_targets() -> Result<()> {
        let (parsed, _) = parse("RUN: true\nUNSUPPORTED: darwin, linux\n", &[])?;
        assert_eq!(
            finished(parsed),
            (
                ResultCode::Unsupported,
                String::from(
                    "Test does not support the following features and/or targets: linux"
                )
            )
        );
        Ok(())
    }

    #[test]
    fn feature_limits() -> Result<()> {
        let mut fixture = fixture("RUN: true\n", &["a"], &["a"])?;
        let parsed = KeywordRegistry::standard().parse_test(&mut fixture.test, true)?;
        assert_eq!(
            finished(parsed),
            (
                ResultCode::Unsupported,
                String::from(
                    "Test does not require any of the features specified in limit_to_features: a"
                )
            )
        );
        Ok(())
    }

    #[test]
    fn malformed_boolean_expression() -> Result<()> {
        let (parsed, _) = parse("RUN: true\nREQUIRES: a && \n", &[])?;
        let (code, message) = finished(parsed);
        assert_eq!(code, ResultCode::Unresolved);
        assert_eq!(
            message,
            "expected: '!' or '(' or identifier\nhave: <end of expression>\nin expression: 'a &&'\nin REQUIRES: directive on test line 2"
        );
        Ok(())
    }

    #[test]
    fn unterminated_boolean_expression() -> Result<()> {
        let (parsed, _) = parse("RUN: true\nUNSUPPORTED: a \\\n", &[])?;
        assert_eq!(
            finished(parsed),
            (
                ResultCode::Unresolved,
                String::from("Test has unterminated UNSUPPORTED: lines (with '\\')")
            )
        );
        Ok(())
    }

    #[test]
    fn allow_retries() -> Result<()> {
        let (parsed, _) = parse("RUN: true\nALLOW_RETRIES: 3\n", &[])?;
        assert_eq!(runnable(parsed).allowed_retries, Some(3));

        let (parsed, _) = parse("RUN: true\nALLOW_RETRIES: 3\nALLOW_RETRIES: 4\n", &[])?;
        assert_eq!(
            finished(parsed),
            (
                ResultCode::Unresolved,
                String::from("Test has more than one ALLOW_RETRIES lines")
            )
        );

        let (parsed, _) = parse("RUN: true\nALLOW_RETRIES: many\n", &[])?;
        assert_eq!(finished(parsed).0, ResultCode::Unresolved);
        Ok(())
    }

    #[test]
    fn registration_rules() -> Result<()> {
        let mut registry = KeywordRegistry::standard();

        assert!(registry.register("MY-TAG:", KeywordKind::Tag).is_err());
        assert!(registry.register("MY-LIST", KeywordKind::List).is_err());
        assert!(registry.register("RUN:", KeywordKind::Command).is_err());

        registry.register("MY-LIST:", KeywordKind::List)?;
        registry.register("MY-TAG.", KeywordKind::Tag)?;

        let mut fixture = fixture("RUN: true\nMY-LIST: a, b\nMY-LIST: c\nMY-TAG.\n", &[], &[])?;
        let script = runnable(registry.parse_test(&mut fixture.test, true)?);
        assert_eq!(
            script.values.get("MY-LIST:").cloned().unwrap_or_default(),
            ["a", "b", "c"]
        );
        assert!(script.values.contains_key("MY-TAG."));
        Ok(())
    }

    #[test]
    fn custom_handlers() -> Result<()> {
        fn upper(_: usize, line: &str, output: &mut Vec<String>) -> Result<(), String> {
            output.push(line.trim().to_uppercase());
            Ok(())
        }

        let mut registry = KeywordRegistry::standard();
        registry.register("SHOUT:", KeywordKind::Custom(upper))?;

        let mut fixture = fixture("RUN: true\nSHOUT: hi\n", &[], &[])?;
        let script = runnable(registry.parse_test(&mut fixture.test, true)?);
        assert_eq!(
            script.values.get("SHOUT:").cloned().unwrap_or_default(),
            ["HI"]
        );
        Ok(())
    }
}
