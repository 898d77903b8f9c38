use std::io::Write;
use std::path::Path;

use clap::Parser;

use crate::builtins::{self, BuiltinContext, ExitCode};
use crate::error;

/// Compare files or directory trees line by line.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct DiffCommand {
    /// Ignore all white space.
    #[arg(short = 'w')]
    ignore_all_space: bool,

    /// Ignore changes in the amount of white space.
    #[arg(short = 'b')]
    ignore_space_change: bool,

    /// Output in unified format; this is the only supported format.
    #[arg(short = 'u')]
    _unified: bool,

    /// Number of context lines to show around each change.
    #[arg(short = 'U', value_name = "NUM")]
    context_lines: Option<usize>,

    /// Recursively compare subdirectories.
    #[arg(short = 'r')]
    recursive: bool,

    /// Strip trailing carriage return on input.
    #[arg(long = "strip-trailing-cr")]
    strip_trailing_cr: bool,

    /// The two paths to compare.
    #[arg(allow_hyphen_values = true)]
    paths: Vec<String>,
}

const DEFAULT_CONTEXT_LINES: usize = 3;

impl builtins::Command for DiffCommand {
    fn execute(&self, context: &mut BuiltinContext<'_>) -> Result<ExitCode, error::Error> {
        let [left, right] = self.paths.as_slice() else {
            return Err(error::Error::InternalShell(String::from(
                "Error:  missing or extra operand",
            )));
        };

        if left == "-" || right == "-" {
            return Err(error::Error::Unsupported(String::from(
                "Unsupported: 'diff': comparing standard input is not supported",
            )));
        }

        let left = context.absolute_path(left);
        let right = context.absolute_path(right);

        let mut output = vec![];
        let result = if self.recursive {
            self.compare_trees(&left, &right, &mut output)
        } else {
            self.compare_files(&left, &right, &mut output)
        };

        context.stdout.extend(output);

        match result {
            Ok(true) => Ok(ExitCode::Success),
            Ok(false) => Ok(ExitCode::Failure),
            Err(e) => {
                writeln!(context.stderr, "Error: 'diff' command failed, {e}")?;
                Ok(ExitCode::Failure)
            }
        }
    }
}

/// A directory tree as seen by `diff -r`: children are sorted by name.
enum Node {
    File,
    Dir(Vec<(String, Node)>),
}

fn read_tree(path: &Path) -> std::io::Result<Node> {
    if !path.is_dir() {
        return Ok(Node::File);
    }

    let mut children = vec![];
    for entry in walkdir::WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        children.push((name, read_tree(entry.path())?));
    }

    Ok(Node::Dir(children))
}

fn file_kind(path: &Path) -> &'static str {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.len() == 0 => "regular empty file",
        _ => "regular file",
    }
}

impl DiffCommand {
    /// Compares two directory trees, writing a report of their differences. Returns whether
    /// the trees are identical.
    fn compare_trees(
        &self,
        left: &Path,
        right: &Path,
        output: &mut Vec<u8>,
    ) -> std::io::Result<bool> {
        let left_tree = read_tree(left)?;
        let right_tree = read_tree(right)?;
        self.compare_nodes((left, &left_tree), (right, &right_tree), output)
    }

    fn compare_nodes(
        &self,
        (left, left_node): (&Path, &Node),
        (right, right_node): (&Path, &Node),
        output: &mut Vec<u8>,
    ) -> std::io::Result<bool> {
        let (left_children, right_children) = match (left_node, right_node) {
            (Node::File, Node::File) => return self.compare_files(left, right, output),
            (Node::File, Node::Dir(_)) => {
                writeln!(
                    output,
                    "File {} is a {} while file {} is a directory",
                    left.display(),
                    file_kind(left),
                    right.display()
                )?;
                return Ok(false);
            }
            (Node::Dir(_), Node::File) => {
                writeln!(
                    output,
                    "File {} is a directory while file {} is a {}",
                    left.display(),
                    right.display(),
                    file_kind(right)
                )?;
                return Ok(false);
            }
            (Node::Dir(l), Node::Dir(r)) => (l, r),
        };

        let mut same = true;
        let (mut l, mut r) = (0, 0);

        while l < left_children.len() || r < right_children.len() {
            let order = match (left_children.get(l), right_children.get(r)) {
                (Some((left_name, _)), Some((right_name, _))) => left_name.cmp(right_name),
                (Some(_), None) => std::cmp::Ordering::Less,
                _ => std::cmp::Ordering::Greater,
            };

            match order {
                std::cmp::Ordering::Less => {
                    writeln!(output, "Only in {}: {}", left.display(), left_children[l].0)?;
                    same = false;
                    l += 1;
                }
                std::cmp::Ordering::Greater => {
                    writeln!(output, "Only in {}: {}", right.display(), right_children[r].0)?;
                    same = false;
                    r += 1;
                }
                std::cmp::Ordering::Equal => {
                    let (name, left_child) = &left_children[l];
                    let (_, right_child) = &right_children[r];
                    same &= self.compare_nodes(
                        (&left.join(name), left_child),
                        (&right.join(name), right_child),
                        output,
                    )?;
                    l += 1;
                    r += 1;
                }
            }
        }

        Ok(same)
    }

    /// Compares two files, writing a unified diff of their differences. Returns whether the
    /// files are identical.
    fn compare_files(
        &self,
        left: &Path,
        right: &Path,
        output: &mut Vec<u8>,
    ) -> std::io::Result<bool> {
        let left_data = std::fs::read(left)?;
        let right_data = std::fs::read(right)?;

        let (Ok(left_text), Ok(right_text)) =
            (std::str::from_utf8(&left_data), std::str::from_utf8(&right_data))
        else {
            if left_data == right_data {
                return Ok(true);
            }
            writeln!(
                output,
                "Binary files {} and {} differ",
                left.display(),
                right.display()
            )?;
            return Ok(false);
        };

        let left_lines = self.prepare_lines(left_text);
        let right_lines = self.prepare_lines(right_text);

        let hunks = unified_hunks(
            &left_lines,
            &right_lines,
            self.context_lines.unwrap_or(DEFAULT_CONTEXT_LINES),
        );

        if hunks.is_empty() {
            return Ok(true);
        }

        writeln!(output, "--- {}", left.display())?;
        writeln!(output, "+++ {}", right.display())?;
        for hunk in hunks {
            output.extend(hunk.into_bytes());
        }

        Ok(false)
    }

    fn prepare_lines(&self, text: &str) -> Vec<String> {
        text.split_inclusive('\n')
            .map(|line| {
                let mut line = line.to_owned();

                if self.strip_trailing_cr && line.ends_with("\r\n") {
                    line.truncate(line.len() - 2);
                    line.push('\n');
                }

                if self.ignore_all_space || self.ignore_space_change {
                    let separator = if self.ignore_all_space { "" } else { " " };
                    line = line.split_whitespace().collect::<Vec<_>>().join(separator);
                    line.push('\n');
                }

                line
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tag {
    Equal,
    Delete,
    Insert,
}

struct Edit<'a> {
    tag: Tag,
    line: &'a str,
    left_index: usize,
    right_index: usize,
}

/// Computes the line edits turning `left` into `right`. Within each run of changes, all
/// deletions precede all insertions.
fn edits<'a>(left: &'a [String], right: &'a [String]) -> Vec<Edit<'a>> {
    let mut tagged: Vec<(Tag, &str)> = vec![];
    let mut pending_inserts = vec![];

    for result in diff::slice(left, right) {
        match result {
            diff::Result::Both(line, _) => {
                tagged.append(&mut pending_inserts);
                tagged.push((Tag::Equal, line.as_str()));
            }
            diff::Result::Left(line) => tagged.push((Tag::Delete, line.as_str())),
            diff::Result::Right(line) => pending_inserts.push((Tag::Insert, line.as_str())),
        }
    }
    tagged.append(&mut pending_inserts);

    let (mut left_index, mut right_index) = (0, 0);
    tagged
        .into_iter()
        .map(|(tag, line)| {
            let edit = Edit {
                tag,
                line,
                left_index,
                right_index,
            };
            match tag {
                Tag::Equal => {
                    left_index += 1;
                    right_index += 1;
                }
                Tag::Delete => left_index += 1,
                Tag::Insert => right_index += 1,
            }
            edit
        })
        .collect()
}

/// Produces the hunks of a unified diff, each starting with its `@@` header. Changes
/// separated by no more than twice the context length share a hunk.
fn unified_hunks(left: &[String], right: &[String], context: usize) -> Vec<String> {
    let edits = edits(left, right);

    let mut groups: Vec<(usize, usize)> = vec![];
    for (i, edit) in edits.iter().enumerate() {
        if edit.tag == Tag::Equal {
            continue;
        }

        match groups.last_mut() {
            Some((_, last)) if i - *last - 1 <= 2 * context => *last = i,
            _ => groups.push((i, i)),
        }
    }

    groups
        .into_iter()
        .map(|(first, last)| {
            let start = first.saturating_sub(context);
            let end = (last + context + 1).min(edits.len());
            let hunk = &edits[start..end];

            let left_len = hunk.iter().filter(|e| e.tag != Tag::Insert).count();
            let right_len = hunk.iter().filter(|e| e.tag != Tag::Delete).count();

            let mut text = format!(
                "@@ -{} +{} @@\n",
                format_range(hunk[0].left_index, left_len),
                format_range(hunk[0].right_index, right_len)
            );

            for edit in hunk {
                text.push(match edit.tag {
                    Tag::Equal => ' ',
                    Tag::Delete => '-',
                    Tag::Insert => '+',
                });
                text.push_str(edit.line);
                if !edit.line.ends_with('\n') {
                    text.push_str("\n\\ No newline at end of file\n");
                }
            }

            text
        })
        .collect()
}

/// Formats a hunk range as `start,length`; a single line is just its number, and an empty
/// range names the line before it.
fn format_range(start: usize, length: usize) -> String {
    match length {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{length}", start + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::{env_in, invoke};
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn lines(text: &str) -> Vec<String> {
        text.split_inclusive('\n').map(str::to_owned).collect()
    }

    #[test]
    fn ranges() {
        assert_eq!(format_range(0, 0), "0,0");
        assert_eq!(format_range(4, 1), "5");
        assert_eq!(format_range(4, 3), "5,3");
    }

    #[test]
    fn single_change_hunk() {
        let left = lines("a\nb\nc\nd\ne\nf\ng\nh\n");
        let right = lines("a\nb\nc\nd\nX\nf\ng\nh\n");

        let hunks = unified_hunks(&left, &right, 3);
        assert_eq!(
            hunks,
            ["@@ -2,7 +2,7 @@\n b\n c\n d\n-e\n+X\n f\n g\n h\n"]
        );
    }

    #[test]
    fn distant_changes_split_hunks() {
        let left = lines("1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n");
        let right = lines("x\n2\n3\n4\n5\n6\n7\n8\n9\ny\n");

        let hunks = unified_hunks(&left, &right, 1);
        assert_eq!(hunks, ["@@ -1,2 +1,2 @@\n-1\n+x\n 2\n", "@@ -9,2 +9,2 @@\n 9\n-10\n+y\n"]);

        let hunks = unified_hunks(&left, &right, 4);
        assert_eq!(hunks.len(), 1);
    }

    #[test]
    fn insertion_into_empty() {
        let hunks = unified_hunks(&[], &lines("a\n"), 3);
        assert_eq!(hunks, ["@@ -0,0 +1 @@\n+a\n"]);
    }

    #[test]
    fn identical_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a"), "x\ny\n")?;
        std::fs::write(dir.path().join("b"), "x\ny\n")?;
        let mut env = env_in(dir.path());

        let result = invoke(&mut env, &["diff", "a", "b"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));
        assert_eq!(result.stdout, "");
        Ok(())
    }

    #[test]
    fn different_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a"), "x\ny\n")?;
        std::fs::write(dir.path().join("b"), "x\nz\n")?;
        let mut env = env_in(dir.path());

        let result = invoke(&mut env, &["diff", "-u", "a", "b"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));
        assert_eq!(
            result.stdout,
            format!(
                "--- {}\n+++ {}\n@@ -1,2 +1,2 @@\n x\n-y\n+z\n",
                dir.path().join("a").display(),
                dir.path().join("b").display()
            )
        );
        Ok(())
    }

    #[test]
    fn whitespace_and_carriage_returns() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a"), "a  b\r\nc\n")?;
        std::fs::write(dir.path().join("b"), "a b\nc\n")?;
        std::fs::write(dir.path().join("c"), "ab\nc\n")?;
        let mut env = env_in(dir.path());

        let result = invoke(&mut env, &["diff", "a", "b"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));

        let result = invoke(&mut env, &["diff", "-b", "a", "b"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));

        let result = invoke(&mut env, &["diff", "-b", "a", "c"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));

        let result = invoke(&mut env, &["diff", "-w", "a", "c"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));

        std::fs::write(dir.path().join("d"), "a  b\nc\n")?;
        let result = invoke(&mut env, &["diff", "a", "d"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));
        let result = invoke(&mut env, &["diff", "--strip-trailing-cr", "a", "d"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));

        Ok(())
    }

    #[test]
    fn binary_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a"), [0xff, 0x00])?;
        std::fs::write(dir.path().join("b"), [0xfe, 0x00])?;
        let mut env = env_in(dir.path());

        let result = invoke(&mut env, &["diff", "a", "b"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));
        assert!(result.stdout.starts_with("Binary files "));
        Ok(())
    }

    #[test]
    fn operand_count() {
        let mut env = env_in(Path::new("/"));
        let result = invoke(&mut env, &["diff", "a"]);
        assert!(matches!(
            result.exit_code,
            Err(error::Error::InternalShell(ref m)) if m == "Error:  missing or extra operand"
        ));
    }

    #[test]
    fn missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut env = env_in(dir.path());

        let result = invoke(&mut env, &["diff", "a", "b"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));
        assert!(result.stderr.starts_with("Error: 'diff' command failed, "));
        Ok(())
    }

    #[test]
    fn recursive_trees() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let left = dir.path().join("left");
        let right = dir.path().join("right");

        for root in [&left, &right] {
            std::fs::create_dir_all(root.join("sub"))?;
            std::fs::write(root.join("same"), "1\n")?;
            std::fs::write(root.join("sub").join("f"), "2\n")?;
        }

        let mut env = env_in(dir.path());
        let result = invoke(&mut env, &["diff", "-r", "left", "right"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Success)));
        assert_eq!(result.stdout, "");

        std::fs::write(right.join("sub").join("extra"), "")?;
        let result = invoke(&mut env, &["diff", "-r", "left", "right"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));
        assert_eq!(
            result.stdout,
            format!("Only in {}: extra\n", right.join("sub").display())
        );

        Ok(())
    }

    #[test]
    fn recursive_type_mismatch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let left = dir.path().join("left");
        let right = dir.path().join("right");
        std::fs::create_dir_all(left.join("x"))?;
        std::fs::create_dir_all(&right)?;
        std::fs::write(right.join("x"), "")?;

        let mut env = env_in(dir.path());
        let result = invoke(&mut env, &["diff", "-r", "left", "right"]);
        assert!(matches!(result.exit_code, Ok(ExitCode::Failure)));
        assert_eq!(
            result.stdout,
            format!(
                "File {} is a directory while file {} is a regular empty file\n",
                left.join("x").display(),
                right.join("x").display()
            )
        );

        let result = invoke(&mut env, &["diff", "-r", "right", "left"]);
        assert_eq!(
            result.stdout,
            format!(
                "File {} is a regular empty file while file {} is a directory\n",
                right.join("x").display(),
                left.join("x").display()
            )
        );

        Ok(())
    }
}
