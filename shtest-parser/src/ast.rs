//! Defines the abstract syntax tree for parsed command lines.
//!
//! Every node implements [`Display`], producing shell text that parses back into an
//! equal tree.

use std::fmt::{Display, Write};

use crate::Operator;

const SPECIAL_CHARS: &[char] = &['|', '&', ';', '<', '>', '\'', '"', '\\', '*', '?'];

/// An argument to a command, or the target of a redirection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Argument {
    /// A literal word.
    Word(String),
    /// A glob pattern whose expansion is deferred until execution.
    Glob(String),
}

impl Argument {
    /// Returns the raw text of the argument.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Word(s) | Self::Glob(s) => s.as_str(),
        }
    }

    /// Returns whether the argument is a glob pattern.
    pub const fn is_glob(&self) -> bool {
        matches!(self, Self::Glob(_))
    }
}

impl Display for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word(s) => {
                let needs_quoting = s.is_empty()
                    || s == "!"
                    || s.contains(SPECIAL_CHARS)
                    || s.contains(char::is_whitespace);

                if !needs_quoting {
                    return f.write_str(s);
                }

                f.write_char('"')?;
                for c in s.chars() {
                    if matches!(c, '"' | '\\') {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                f.write_char('"')
            }
            Self::Glob(s) => {
                for c in s.chars() {
                    if c != '*' && c != '?' && (SPECIAL_CHARS.contains(&c) || c.is_whitespace()) {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                Ok(())
            }
        }
    }
}

/// A redirection attached to a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    /// The redirection operator.
    pub op: Operator,
    /// The file descriptor named before the operator, if any.
    pub fd: Option<u32>,
    /// The word following the operator.
    pub target: Argument,
}

impl Display for Redirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(fd) = self.fd {
            write!(f, "{fd}")?;
        }
        write!(f, "{} {}", self.op, self.target)
    }
}

/// A simple command: a command name, its arguments, and its redirections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    /// The command name followed by its arguments.
    pub args: Vec<Argument>,
    /// Redirections, in source order.
    pub redirects: Vec<Redirect>,
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_char(' ')?;
            }
            write!(f, "{arg}")?;
            first = false;
        }

        for redirect in &self.redirects {
            write!(f, " {redirect}")?;
        }

        Ok(())
    }
}

/// One or more commands connected by pipes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pipeline {
    /// The commands in the pipeline, in order.
    pub commands: Vec<Command>,
    /// Whether the pipeline's exit status is inverted.
    pub negate: bool,
    /// Whether any failing stage fails the pipeline, rather than just the last one.
    pub pipefail: bool,
}

impl Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negate {
            f.write_str("! ")?;
        }

        for (i, command) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{command}")?;
        }

        Ok(())
    }
}

/// Operator joining the two halves of a [`Sequence`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceOperator {
    /// `;`: run both unconditionally.
    Semicolon,
    /// `&`: run the left side in the background.
    Async,
    /// `&&`: run the right side if the left side succeeded.
    And,
    /// `||`: run the right side if the left side failed.
    Or,
}

impl SequenceOperator {
    pub(crate) const fn from_operator(op: Operator) -> Option<Self> {
        match op {
            Operator::Semicolon => Some(Self::Semicolon),
            Operator::Async => Some(Self::Async),
            Operator::And => Some(Self::And),
            Operator::Or => Some(Self::Or),
            _ => None,
        }
    }

    /// Returns the operator as it appears in shell text.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Semicolon => ";",
            Self::Async => "&",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl Display for SequenceOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two commands joined by a sequencing operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    /// The left-hand side.
    pub lhs: ShellCommand,
    /// The joining operator.
    pub op: SequenceOperator,
    /// The right-hand side.
    pub rhs: ShellCommand,
}

impl Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// A fully parsed command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    /// A single pipeline.
    Pipeline(Pipeline),
    /// A sequence of commands.
    Sequence(Box<Sequence>),
}

impl ShellCommand {
    /// Joins two command lines with the given operator.
    pub fn join(lhs: Self, op: SequenceOperator, rhs: Self) -> Self {
        Self::Sequence(Box::new(Sequence { lhs, op, rhs }))
    }
}

impl Display for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline(pipeline) => write!(f, "{pipeline}"),
            Self::Sequence(sequence) => write!(f, "{sequence}"),
        }
    }
}
