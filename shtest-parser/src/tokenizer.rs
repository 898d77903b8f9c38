use std::fmt::Display;

use crate::ParserOptions;

/// An operator recognized by the tokenizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `|`
    Pipe,
    /// `||`
    Or,
    /// `&`
    Async,
    /// `&&`
    And,
    /// `&>`
    RedirectOutputAndError,
    /// `>`
    RedirectOutput,
    /// `>>`
    AppendOutput,
    /// `>&`
    DuplicateOutput,
    /// `<`
    RedirectInput,
    /// `<<`
    HereDocument,
    /// `<&`
    DuplicateInput,
    /// `;`
    Semicolon,
    /// A standalone, unquoted `!`.
    Bang,
}

impl Operator {
    /// Returns the textual form of the operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pipe => "|",
            Self::Or => "||",
            Self::Async => "&",
            Self::And => "&&",
            Self::RedirectOutputAndError => "&>",
            Self::RedirectOutput => ">",
            Self::AppendOutput => ">>",
            Self::DuplicateOutput => ">&",
            Self::RedirectInput => "<",
            Self::HereDocument => "<<",
            Self::DuplicateInput => "<&",
            Self::Semicolon => ";",
            Self::Bang => "!",
        }
    }

    /// Returns whether the operator introduces a redirection.
    pub const fn is_redirection(self) -> bool {
        matches!(
            self,
            Self::RedirectOutputAndError
                | Self::RedirectOutput
                | Self::AppendOutput
                | Self::DuplicateOutput
                | Self::RedirectInput
                | Self::HereDocument
                | Self::DuplicateInput
        )
    }

    /// Returns whether the operator ends a simple command.
    pub const fn is_command_terminator(self) -> bool {
        matches!(
            self,
            Self::Pipe | Self::Or | Self::Async | Self::And | Self::Semicolon
        )
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a token extracted from a command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// A plain word, with quoting and escaping already removed.
    Word(String),
    /// A word containing unquoted glob characters; expansion is deferred.
    Glob(String),
    /// An operator, optionally qualified by a file descriptor (e.g. `2>`).
    Operator {
        /// The operator.
        op: Operator,
        /// The file descriptor the operator applies to, if one was given.
        fd: Option<u32>,
    },
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word(s) | Self::Glob(s) => f.write_str(s),
            Self::Operator { op, fd: Some(fd) } => write!(f, "{fd}{op}"),
            Self::Operator { op, fd: None } => write!(f, "{op}"),
        }
    }
}

/// Represents an error that occurred during tokenization.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum TokenizerError {
    /// A quoted substring was not terminated before the end of the input.
    #[error("missing quote character in '{0}'")]
    UnterminatedQuote(String),

    /// The input ended immediately after an escape character.
    #[error("escape at end of argument in '{0}'")]
    UnterminatedEscape(String),

    /// A numeric redirection prefix could not be represented as a file descriptor.
    #[error("invalid file descriptor: '{0}'")]
    InvalidFileDescriptor(String),
}

/// Lazily tokenizes a single command line.
///
/// The tokenizer is an iterator over tokens; once it yields an error, it yields nothing further.
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    win32_escapes: bool,
}

impl<'a> Tokenizer<'a> {
    /// Creates a tokenizer over the given input.
    ///
    /// # Arguments
    ///
    /// * `input` - The command line to tokenize.
    /// * `options` - Options controlling tokenization.
    pub const fn new(input: &'a str, options: &ParserOptions) -> Self {
        Self {
            input,
            pos: 0,
            win32_escapes: options.win32_escapes,
        }
    }

    fn look(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn eat(&mut self) -> Option<char> {
        let c = self.look()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn maybe_eat(&mut self, c: char) -> bool {
        if self.look() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenizerError> {
        while self.look().is_some_and(char::is_whitespace) {
            self.eat();
        }

        if self.look().is_none() {
            return Ok(None);
        }

        if let Some(op) = self.lex_operator() {
            return Ok(Some(Token::Operator { op, fd: None }));
        }

        if let Some(token) = self.lex_arg_fast() {
            return Ok(Some(token));
        }

        self.lex_arg_slow().map(Some)
    }

    fn lex_operator(&mut self) -> Option<Operator> {
        let op = match self.look()? {
            ';' => {
                self.eat();
                Operator::Semicolon
            }
            '|' => {
                self.eat();
                if self.maybe_eat('|') {
                    Operator::Or
                } else {
                    Operator::Pipe
                }
            }
            '&' => {
                self.eat();
                if self.maybe_eat('&') {
                    Operator::And
                } else if self.maybe_eat('>') {
                    Operator::RedirectOutputAndError
                } else {
                    Operator::Async
                }
            }
            '>' => {
                self.eat();
                if self.maybe_eat('&') {
                    Operator::DuplicateOutput
                } else if self.maybe_eat('>') {
                    Operator::AppendOutput
                } else {
                    Operator::RedirectOutput
                }
            }
            '<' => {
                self.eat();
                if self.maybe_eat('&') {
                    Operator::DuplicateInput
                } else if self.maybe_eat('<') {
                    Operator::HereDocument
                } else {
                    Operator::RedirectInput
                }
            }
            _ => return None,
        };

        Some(op)
    }

    /// Lexes a whitespace-delimited run that needs no quote, escape, or operator handling.
    /// Leaves the position untouched and returns `None` if the run needs the full state machine.
    fn lex_arg_fast(&mut self) -> Option<Token> {
        let rest = &self.input[self.pos..];
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let chunk = &rest[..end];

        if chunk.contains(['|', '&', '<', '>', '\'', '"', ';', '\\']) {
            return None;
        }

        self.pos += chunk.len();

        let token = if chunk == "!" {
            Token::Operator {
                op: Operator::Bang,
                fd: None,
            }
        } else if chunk.contains(['*', '?']) {
            Token::Glob(chunk.to_owned())
        } else {
            Token::Word(chunk.to_owned())
        };

        Some(token)
    }

    fn lex_arg_slow(&mut self) -> Result<Token, TokenizerError> {
        let mut value = String::new();
        let mut quoted = false;
        let mut quoted_glob_char = false;
        let mut unquoted_glob_char = false;

        while let Some(c) = self.look() {
            if c.is_whitespace() || matches!(c, '|' | '&' | ';') {
                break;
            }

            match c {
                '>' | '<' => {
                    // A bare number directly followed by a redirection names the fd it applies to.
                    if quoted || value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
                        break;
                    }

                    let fd = value
                        .parse::<u32>()
                        .map_err(|_| TokenizerError::InvalidFileDescriptor(value.clone()))?;

                    let Some(op) = self.lex_operator() else {
                        break;
                    };

                    return Ok(Token::Operator { op, fd: Some(fd) });
                }
                '"' | '\'' => {
                    self.eat();
                    let s = self.lex_quoted(c)?;
                    quoted = true;
                    if s.contains(['*', '?']) {
                        quoted_glob_char = true;
                    }
                    value.push_str(&s);
                }
                '\\' if !self.win32_escapes => {
                    // Outside of quotes, a backslash escapes anything.
                    self.eat();
                    let Some(escaped) = self.eat() else {
                        return Err(TokenizerError::UnterminatedEscape(self.input.to_owned()));
                    };
                    quoted = true;
                    if matches!(escaped, '*' | '?') {
                        quoted_glob_char = true;
                    }
                    value.push(escaped);
                }
                '*' | '?' => {
                    self.eat();
                    unquoted_glob_char = true;
                    value.push(c);
                }
                _ => {
                    self.eat();
                    value.push(c);
                }
            }
        }

        if quoted_glob_char && unquoted_glob_char {
            tracing::warn!(
                target: "tokenize",
                "glob characters appear both inside and outside of quotes in '{value}'; treating it as a plain word"
            );
            return Ok(Token::Word(value));
        }

        let token = if unquoted_glob_char {
            Token::Glob(value)
        } else if !quoted && value == "!" {
            Token::Operator {
                op: Operator::Bang,
                fd: None,
            }
        } else {
            Token::Word(value)
        };

        Ok(token)
    }

    fn lex_quoted(&mut self, delim: char) -> Result<String, TokenizerError> {
        let mut value = String::new();

        while let Some(c) = self.eat() {
            if c == delim {
                return Ok(value);
            }

            if c == '\\' && delim == '"' {
                // Inside double quotes, a backslash only escapes the quote and itself.
                match self.eat() {
                    Some(c @ ('"' | '\\')) => value.push(c),
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => break,
                }
            } else {
                value.push(c);
            }
        }

        Err(TokenizerError::UnterminatedQuote(self.input.to_owned()))
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token, TokenizerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.next_token();
        if result.is_err() {
            self.pos = self.input.len();
        }

        result.transpose()
    }
}

/// Breaks the given command line into tokens.
///
/// # Arguments
///
/// * `input` - The command line to tokenize.
/// * `options` - Options controlling tokenization.
pub fn tokenize_str(input: &str, options: &ParserOptions) -> Result<Vec<Token>, TokenizerError> {
    tracing::debug!(target: "tokenize", "tokenizing: '{input}'");
    Tokenizer::new(input, options).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn word(s: &str) -> Token {
        Token::Word(s.to_owned())
    }

    fn op(op: Operator) -> Token {
        Token::Operator { op, fd: None }
    }

    fn tokenize(input: &str) -> Result<Vec<Token>, TokenizerError> {
        tokenize_str(input, &ParserOptions::default())
    }

    #[test]
    fn tokenize_empty() -> Result<()> {
        assert_eq!(tokenize("")?, vec![]);
        assert_eq!(tokenize("   \t ")?, vec![]);
        Ok(())
    }

    #[test]
    fn tokenize_simple_words() -> Result<()> {
        assert_eq!(
            tokenize("echo hello  world")?,
            vec![word("echo"), word("hello"), word("world")]
        );
        Ok(())
    }

    #[test]
    fn tokenize_operators() -> Result<()> {
        assert_eq!(
            tokenize("a|b||c&d&&e;f")?,
            vec![
                word("a"),
                op(Operator::Pipe),
                word("b"),
                op(Operator::Or),
                word("c"),
                op(Operator::Async),
                word("d"),
                op(Operator::And),
                word("e"),
                op(Operator::Semicolon),
                word("f"),
            ]
        );

        assert_eq!(
            tokenize("a &> b > c >> d >& e < f << g <& h")?,
            vec![
                word("a"),
                op(Operator::RedirectOutputAndError),
                word("b"),
                op(Operator::RedirectOutput),
                word("c"),
                op(Operator::AppendOutput),
                word("d"),
                op(Operator::DuplicateOutput),
                word("e"),
                op(Operator::RedirectInput),
                word("f"),
                op(Operator::HereDocument),
                word("g"),
                op(Operator::DuplicateInput),
                word("h"),
            ]
        );

        Ok(())
    }

    #[test]
    fn tokenize_fd_redirections() -> Result<()> {
        assert_eq!(
            tokenize("cmd 2>&1 2> err 10>>log")?,
            vec![
                word("cmd"),
                Token::Operator {
                    op: Operator::DuplicateOutput,
                    fd: Some(2),
                },
                word("1"),
                Token::Operator {
                    op: Operator::RedirectOutput,
                    fd: Some(2),
                },
                word("err"),
                Token::Operator {
                    op: Operator::AppendOutput,
                    fd: Some(10),
                },
                word("log"),
            ]
        );

        // Quoted digits are never file descriptors.
        assert_eq!(
            tokenize("cmd \"2\">out")?,
            vec![word("cmd"), word("2"), op(Operator::RedirectOutput), word("out")]
        );

        Ok(())
    }

    #[test]
    fn tokenize_quotes() -> Result<()> {
        assert_eq!(
            tokenize(r#"'a b' "c d" 'e\f' "g\"h\\i\j" x"y"'z'"#)?,
            vec![
                word("a b"),
                word("c d"),
                word(r"e\f"),
                word(r#"g"h\i\j"#),
                word("xyz"),
            ]
        );
        assert_eq!(tokenize(r#""""#)?, vec![word("")]);
        Ok(())
    }

    #[test]
    fn tokenize_escapes() -> Result<()> {
        assert_eq!(tokenize(r"a\ b c\;d")?, vec![word("a b"), word("c;d")]);

        let win32 = ParserOptions::builder().win32_escapes(true).build();
        assert_eq!(
            tokenize_str(r"C:\dir\file", &win32)?,
            vec![word(r"C:\dir\file")]
        );

        Ok(())
    }

    #[test]
    fn tokenize_globs() -> Result<()> {
        assert_eq!(
            tokenize("ls *.txt file? '*.c' \\*")?,
            vec![
                word("ls"),
                Token::Glob("*.txt".into()),
                Token::Glob("file?".into()),
                word("*.c"),
                word("*"),
            ]
        );

        assert_eq!(tokenize("a'*'b*")?, vec![word("a*b*")]);

        Ok(())
    }

    #[test]
    fn tokenize_bang() -> Result<()> {
        assert_eq!(
            tokenize("! cmd '!'")?,
            vec![op(Operator::Bang), word("cmd"), word("!")]
        );
        Ok(())
    }

    #[test]
    fn tokenize_errors() {
        assert_eq!(
            tokenize("echo 'abc"),
            Err(TokenizerError::UnterminatedQuote("echo 'abc".into()))
        );
        assert_eq!(
            tokenize("echo \"abc"),
            Err(TokenizerError::UnterminatedQuote("echo \"abc".into()))
        );
        assert_eq!(
            tokenize("echo abc\\"),
            Err(TokenizerError::UnterminatedEscape("echo abc\\".into()))
        );
    }

    #[test]
    fn tokenizer_stops_after_error() {
        let options = ParserOptions::default();
        let mut tokenizer = Tokenizer::new("a 'b", &options);
        assert!(matches!(tokenizer.next(), Some(Ok(Token::Word(_)))));
        assert!(matches!(tokenizer.next(), Some(Err(_))));
        assert!(tokenizer.next().is_none());
    }

    #[test]
    fn fast_and_slow_paths_agree() -> Result<()> {
        let options = ParserOptions::default();
        let inputs = [
            "abc",
            "a-b_c.d/e",
            "*.txt",
            "file?.c",
            "%t.out",
            "x=1",
            "!",
            "--flag=value",
            "ünïcödé",
        ];

        for input in inputs {
            let mut fast = Tokenizer::new(input, &options);
            let fast_token = fast.lex_arg_fast();

            let mut slow = Tokenizer::new(input, &options);
            let slow_token = slow.lex_arg_slow()?;

            assert_eq!(fast_token, Some(slow_token), "input: {input}");
            assert_eq!(fast.pos, slow.pos, "input: {input}");
        }

        Ok(())
    }
}
