use crate::ast::{self, Argument, SequenceOperator, ShellCommand};
use crate::tokenizer::{Operator, Token, Tokenizer};
use crate::ParseError;

/// Options used to control the behavior of the parser.
#[derive(Clone, Debug, Default, bon::Builder)]
pub struct ParserOptions {
    /// Whether parsed pipelines fail when any of their stages fail.
    #[builder(default)]
    pub pipefail: bool,
    /// Whether to treat backslashes outside of quotes as literal characters, as paths on
    /// Windows-style hosts require.
    #[builder(default)]
    pub win32_escapes: bool,
}

/// Implements parsing of a single command line.
///
/// Sequences are parsed strictly left-to-right: `a ; b && c` groups as `(a ; b) && c`.
pub struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    lookahead: Option<Token>,
    pipefail: bool,
}

impl<'a> Parser<'a> {
    /// Returns a new parser instance.
    ///
    /// # Arguments
    ///
    /// * `input` - The command line to parse.
    /// * `options` - The options to use when parsing.
    pub const fn new(input: &'a str, options: &ParserOptions) -> Self {
        Self {
            tokenizer: Tokenizer::new(input, options),
            lookahead: None,
            pipefail: options.pipefail,
        }
    }

    /// Parses the input into an abstract syntax tree (AST) of a command line.
    pub fn parse(mut self) -> Result<ShellCommand, ParseError> {
        let mut lhs = ShellCommand::Pipeline(self.parse_pipeline()?);

        while let Some(token) = self.lex()? {
            let op = match &token {
                Token::Operator { op, fd: None } => SequenceOperator::from_operator(*op),
                _ => None,
            };

            let Some(op) = op else {
                return Err(ParseError::UnexpectedToken(token.to_string()));
            };

            if self.look()?.is_none() {
                return Err(ParseError::MissingOperatorArgument(op.to_string()));
            }

            let rhs = ShellCommand::Pipeline(self.parse_pipeline()?);
            lhs = ShellCommand::join(lhs, op, rhs);
        }

        Ok(lhs)
    }

    fn look(&mut self) -> Result<Option<&Token>, ParseError> {
        if self.lookahead.is_none() {
            self.lookahead = self.tokenizer.next().transpose()?;
        }

        Ok(self.lookahead.as_ref())
    }

    fn lex(&mut self) -> Result<Option<Token>, ParseError> {
        match self.lookahead.take() {
            Some(token) => Ok(Some(token)),
            None => Ok(self.tokenizer.next().transpose()?),
        }
    }

    fn parse_pipeline(&mut self) -> Result<ast::Pipeline, ParseError> {
        let mut negate = false;
        while matches!(
            self.look()?,
            Some(Token::Operator {
                op: Operator::Bang,
                ..
            })
        ) {
            self.lex()?;
            negate = !negate;
        }

        let mut commands = vec![self.parse_command()?];
        while matches!(
            self.look()?,
            Some(Token::Operator {
                op: Operator::Pipe,
                ..
            })
        ) {
            self.lex()?;
            commands.push(self.parse_command()?);
        }

        Ok(ast::Pipeline {
            commands,
            negate,
            pipefail: self.pipefail,
        })
    }

    fn parse_command(&mut self) -> Result<ast::Command, ParseError> {
        let first = match self.lex()? {
            None => return Err(ParseError::EmptyCommand),
            Some(token) => {
                to_argument(token).map_err(|t| ParseError::UnexpectedToken(t.to_string()))?
            }
        };

        let mut args = vec![first];
        let mut redirects = vec![];

        loop {
            match self.look()? {
                None => break,
                Some(Token::Operator { op, .. }) if op.is_command_terminator() => break,
                _ => (),
            }

            let Some(token) = self.lex()? else {
                break;
            };

            match token {
                Token::Operator { op, fd } if op.is_redirection() => {
                    let target = self
                        .lex()?
                        .and_then(|t| to_argument(t).ok())
                        .ok_or_else(|| ParseError::MissingRedirectionTarget(op.to_string()))?;

                    redirects.push(ast::Redirect { op, fd, target });
                }
                token => {
                    args.push(
                        to_argument(token)
                            .map_err(|t| ParseError::UnexpectedToken(t.to_string()))?,
                    );
                }
            }
        }

        Ok(ast::Command { args, redirects })
    }
}

/// Converts a word-like token into an argument; a standalone `!` is an ordinary word outside of
/// pipeline-leading position.
fn to_argument(token: Token) -> Result<Argument, Token> {
    match token {
        Token::Word(s) => Ok(Argument::Word(s)),
        Token::Glob(s) => Ok(Argument::Glob(s)),
        Token::Operator {
            op: Operator::Bang,
            fd: None,
        } => Ok(Argument::Word(String::from("!"))),
        token => Err(token),
    }
}

/// Parses the given command line.
///
/// # Arguments
///
/// * `input` - The command line to parse.
/// * `options` - The options to use when parsing.
pub fn parse_str(input: &str, options: &ParserOptions) -> Result<ShellCommand, ParseError> {
    tracing::debug!(target: "parse", "parsing: '{input}'");
    Parser::new(input, options).parse()
}
