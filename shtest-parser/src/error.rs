use crate::tokenizer::TokenizerError;

/// Represents an error that occurred while parsing a command line.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A command was expected but the input ended.
    #[error("empty command")]
    EmptyCommand,

    /// A command started with an operator.
    #[error("syntax error near unexpected token '{0}'")]
    UnexpectedToken(String),

    /// A redirection operator was not followed by a word.
    #[error("syntax error near token '{0}'")]
    MissingRedirectionTarget(String),

    /// A sequence operator was not followed by a command.
    #[error("missing argument to operator '{0}'")]
    MissingOperatorArgument(String),

    /// An error occurred while tokenizing the input.
    #[error(transparent)]
    Tokenizing(#[from] TokenizerError),
}
