use std::path::PathBuf;
use std::time::Duration;

/// Monolithic error type for the test engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O error occurred.
    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),

    /// A command line could not be parsed.
    #[error(transparent)]
    ParseError(#[from] shtest_parser::ParseError),

    /// A boolean feature expression could not be parsed.
    #[error(transparent)]
    BooleanExpressionError(#[from] shtest_parser::boolexpr::BooleanExpressionError),

    /// A configuration file could not be loaded.
    #[error("failed to load config file {0}: {1}")]
    InvalidConfigFile(PathBuf, String),

    /// A configuration named a test format that isn't registered.
    #[error("unknown test format: {0}")]
    UnknownTestFormat(String),

    /// Errors were reported while discovering tests.
    #[error("{0} errors found during test discovery")]
    DiscoveryFailed(usize),

    /// A result was set on a test that already has one.
    #[error("test result already set for {0}")]
    ResultAlreadySet(String),

    /// A metric with the given name was already recorded.
    #[error("result already includes metrics for '{0}'")]
    DuplicateMetric(String),

    /// A micro-result with the given name was already recorded.
    #[error("result already includes micro-result for '{0}'")]
    DuplicateMicroResult(String),

    /// A directive could not be registered or parsed.
    #[error("{0}")]
    InvalidDirective(String),

    /// The internal shell rejected a command.
    #[error("{0}")]
    InternalShell(String),

    /// A command uses a feature the internal shell doesn't support.
    #[error("{0}")]
    Unsupported(String),

    /// Command was not found.
    #[error("'{0}': command not found")]
    CommandNotFound(String),

    /// A sequence operator the internal shell doesn't support.
    #[error("unsupported shell operator: '{0}'")]
    UnsupportedOperator(String),

    /// An invalid glob pattern was given.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),

    /// An invalid regular expression was given.
    #[error("invalid regex: {0}")]
    RegexError(#[from] regex::Error),

    /// The overall run deadline elapsed.
    #[error("reached the overall time limit of {0:?}")]
    DeadlineExceeded(Duration),

    /// A threading error occurred.
    #[error("threading error")]
    ThreadingError(#[from] tokio::task::JoinError),
}
