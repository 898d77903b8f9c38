use std::collections::HashSet;
use std::fmt::Display;

use tracing_subscriber::{Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

/// Type of event to trace.
#[derive(Clone, Debug, Eq, Hash, PartialEq, clap::ValueEnum)]
pub enum TraceEvent {
    /// Traces command execution.
    #[clap(name = "commands")]
    Commands,
    /// Traces configuration loading.
    #[clap(name = "config")]
    Config,
    /// Traces parsing of test directives.
    #[clap(name = "directives")]
    Directives,
    /// Traces suite and test discovery.
    #[clap(name = "discovery")]
    Discovery,
    /// Traces dispatching of tests to workers.
    #[clap(name = "dispatch")]
    Dispatch,
    /// Traces the process of parsing tokens into an abstract syntax tree.
    #[clap(name = "parse")]
    Parse,
    /// Traces the process of tokenizing input text.
    #[clap(name = "tokenize")]
    Tokenize,
}

impl Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.target())
    }
}

impl TraceEvent {
    /// Returns the tracing target the event is logged under.
    const fn target(&self) -> &'static str {
        match self {
            Self::Commands => "commands",
            Self::Config => "config",
            Self::Directives => "directives",
            Self::Discovery => "discovery",
            Self::Dispatch => "dispatch",
            Self::Parse => "parse",
            Self::Tokenize => "tokenize",
        }
    }
}

/// Installs a subscriber writing to stderr.
///
/// # Arguments
///
/// * `enabled_events` - Classes of events logged at debug level.
/// * `quiet` - Whether only warnings and errors are logged otherwise.
pub(crate) fn init(enabled_events: &[TraceEvent], quiet: bool) {
    let enabled: HashSet<&TraceEvent> = enabled_events.iter().collect();

    let default_level = if quiet {
        tracing_subscriber::filter::LevelFilter::WARN
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };

    let filter = Targets::new().with_default(default_level).with_targets(
        enabled
            .into_iter()
            .map(|event| (event.target(), tracing::Level::DEBUG)),
    );

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(filter);

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        // Something went wrong; proceed on anyway but complain audibly.
        eprintln!("warning: failed to initialize tracing.");
    }
}
