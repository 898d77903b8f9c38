//! Trace utilities

/// Trace category for command execution.
pub const COMMANDS: &str = "commands";
/// Trace category for configuration loading.
pub const CONFIG: &str = "config";
/// Trace category for test-script directives.
pub const DIRECTIVES: &str = "directives";
/// Trace category for suite and test discovery.
pub const DISCOVERY: &str = "discovery";
/// Trace category for dispatching tests to workers.
pub const DISPATCH: &str = "dispatch";
