use clap::Parser;

use crate::builtins::{self, BuiltinContext, ExitCode};
use crate::error;

/// Echo text to standard output.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct EchoCommand {
    /// Suppress the trailing newline from the output.
    #[arg(short = 'n')]
    no_trailing_newline: bool,

    /// Interpret backslash escapes in the provided text.
    #[arg(short = 'e')]
    interpret_backslash_escapes: bool,

    /// Tokens to echo to standard output.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl builtins::Command for EchoCommand {
    /// Override the default [`builtins::Command::new`] function: only leading `-n` and `-e`
    /// words are options, and anything else (including unknown flags) is echoed as-is.
    fn new<I>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = String>,
    {
        let mut this = Self {
            no_trailing_newline: false,
            interpret_backslash_escapes: false,
            args: vec![],
        };

        let mut args = args.into_iter().skip(1).peekable();
        while let Some(arg) = args.next_if(|a| a == "-n" || a == "-e") {
            if arg == "-n" {
                this.no_trailing_newline = true;
            } else {
                this.interpret_backslash_escapes = true;
            }
        }

        this.args.extend(args);
        Ok(this)
    }

    fn execute(&self, context: &mut BuiltinContext<'_>) -> Result<ExitCode, error::Error> {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                context.stdout.push(b' ');
            }

            if self.interpret_backslash_escapes {
                context.stdout.extend(expand_backslash_escapes(arg));
            } else {
                context.stdout.extend_from_slice(arg.as_bytes());
            }
        }

        if !self.no_trailing_newline {
            context.stdout.push(b'\n');
        }

        Ok(ExitCode::Success)
    }
}

/// Expands the backslash escapes recognized by `echo -e`. Unrecognized escapes are kept
/// verbatim.
fn expand_backslash_escapes(s: &str) -> Vec<u8> {
    let mut result = vec![];
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0; 4];
            result.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        match chars.next() {
            Some('a') => result.push(0x07),
            Some('b') => result.push(0x08),
            Some('f') => result.push(0x0c),
            Some('n') => result.push(b'\n'),
            Some('r') => result.push(b'\r'),
            Some('t') => result.push(b'\t'),
            Some('v') => result.push(0x0b),
            Some('\\') => result.push(b'\\'),
            Some('0') => {
                let mut value: u32 = 0;
                for _ in 0..3 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                result.push((value & 0xff) as u8);
            }
            Some('x') => {
                let mut value: u32 = 0;
                let mut digits = 0;
                while digits < 2 {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }

                if digits == 0 {
                    result.extend_from_slice(b"\\x");
                } else {
                    result.push((value & 0xff) as u8);
                }
            }
            Some(other) => {
                result.push(b'\\');
                let mut buf = [0; 4];
                result.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => result.push(b'\\'),
        }
    }

    result
}
