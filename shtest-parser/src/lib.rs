//! Implements a tokenizer and parsers for the small shell subset used by test scripts, along
//! with the boolean feature-expression language used to gate tests.

pub mod ast;
pub mod boolexpr;

mod error;
mod parser;
mod tokenizer;

pub use error::ParseError;
pub use parser::{Parser, ParserOptions, parse_str};
pub use tokenizer::{Operator, Token, Tokenizer, TokenizerError, tokenize_str};
