//! Parser and evaluator for boolean feature expressions, e.g. `linux && !(asan || msan)`.
//!
//! An identifier evaluates to true if it is the literal `true`, names an available feature,
//! or appears anywhere within the target triple.

use std::collections::BTreeSet;
use std::fmt::Display;

/// Represents an error that occurred while parsing a boolean expression.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{message}\nin expression: '{expression}'")]
pub struct BooleanExpressionError {
    /// Description of the problem.
    pub message: String,
    /// The full expression being parsed.
    pub expression: String,
}

/// A parsed boolean expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BooleanExpression {
    /// A feature name, target-triple fragment, or the literal `true`.
    Identifier(String),
    /// Logical negation.
    Not(Box<BooleanExpression>),
    /// Logical conjunction.
    And(Box<BooleanExpression>, Box<BooleanExpression>),
    /// Logical disjunction.
    Or(Box<BooleanExpression>, Box<BooleanExpression>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ExprToken<'a> {
    LeftParen,
    RightParen,
    And,
    Or,
    Not,
    Identifier(&'a str),
    End,
}

impl Display for ExprToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeftParen => f.write_str("'('"),
            Self::RightParen => f.write_str("')'"),
            Self::And => f.write_str("'&&'"),
            Self::Or => f.write_str("'||'"),
            Self::Not => f.write_str("'!'"),
            Self::Identifier(s) => write!(f, "'{s}'"),
            Self::End => f.write_str("<end of expression>"),
        }
    }
}

const fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '=' | '.' | '_')
}

fn tokenize(expr: &str) -> Result<Vec<ExprToken<'_>>, String> {
    let mut tokens = vec![];
    let mut rest = expr;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            tokens.push(ExprToken::End);
            return Ok(tokens);
        }

        let (token, len) = if rest.starts_with("&&") {
            (ExprToken::And, 2)
        } else if rest.starts_with("||") {
            (ExprToken::Or, 2)
        } else if rest.starts_with('(') {
            (ExprToken::LeftParen, 1)
        } else if rest.starts_with(')') {
            (ExprToken::RightParen, 1)
        } else if rest.starts_with('!') {
            (ExprToken::Not, 1)
        } else {
            let len = rest
                .find(|c: char| !is_identifier_char(c))
                .unwrap_or(rest.len());
            if len == 0 {
                return Err(format!("couldn't parse text: '{rest}'"));
            }
            (ExprToken::Identifier(&rest[..len]), len)
        };

        tokens.push(token);
        rest = &rest[len..];
    }
}

struct ExpressionParser<'a> {
    tokens: Vec<ExprToken<'a>>,
    pos: usize,
}

impl ExpressionParser<'_> {
    fn token(&self) -> &ExprToken<'_> {
        self.tokens.get(self.pos).unwrap_or(&ExprToken::End)
    }

    fn accept(&mut self, expected: &ExprToken<'_>) -> bool {
        if self.token() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &ExprToken<'_>) -> Result<(), String> {
        if self.token() == expected {
            if *expected != ExprToken::End {
                self.pos += 1;
            }
            Ok(())
        } else {
            Err(format!("expected: {expected}\nhave: {}", self.token()))
        }
    }

    fn parse_all(&mut self) -> Result<BooleanExpression, String> {
        let expr = self.parse_or()?;
        self.expect(&ExprToken::End)?;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<BooleanExpression, String> {
        let mut lhs = self.parse_and()?;
        while self.accept(&ExprToken::Or) {
            let rhs = self.parse_and()?;
            lhs = BooleanExpression::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<BooleanExpression, String> {
        let mut lhs = self.parse_not()?;
        while self.accept(&ExprToken::And) {
            let rhs = self.parse_not()?;
            lhs = BooleanExpression::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<BooleanExpression, String> {
        if self.accept(&ExprToken::Not) {
            Ok(BooleanExpression::Not(Box::new(self.parse_not()?)))
        } else if self.accept(&ExprToken::LeftParen) {
            let expr = self.parse_or()?;
            self.expect(&ExprToken::RightParen)?;
            Ok(expr)
        } else if let ExprToken::Identifier(name) = self.token() {
            let name = (*name).to_owned();
            self.pos += 1;
            Ok(BooleanExpression::Identifier(name))
        } else {
            Err(format!(
                "expected: '!' or '(' or identifier\nhave: {}",
                self.token()
            ))
        }
    }
}

impl BooleanExpression {
    /// Parses the given expression text.
    ///
    /// # Arguments
    ///
    /// * `expr` - The expression to parse.
    pub fn parse(expr: &str) -> Result<Self, BooleanExpressionError> {
        let to_error = |message| BooleanExpressionError {
            message,
            expression: expr.to_owned(),
        };

        let tokens = tokenize(expr).map_err(to_error)?;
        let mut parser = ExpressionParser { tokens, pos: 0 };
        parser.parse_all().map_err(to_error)
    }

    /// Evaluates the expression against a feature set and target triple.
    ///
    /// # Arguments
    ///
    /// * `features` - The available features.
    /// * `triple` - The target triple; identifiers match any substring of it.
    pub fn evaluate(&self, features: &BTreeSet<String>, triple: &str) -> bool {
        match self {
            Self::Identifier(name) => {
                name == "true" || features.contains(name) || triple.contains(name.as_str())
            }
            Self::Not(inner) => !inner.evaluate(features, triple),
            Self::And(lhs, rhs) => lhs.evaluate(features, triple) && rhs.evaluate(features, triple),
            Self::Or(lhs, rhs) => lhs.evaluate(features, triple) || rhs.evaluate(features, triple),
        }
    }

    /// Parses and evaluates the given expression text.
    ///
    /// # Arguments
    ///
    /// * `expr` - The expression to evaluate.
    /// * `features` - The available features.
    /// * `triple` - The target triple.
    pub fn evaluate_str(
        expr: &str,
        features: &BTreeSet<String>,
        triple: &str,
    ) -> Result<bool, BooleanExpressionError> {
        Ok(Self::parse(expr)?.evaluate(features, triple))
    }

    /// Checks that the given expression text is well-formed.
    pub fn check_syntax(expr: &str) -> Result<(), BooleanExpressionError> {
        Self::parse(expr).map(|_| ())
    }
}
