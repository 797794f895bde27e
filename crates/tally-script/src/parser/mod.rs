//! Hand-written recursive descent parser for accumulate scripts.
//!
//! ## Architecture
//!
//! - `stream`: TokenStream wrapper with lookahead
//! - `error`: ParseError
//! - `expr`: Expression parser using Pratt parsing
//! - `stmt`: Statement parser (keyword-dispatched)

mod error;
mod expr;
mod stmt;
mod stream;

pub use error::{ParseError, ParseErrorKind};
use stream::TokenStream;

use std::ops::Range;

use tally_lexer::Token;

use crate::ast::{Expr, Script};
use crate::error::ScriptError;

/// Nesting allowed by [`parse_script`] and [`parse_expression`].
///
/// Counts parentheses, operators, postfix chains and `if` bodies along one
/// path of the tree.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 256;

/// Tokenize and parse a whole script.
///
/// Empty (or whitespace-only) source parses to a script with no statements.
pub fn parse_script(source: &str) -> Result<Script, ScriptError> {
    parse_script_with_depth(source, DEFAULT_MAX_NESTING_DEPTH)
}

/// [`parse_script`] with an explicit nesting limit.
pub fn parse_script_with_depth(source: &str, max_depth: usize) -> Result<Script, ScriptError> {
    let tokens = tally_lexer::tokenize(source)?;
    Ok(parse_tokens(&tokens, max_depth)?)
}

/// Parse already tokenized input into a script.
pub fn parse_tokens(tokens: &[(Token, Range<usize>)], max_depth: usize) -> Result<Script, ParseError> {
    let mut stream = TokenStream::new(tokens, max_depth);
    let statements = stmt::parse_statements(&mut stream)?;
    Ok(Script { statements })
}

/// Parse a single expression; trailing tokens are an error.
pub fn parse_expression(source: &str) -> Result<Expr, ScriptError> {
    let tokens = tally_lexer::tokenize(source)?;
    let mut stream = TokenStream::new(&tokens, DEFAULT_MAX_NESTING_DEPTH);
    let expr = expr::parse_expr(&mut stream)?;
    if !stream.at_end() {
        return Err(ParseError::unexpected_token(
            stream.peek(),
            "after expression",
            stream.current_span(),
        )
        .into());
    }
    Ok(expr)
}
