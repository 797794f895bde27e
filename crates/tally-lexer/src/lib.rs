// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Lexical analysis for Tally accumulate scripts.
//!
//! Scripts are short C-like statement lists (`total = total + $fact;`) and
//! are tokenized with logos.
//!
//! # Design
//!
//! - `Token` — all script token types (keywords, operators, literals, identifiers)
//! - Comments and whitespace are stripped during lexing (not tokens)
//! - `tokenize` pairs every token with its byte span and reports the first
//!   unrecognized character as a [`LexError`]
//!
//! # Examples
//!
//! ```
//! # use tally_lexer::Token;
//! # use logos::Logos;
//! let tokens: Vec<Result<Token, ()>> = Token::lexer("count = count + 1;").collect();
//! assert_eq!(tokens.len(), 6);
//! ```

use logos::Logos;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

/// Script token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")] // Skip whitespace
#[logos(skip r"//[^\n]*")] // Skip // comments
#[logos(skip r"/\*([^*]|\*[^/])*\*/")] // Skip /* */ comments
pub enum Token {
    // === Keywords ===
    /// Keyword `var`
    #[token("var")]
    Var,
    /// Keyword `if`
    #[token("if")]
    If,
    /// Keyword `else`
    #[token("else")]
    Else,
    /// Keyword `return`
    #[token("return")]
    Return,
    /// Literal `true`
    #[token("true")]
    True,
    /// Literal `false`
    #[token("false")]
    False,
    /// Literal `null`
    #[token("null")]
    Null,

    // === Operators ===
    /// Operator `+`
    #[token("+")]
    Plus,
    /// Operator `-`
    #[token("-")]
    Minus,
    /// Operator `*`
    #[token("*")]
    Star,
    /// Operator `/`
    #[token("/")]
    Slash,
    /// Operator `%`
    #[token("%")]
    Percent,
    /// Operator `==`
    #[token("==")]
    EqEq,
    /// Operator `!=`
    #[token("!=")]
    BangEq,
    /// Operator `<`
    #[token("<")]
    Lt,
    /// Operator `<=`
    #[token("<=")]
    LtEq,
    /// Operator `>`
    #[token(">")]
    Gt,
    /// Operator `>=`
    #[token(">=")]
    GtEq,
    /// Operator `&&`
    #[token("&&")]
    AndAnd,
    /// Operator `||`
    #[token("||")]
    OrOr,
    /// Operator `!`
    #[token("!")]
    Bang,
    /// Operator `=`
    #[token("=")]
    Eq,
    /// Operator `+=`
    #[token("+=")]
    PlusEq,
    /// Operator `-=`
    #[token("-=")]
    MinusEq,
    /// Operator `?`
    #[token("?")]
    Question,
    /// Operator `:`
    #[token(":")]
    Colon,

    // === Punctuation ===
    /// `.`
    #[token(".")]
    Dot,
    /// `,`
    #[token(",")]
    Comma,
    /// `;`
    #[token(";")]
    Semicolon,
    /// `(`
    #[token("(")]
    LParen,
    /// `)`
    #[token(")")]
    RParen,
    /// `{`
    #[token("{")]
    LBrace,
    /// `}`
    #[token("}")]
    RBrace,

    // === Literals ===
    /// Integer literal (e.g., 42, 0, 1000)
    ///
    /// Overflowing literals fail the callback and surface as a lexing error.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    /// Float literal (e.g., 3.14, 1.0, 5.67e-8)
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    /// String literal, single or double quoted.
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unquote(lex.slice()))]
    #[regex(r"'([^'\\]|\\.)*'", |lex| unquote(lex.slice()))]
    String(Rc<str>),

    /// Identifier (e.g., total, count, $fact, Math)
    ///
    /// `$` is allowed so pattern bindings such as `$fact` lex as one name.
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| Rc::from(lex.slice()))]
    Ident(Rc<str>),
}

/// Strip the surrounding quotes of a string literal and unescape it.
fn unquote(s: &str) -> Option<Rc<str>> {
    let content = &s[1..s.len() - 1];
    unescape_string(content).map(|s| Rc::from(s.as_str()))
}

/// Unescape a string literal content.
fn unescape_string(s: &str) -> Option<String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                // Unsupported escape or trailing backslash
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

impl Token {
    /// Source text of a fixed token, `None` for literals and identifiers.
    pub fn as_str(&self) -> Option<&'static str> {
        let s = match self {
            Token::Var => "var",
            Token::If => "if",
            Token::Else => "else",
            Token::Return => "return",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::EqEq => "==",
            Token::BangEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Eq => "=",
            Token::PlusEq => "+=",
            Token::MinusEq => "-=",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Integer(_) | Token::Float(_) | Token::String(_) | Token::Ident(_) => {
                return None
            }
        };
        Some(s)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{n}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::String(s) => write!(f, "\"{s}\""),
            Token::Ident(id) => write!(f, "{id}"),
            other => write!(f, "{}", other.as_str().unwrap_or("?")),
        }
    }
}

/// Unrecognized input encountered while tokenizing.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    /// Byte span of the offending input.
    pub span: Range<usize>,
    /// The offending source text.
    pub text: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unrecognized input `{}` at {}..{}",
            self.text, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for LexError {}

/// Tokenize a whole script, pairing each token with its byte span.
///
/// # Errors
///
/// Returns the first span that does not form a valid token.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(LexError {
                    text: source[span.clone()].to_string(),
                    span,
                })
            }
        }
    }
    Ok(tokens)
}
