//! Expression parser using Pratt parsing (precedence climbing).
//!
//! ## Precedence Levels (lowest to highest)
//!
//! 1. `?:` (Conditional) - right associative
//! 2. `||` (Or) - left associative
//! 3. `&&` (And) - left associative
//! 4. `==`, `!=` (Equality) - left associative
//! 5. `<`, `<=`, `>`, `>=` (Relational) - left associative
//! 6. `+`, `-` (Additive) - left associative
//! 7. `*`, `/`, `%` (Multiplicative) - left associative
//! 8. Unary `-`, `!` - prefix
//! 9. Postfix: `.field`, `(args)` - left associative

use tally_lexer::Token;

use super::{ParseError, TokenStream};
use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};

/// Get binary operator metadata: (precedence, operator). All binary
/// operators are left associative.
fn binary_op_info(token: &Token) -> Option<(u8, BinaryOp)> {
    match token {
        Token::OrOr => Some((10, BinaryOp::Or)),
        Token::AndAnd => Some((20, BinaryOp::And)),
        Token::EqEq => Some((30, BinaryOp::Eq)),
        Token::BangEq => Some((30, BinaryOp::Ne)),
        Token::Lt => Some((35, BinaryOp::Lt)),
        Token::LtEq => Some((35, BinaryOp::Le)),
        Token::Gt => Some((35, BinaryOp::Gt)),
        Token::GtEq => Some((35, BinaryOp::Ge)),
        Token::Plus => Some((40, BinaryOp::Add)),
        Token::Minus => Some((40, BinaryOp::Sub)),
        Token::Star => Some((50, BinaryOp::Mul)),
        Token::Slash => Some((50, BinaryOp::Div)),
        Token::Percent => Some((50, BinaryOp::Rem)),
        _ => None,
    }
}

/// Parse a full expression, including the conditional operator.
pub(super) fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    stream.descend()?;
    let expr = parse_conditional(stream);
    stream.ascend(1);
    expr
}

fn parse_conditional(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let condition = parse_pratt(stream, 0)?;

    if !stream.eat(&Token::Question) {
        return Ok(condition);
    }
    let then = parse_expr(stream)?;
    stream.expect(Token::Colon)?;
    let otherwise = parse_expr(stream)?;

    Ok(Expr::new(
        ExprKind::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
        stream.span_from(start),
    ))
}

/// Pratt parser - handles binary operators with precedence climbing.
fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let mut left = parse_prefix(stream)?;
    // Each folded operator deepens the left spine by one node.
    let mut nested = 0;

    while let Some((prec, op)) = stream.peek().and_then(binary_op_info) {
        if prec < min_prec {
            break;
        }
        stream.descend()?;
        nested += 1;
        stream.advance();

        let right = parse_pratt(stream, prec + 1)?;
        left = Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            stream.span_from(start),
        );
    }

    stream.ascend(nested);
    Ok(left)
}

/// Parse prefix expressions (unary operators, then postfix chains).
fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let op = match stream.peek() {
        Some(Token::Minus) => UnaryOp::Neg,
        Some(Token::Bang) => UnaryOp::Not,
        _ => return parse_postfix(stream),
    };
    let start = stream.current_pos();
    stream.descend()?;
    stream.advance();

    let operand = parse_prefix(stream)?;
    stream.ascend(1);
    let span = stream.span_from(start);

    // Fold negative numeric literals
    let kind = match (op, operand.kind) {
        (UnaryOp::Neg, ExprKind::Integer(n)) => ExprKind::Integer(-n),
        (UnaryOp::Neg, ExprKind::Float(x)) => ExprKind::Float(-x),
        (op, kind) => ExprKind::Unary {
            op,
            operand: Box::new(Expr::new(kind, operand.span)),
        },
    };
    Ok(Expr::new(kind, span))
}

/// Parse postfix expressions (field access and calls).
fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let mut expr = parse_atom(stream)?;
    let mut nested = 0;

    loop {
        match stream.peek() {
            Some(Token::Dot) => {
                stream.descend()?;
                nested += 1;
                stream.advance();
                let span = stream.current_span();
                let field = match stream.advance() {
                    Some(Token::Ident(name)) => name.to_string(),
                    other => {
                        return Err(ParseError::unexpected_token(other, "after `.`", span));
                    }
                };
                expr = Expr::new(
                    ExprKind::Field {
                        object: Box::new(expr),
                        field,
                    },
                    stream.span_from(start),
                );
            }
            Some(Token::LParen) => {
                let function = expr.as_path().ok_or_else(|| {
                    ParseError::invalid_syntax("only named functions can be called", expr.span)
                })?;
                stream.descend()?;
                nested += 1;
                let args = parse_call_args(stream)?;
                expr = Expr::new(ExprKind::Call { function, args }, stream.span_from(start));
            }
            _ => break,
        }
    }

    stream.ascend(nested);
    Ok(expr)
}

/// Parse function call arguments.
fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<Expr>, ParseError> {
    stream.expect(Token::LParen)?;

    let mut args = Vec::new();
    while !stream.check(&Token::RParen) {
        args.push(parse_expr(stream)?);

        if !stream.check(&Token::RParen) {
            stream.expect(Token::Comma)?;
        }
    }

    stream.expect(Token::RParen)?;
    Ok(args)
}

/// Parse atomic expressions (literals, identifiers, parenthesized).
fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let span = stream.current_span();

    let token = stream.advance().cloned();
    let kind = match token {
        Some(Token::True) => ExprKind::Bool(true),
        Some(Token::False) => ExprKind::Bool(false),
        Some(Token::Null) => ExprKind::Null,
        Some(Token::Integer(n)) => ExprKind::Integer(n),
        Some(Token::Float(x)) => ExprKind::Float(x),
        Some(Token::String(s)) => ExprKind::Text(s.to_string()),
        Some(Token::Ident(name)) => ExprKind::Ident(name.to_string()),
        Some(Token::LParen) => {
            let inner = parse_expr(stream)?;
            stream.expect(Token::RParen)?;
            return Ok(Expr::new(inner.kind, stream.span_from(start)));
        }
        other => {
            return Err(ParseError::unexpected_token(
                other.as_ref(),
                "in expression",
                span,
            ));
        }
    };

    Ok(Expr::new(kind, stream.span_from(start)))
}
