//! Statement parser.
//!
//! Statements are keyword-dispatched; assignments and typed declarations are
//! recognized with two tokens of lookahead (`name =`, `Type name =`).

use tally_lexer::Token;

use super::expr::parse_expr;
use super::{ParseError, TokenStream};
use crate::ast::{AssignOp, Stmt};

/// Parse statements until end of input.
pub(super) fn parse_statements(stream: &mut TokenStream) -> Result<Vec<Stmt>, ParseError> {
    let mut statements = Vec::new();
    while !stream.at_end() {
        if stream.eat(&Token::Semicolon) {
            continue;
        }
        statements.push(parse_statement(stream)?);
    }
    Ok(statements)
}

/// Statement forms distinguished by lookahead.
enum Form {
    If,
    Var,
    Return,
    Assign,
    TypedDeclaration,
    Expr,
}

fn statement_form(stream: &TokenStream) -> Form {
    match (stream.peek(), stream.peek_nth(1), stream.peek_nth(2)) {
        (Some(Token::If), _, _) => Form::If,
        (Some(Token::Var), _, _) => Form::Var,
        (Some(Token::Return), _, _) => Form::Return,
        (Some(Token::Ident(_)), Some(Token::Eq | Token::PlusEq | Token::MinusEq), _) => {
            Form::Assign
        }
        (Some(Token::Ident(_)), Some(Token::Ident(_)), Some(Token::Eq | Token::Semicolon)) => {
            Form::TypedDeclaration
        }
        _ => Form::Expr,
    }
}

fn parse_statement(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    match statement_form(stream) {
        Form::If => parse_if(stream),
        Form::Var => parse_var(stream),
        Form::Return => parse_return(stream),
        Form::Assign => parse_assign(stream),
        Form::TypedDeclaration => parse_typed_declaration(stream),
        Form::Expr => {
            let expr = parse_expr(stream)?;
            end_statement(stream)?;
            Ok(Stmt::Expr(expr))
        }
    }
}

/// A statement ends with `;`, which may be omitted before `}` or end of input.
fn end_statement(stream: &mut TokenStream) -> Result<(), ParseError> {
    if stream.eat(&Token::Semicolon) || stream.at_end() || stream.check(&Token::RBrace) {
        Ok(())
    } else {
        stream.expect(Token::Semicolon).map(|_| ())
    }
}

fn expect_ident(stream: &mut TokenStream, context: &str) -> Result<String, ParseError> {
    let span = stream.current_span();
    match stream.advance() {
        Some(Token::Ident(name)) => Ok(name.to_string()),
        other => Err(ParseError::unexpected_token(other, context, span)),
    }
}

/// `var name [= value];`
fn parse_var(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Var)?;
    let name = expect_ident(stream, "after `var`")?;
    let value = if stream.eat(&Token::Eq) {
        Some(parse_expr(stream)?)
    } else {
        None
    };
    let span = stream.span_from(start);
    end_statement(stream)?;
    Ok(Stmt::Declare {
        name,
        ty: None,
        value,
        span,
    })
}

/// `Type name [= value];`
fn parse_typed_declaration(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    let ty = expect_ident(stream, "as declaration type")?;
    let name = expect_ident(stream, "as declared name")?;
    let value = if stream.eat(&Token::Eq) {
        Some(parse_expr(stream)?)
    } else {
        None
    };
    let span = stream.span_from(start);
    end_statement(stream)?;
    Ok(Stmt::Declare {
        name,
        ty: Some(ty),
        value,
        span,
    })
}

/// `name = value;`, `name += value;`, `name -= value;`
fn parse_assign(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    let target = expect_ident(stream, "as assignment target")?;
    let op = match stream.advance() {
        Some(Token::PlusEq) => AssignOp::Add,
        Some(Token::MinusEq) => AssignOp::Sub,
        _ => AssignOp::Set,
    };
    let value = parse_expr(stream)?;
    let span = stream.span_from(start);
    end_statement(stream)?;
    Ok(Stmt::Assign {
        target,
        op,
        value,
        span,
    })
}

/// `return [value];`
fn parse_return(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    stream.expect(Token::Return)?;
    let value = if stream.at_end() || stream.check(&Token::Semicolon) || stream.check(&Token::RBrace) {
        None
    } else {
        Some(parse_expr(stream)?)
    };
    end_statement(stream)?;
    Ok(Stmt::Return(value))
}

/// `if (condition) body [else body]`, where a body is a block or a single
/// statement and `else if` chains nest.
fn parse_if(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    stream.expect(Token::If)?;
    stream.expect(Token::LParen)?;
    let condition = parse_expr(stream)?;
    stream.expect(Token::RParen)?;

    let then_block = parse_body(stream)?;
    let else_block = if stream.eat(&Token::Else) {
        Some(parse_body(stream)?)
    } else {
        None
    };

    Ok(Stmt::If {
        condition,
        then_block,
        else_block,
    })
}

fn parse_body(stream: &mut TokenStream) -> Result<Vec<Stmt>, ParseError> {
    stream.descend()?;
    let body = parse_block(stream);
    stream.ascend(1);
    body
}

fn parse_block(stream: &mut TokenStream) -> Result<Vec<Stmt>, ParseError> {
    if !stream.eat(&Token::LBrace) {
        return Ok(vec![parse_statement(stream)?]);
    }

    let mut statements = Vec::new();
    loop {
        match stream.peek() {
            Some(Token::RBrace) => {
                stream.advance();
                return Ok(statements);
            }
            Some(Token::Semicolon) => {
                stream.advance();
            }
            Some(_) => statements.push(parse_statement(stream)?),
            None => {
                return Err(ParseError::expected_token(
                    Token::RBrace,
                    None,
                    stream.current_span(),
                ))
            }
        }
    }
}
