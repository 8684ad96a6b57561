//! Boolean filter expressions compiled into Qdrant filter payloads.
//!
//! Callers filter records with compact expressions such as
//! `lang == "en" and (year >= 2020 or tag in ["a", "b"])`. Identifiers `pk` and `text` address
//! the top-level payload keys; every other identifier addresses a key inside the record's
//! metadata map.
//!
//! Input is lexed and parsed with chumsky in two passes. Nesting is bounded before the grammar
//! runs, so hostile input is rejected instead of exhausting the stack.

use chumsky::error::Rich;
use chumsky::extra;
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use serde_json::{Value, json};
use thiserror::Error;

use super::payload::{METADATA_FIELD, PK_FIELD, TEXT_FIELD};

/// Deepest combination of parentheses and prefix `not` accepted in one expression.
pub const MAX_NESTING: usize = 32;

/// Errors raised while parsing a filter expression.
#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    /// Input ended while more tokens were expected.
    #[error("unexpected end of filter expression")]
    UnexpectedEnd,
    /// A token appeared where the grammar does not allow it.
    #[error("unexpected token '{found}' at position {position}")]
    UnexpectedToken {
        /// Byte offset of the offending token.
        position: usize,
        /// Text of the offending token.
        found: String,
    },
    /// A quoted string literal was never closed.
    #[error("unterminated string literal starting at position {0}")]
    UnterminatedString(usize),
    /// A numeric literal could not be parsed.
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    /// The construct parses but has no Qdrant equivalent.
    #[error("unsupported filter: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Literal {
    fn to_json(&self) -> Value {
        match self {
            Literal::Str(value) => Value::String(value.clone()),
            Literal::Int(value) => json!(value),
            Literal::Float(value) => json!(value),
            Literal::Bool(value) => Value::Bool(*value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Literal),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    // Lexed so the parser can report them with their own error variants.
    Unterminated,
    BadNumber(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        field: String,
        op: CmpOp,
        value: Literal,
    },
    In {
        field: String,
        values: Vec<Literal>,
        negated: bool,
    },
}

enum Rhs {
    Compare(CmpOp, Literal),
    In { values: Vec<Literal>, negated: bool },
}

type LexExtra<'src> = extra::Err<Rich<'src, char>>;
type TokenExtra<'t> = extra::Err<Rich<'t, Token>>;

/// Compile a filter expression into a Qdrant `filter` object.
///
/// Returns `Ok(None)` for empty or whitespace-only input.
pub fn compile_filter(input: &str) -> Result<Option<Value>, ExprError> {
    if input.trim().is_empty() {
        return Ok(None);
    }

    let tokens = lexer()
        .parse(input)
        .into_result()
        .map_err(|errors| lex_error(&errors))?;
    check_tokens(&tokens)?;

    let kinds: Vec<Token> = tokens.iter().map(|(token, _)| token.clone()).collect();
    let expr = expression()
        .parse(kinds.as_slice())
        .into_result()
        .map_err(|errors| parse_error(&errors, &tokens))?;

    let filter = match expr {
        Expr::And(_) | Expr::Or(_) | Expr::Not(_) => to_condition(&expr)?,
        other => json!({ "must": [to_condition(&other)?] }),
    };
    Ok(Some(filter))
}

fn lexer<'src>() -> impl Parser<'src, &'src str, Vec<(Token, SimpleSpan)>, LexExtra<'src>> {
    let string = |quote: char| {
        just(quote)
            .ignore_then(
                choice((just('\\').ignore_then(any()), none_of([quote, '\\'])))
                    .repeated()
                    .collect::<String>(),
            )
            .then(just(quote).or_not())
            .map(|(value, closing)| match closing {
                Some(_) => Token::Literal(Literal::Str(value)),
                None => Token::Unterminated,
            })
    };

    let operator = choice((
        just("==").to(Token::Cmp(CmpOp::Eq)),
        just("!=").to(Token::Cmp(CmpOp::Ne)),
        just(">=").to(Token::Cmp(CmpOp::Ge)),
        just("<=").to(Token::Cmp(CmpOp::Le)),
        just("&&").to(Token::And),
        just("||").to(Token::Or),
        just('=').to(Token::Cmp(CmpOp::Eq)),
        just('!').to(Token::Not),
        just('>').to(Token::Cmp(CmpOp::Gt)),
        just('<').to(Token::Cmp(CmpOp::Lt)),
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('[').to(Token::LBracket),
        just(']').to(Token::RBracket),
        just(',').to(Token::Comma),
    ));

    let number = one_of("-.0123456789")
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
                .repeated(),
        )
        .to_slice()
        .map(|raw: &str| match parse_number(raw) {
            Some(literal) => Token::Literal(literal),
            None => Token::BadNumber(raw.to_string()),
        });

    let word = any()
        .filter(|c: &char| c.is_alphabetic() || matches!(c, '_' | '$'))
        .then(
            any()
                .filter(|c: &char| c.is_alphanumeric() || matches!(c, '_' | '.' | '$'))
                .repeated(),
        )
        .to_slice()
        .map(|word: &str| match word.to_ascii_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            "true" => Token::Literal(Literal::Bool(true)),
            "false" => Token::Literal(Literal::Bool(false)),
            _ => Token::Ident(word.to_string()),
        });

    choice((string('"'), string('\''), operator, number, word))
        .map_with(|token, e| (token, e.span()))
        .padded()
        .repeated()
        .collect()
        .then_ignore(end())
}

fn expression<'t>() -> impl Parser<'t, &'t [Token], Expr, TokenExtra<'t>> {
    let field = select! { Token::Ident(name) => name };
    let literal = select! { Token::Literal(value) => value };
    let list = literal
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    let comparison = field
        .then(choice((
            select! { Token::Cmp(op) => op }
                .then(literal)
                .map(|(op, value)| Rhs::Compare(op, value)),
            just(Token::In)
                .ignore_then(list.clone())
                .map(|values| Rhs::In { values, negated: false }),
            just(Token::Not)
                .ignore_then(just(Token::In))
                .ignore_then(list)
                .map(|values| Rhs::In { values, negated: true }),
        )))
        .map(|(field, rhs)| match rhs {
            Rhs::Compare(op, value) => Expr::Compare { field, op, value },
            Rhs::In { values, negated } => Expr::In {
                field,
                values,
                negated,
            },
        });

    recursive(|expr| {
        let atom = expr
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .or(comparison);
        let unary = just(Token::Not)
            .repeated()
            .foldr(atom, |_, inner| Expr::Not(Box::new(inner)));
        let conjunction = unary
            .separated_by(just(Token::And))
            .at_least(1)
            .collect::<Vec<_>>()
            .map(|items| collapse(items, Expr::And));
        conjunction
            .separated_by(just(Token::Or))
            .at_least(1)
            .collect::<Vec<_>>()
            .map(|items| collapse(items, Expr::Or))
    })
    .then_ignore(end())
}

/// Surface lexing problems and reject input nested past [`MAX_NESTING`].
fn check_tokens(tokens: &[(Token, SimpleSpan)]) -> Result<(), ExprError> {
    let mut open = 0usize;
    let mut prefix = 0usize;
    for (token, span) in tokens {
        match token {
            Token::Unterminated => return Err(ExprError::UnterminatedString(span.start)),
            Token::BadNumber(raw) => return Err(ExprError::InvalidNumber(raw.clone())),
            Token::LParen => open += 1,
            Token::RParen => open = open.saturating_sub(1),
            Token::Not => prefix += 1,
            _ => prefix = 0,
        }
        if open + prefix > MAX_NESTING {
            return Err(ExprError::Unsupported(format!(
                "expression nests deeper than {MAX_NESTING} levels"
            )));
        }
    }
    Ok(())
}

fn lex_error(errors: &[Rich<'_, char>]) -> ExprError {
    match errors.first().and_then(|error| error.found().map(|ch| (error, ch))) {
        Some((error, ch)) => ExprError::UnexpectedToken {
            position: error.span().start,
            found: ch.to_string(),
        },
        None => ExprError::UnexpectedEnd,
    }
}

fn parse_error(errors: &[Rich<'_, Token>], tokens: &[(Token, SimpleSpan)]) -> ExprError {
    match errors.first().and_then(|error| error.found().map(|token| (error, token))) {
        Some((error, token)) => ExprError::UnexpectedToken {
            position: tokens
                .get(error.span().start)
                .map_or(0, |(_, span)| span.start),
            found: describe(token),
        },
        None => ExprError::UnexpectedEnd,
    }
}

fn payload_key(field: &str) -> String {
    match field {
        PK_FIELD | TEXT_FIELD => field.to_string(),
        other => format!("{METADATA_FIELD}.{other}"),
    }
}

fn to_condition(expr: &Expr) -> Result<Value, ExprError> {
    match expr {
        Expr::And(items) => Ok(json!({ "must": conditions(items)? })),
        Expr::Or(items) => Ok(json!({ "should": conditions(items)? })),
        Expr::Not(inner) => Ok(json!({ "must_not": [to_condition(inner)?] })),
        Expr::Compare { field, op, value } => compare_condition(field, *op, value),
        Expr::In {
            field,
            values,
            negated,
        } => {
            if let Some(bad) = values
                .iter()
                .find(|value| matches!(value, Literal::Float(_) | Literal::Bool(_)))
            {
                return Err(ExprError::Unsupported(format!(
                    "'in' lists only accept strings and integers, found {}",
                    bad.to_json()
                )));
            }
            let list: Vec<Value> = values.iter().map(Literal::to_json).collect();
            let matcher = if *negated { "except" } else { "any" };
            Ok(json!({ "key": payload_key(field), "match": { matcher: list } }))
        }
    }
}

fn conditions(items: &[Expr]) -> Result<Vec<Value>, ExprError> {
    items.iter().map(to_condition).collect()
}

fn compare_condition(field: &str, op: CmpOp, value: &Literal) -> Result<Value, ExprError> {
    let key = payload_key(field);
    let range_key = match op {
        CmpOp::Eq => return Ok(equality_condition(&key, value)),
        CmpOp::Ne => return Ok(json!({ "must_not": [equality_condition(&key, value)] })),
        CmpOp::Gt => "gt",
        CmpOp::Ge => "gte",
        CmpOp::Lt => "lt",
        CmpOp::Le => "lte",
    };

    match value {
        Literal::Int(_) | Literal::Float(_) => {
            Ok(json!({ "key": key, "range": { range_key: value.to_json() } }))
        }
        // Qdrant ranges are numeric only.
        Literal::Str(_) | Literal::Bool(_) => Err(ExprError::Unsupported(format!(
            "range comparison on '{field}' needs a number, found {}",
            value.to_json()
        ))),
    }
}

fn equality_condition(key: &str, value: &Literal) -> Value {
    match value {
        // Qdrant has no exact float match; a closed range is equivalent.
        Literal::Float(number) => json!({ "key": key, "range": { "gte": number, "lte": number } }),
        other => json!({ "key": key, "match": { "value": other.to_json() } }),
    }
}

fn collapse(mut items: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => name.clone(),
        Token::Literal(literal) => literal.to_json().to_string(),
        Token::Cmp(op) => match op {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
        .to_string(),
        Token::And => "and".into(),
        Token::Or => "or".into(),
        Token::Not => "not".into(),
        Token::In => "in".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::LBracket => "[".into(),
        Token::RBracket => "]".into(),
        Token::Comma => ",".into(),
        Token::Unterminated => "unterminated string".into(),
        Token::BadNumber(raw) => raw.clone(),
    }
}

fn parse_number(raw: &str) -> Option<Literal> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(Literal::Int(value));
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(Literal::Float)
}
