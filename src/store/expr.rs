//! Document Expressions
//!
//! A small subset of AQL expressions, enough for the in-memory store to
//! evaluate the filter, date and value snippets of a compiled plan.
//!
//! # Supported Syntax
//!
//! ```text
//! doc.a.b   doc["a"]   doc.list[0]          attribute paths
//! 12  1.5  'text'  "text"  true  null  [1, 2]   literals
//! + - * / %                                  arithmetic
//! == != < <= > >=   IN   NOT IN              comparison
//! AND OR NOT   && || !                       logic
//! LOWER UPPER LENGTH TO_NUMBER FLOOR CEIL ROUND ABS
//! DATE_TIMESTAMP CONCAT CONTAINS             functions
//! ```
//!
//! # Examples
//!
//! ```text
//! doc.status >= 500 AND doc.country IN ['de', 'fr']
//! DATE_TIMESTAMP(doc.created) + 3600000
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{map, map_opt, not, opt, peek, recognize, value, verify},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::{Number, Value};
use std::cmp::Ordering;

use crate::catalog::{compare_values, number_value as number};
use crate::store::error::{StoreError, StoreResult};
use crate::template::Bindings;

/// Functions the evaluator knows
const FUNCTIONS: [&str; 11] = [
    "LOWER",
    "UPPER",
    "LENGTH",
    "TO_NUMBER",
    "FLOOR",
    "CEIL",
    "ROUND",
    "ABS",
    "DATE_TIMESTAMP",
    "CONCAT",
    "CONTAINS",
];

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value
    Literal(Value),
    /// Array constructor
    Array(Vec<Expr>),
    /// Variable with attribute/index accesses
    Path { root: String, steps: Vec<Step> },
    /// Function call (name upper-cased)
    Call { name: String, args: Vec<Expr> },
    /// `NOT x` or `-x`
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// One access step in an attribute path
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// `.name`
    Key(String),
    /// `[expr]`
    Index(Expr),
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Parse an expression string
pub fn parse_expression(input: &str) -> StoreResult<Expr> {
    match delimited(multispace0, parse_or, multispace0)(input) {
        Ok(("", expr)) => Ok(expr),
        Ok((remaining, _)) => Err(StoreError::Expression(format!(
            "Unexpected input in '{}' at '{}'",
            input, remaining
        ))),
        Err(e) => Err(StoreError::Expression(format!(
            "Cannot parse '{}': {:?}",
            input, e
        ))),
    }
}

// ============================================
// Parser
// ============================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Match a keyword that is not a prefix of a longer identifier
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| terminated(tag_no_case(kw), not(peek(satisfy(is_ident_char))))(input)
}

/// Left-associative chain of `operand (op operand)*`
fn fold_binary<'a>(
    mut input: &'a str,
    first: Expr,
    mut op: impl FnMut(&'a str) -> IResult<&'a str, BinaryOp>,
    mut operand: impl FnMut(&'a str) -> IResult<&'a str, Expr>,
) -> IResult<&'a str, Expr> {
    let mut acc = first;

    loop {
        let (rest, _) = multispace0(input)?;
        match op(rest) {
            Ok((rest, bin)) => {
                let (rest, _) = multispace0(rest)?;
                let (rest, rhs) = operand(rest)?;
                acc = Expr::Binary(bin, Box::new(acc), Box::new(rhs));
                input = rest;
            }
            Err(nom::Err::Error(_)) => return Ok((input, acc)),
            Err(e) => return Err(e),
        }
    }
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    fold_binary(
        input,
        first,
        value(BinaryOp::Or, alt((keyword("OR"), tag("||")))),
        parse_and,
    )
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_not(input)?;
    fold_binary(
        input,
        first,
        value(BinaryOp::And, alt((keyword("AND"), tag("&&")))),
        parse_not,
    )
}

fn parse_not(input: &str) -> IResult<&str, Expr> {
    let negated = preceded(
        pair(alt((keyword("NOT"), tag("!"))), multispace0),
        parse_not,
    )(input);

    match negated {
        Ok((input, inner)) => Ok((input, Expr::Unary(UnaryOp::Not, Box::new(inner)))),
        Err(nom::Err::Error(_)) => parse_comparison(input),
        Err(e) => Err(e),
    }
}

fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = parse_additive(input)?;
    let (rest, _) = multispace0(input)?;

    match parse_comparison_op(rest) {
        Ok((rest, op)) => {
            let (rest, _) = multispace0(rest)?;
            let (rest, rhs) = parse_additive(rest)?;
            Ok((rest, Expr::Binary(op, Box::new(lhs), Box::new(rhs))))
        }
        Err(nom::Err::Error(_)) => Ok((input, lhs)),
        Err(e) => Err(e),
    }
}

fn parse_comparison_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
        value(
            BinaryOp::NotIn,
            tuple((keyword("NOT"), multispace1, keyword("IN"))),
        ),
        value(BinaryOp::In, keyword("IN")),
    ))(input)
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_multiplicative(input)?;
    fold_binary(
        input,
        first,
        alt((
            value(BinaryOp::Add, char('+')),
            value(BinaryOp::Sub, char('-')),
        )),
        parse_multiplicative,
    )
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input)?;
    fold_binary(
        input,
        first,
        alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
            value(BinaryOp::Mod, char('%')),
        )),
        parse_unary,
    )
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(pair(char('-'), multispace0), parse_unary),
            |inner| Expr::Unary(UnaryOp::Neg, Box::new(inner)),
        ),
        parse_primary,
    ))(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    alt((
        parse_number,
        map(parse_quoted_string, |s| Expr::Literal(Value::String(s))),
        parse_array,
        delimited(
            pair(char('('), multispace0),
            parse_or,
            pair(multispace0, char(')')),
        ),
        value(Expr::Literal(Value::Bool(true)), keyword("true")),
        value(Expr::Literal(Value::Bool(false)), keyword("false")),
        value(Expr::Literal(Value::Null), keyword("null")),
        parse_call,
        parse_path,
    ))(input)
}

/// Parse a number literal, keeping integers integral
fn parse_number(input: &str) -> IResult<&str, Expr> {
    map_opt(
        recognize(tuple((
            digit1,
            opt(pair(char('.'), digit1)),
            opt(tuple((
                alt((char('e'), char('E'))),
                opt(alt((char('+'), char('-')))),
                digit1,
            ))),
        ))),
        |s: &str| {
            let parsed = match s.parse::<i64>() {
                Ok(n) => Number::from(n),
                Err(_) => Number::from_f64(s.parse::<f64>().ok()?)?,
            };
            Some(Expr::Literal(Value::Number(parsed)))
        },
    )(input)
}

/// Parse a single- or double-quoted string with backslash escapes
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let quote = match input.chars().next() {
        Some(c @ ('\'' | '"')) => c,
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Char))),
    };

    let mut out = String::new();
    let mut chars = input[1..].char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((&input[i + 2..], out)),
            c => out.push(c),
        }
    }

    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

fn parse_array(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            pair(char('['), multispace0),
            separated_list0(delimited(multispace0, char(','), multispace0), parse_or),
            pair(multispace0, char(']')),
        ),
        Expr::Array,
    )(input)
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn parse_call(input: &str) -> IResult<&str, Expr> {
    let (input, name) = verify(parse_identifier, |name: &str| {
        FUNCTIONS.contains(&name.to_uppercase().as_str())
    })(input)?;
    let (input, _) = multispace0(input)?;
    let (input, args) = delimited(
        pair(char('('), multispace0),
        separated_list0(delimited(multispace0, char(','), multispace0), parse_or),
        pair(multispace0, char(')')),
    )(input)?;

    Ok((
        input,
        Expr::Call {
            name: name.to_uppercase(),
            args,
        },
    ))
}

fn parse_path(input: &str) -> IResult<&str, Expr> {
    let (input, root) = parse_identifier(input)?;
    let (input, steps) = many0(alt((
        map(preceded(char('.'), take_while1(is_ident_char)), |key: &str| {
            Step::Key(key.to_string())
        }),
        map(
            delimited(
                pair(char('['), multispace0),
                parse_or,
                pair(multispace0, char(']')),
            ),
            Step::Index,
        ),
    )))(input)?;

    Ok((
        input,
        Expr::Path {
            root: root.to_string(),
            steps,
        },
    ))
}

// ============================================
// Evaluation
// ============================================

impl Expr {
    /// Evaluate against variables such as `doc`
    ///
    /// Missing attributes and type mismatches evaluate to `null`, as in AQL.
    pub fn eval(&self, scope: &Bindings) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Array(items) => Value::Array(items.iter().map(|e| e.eval(scope)).collect()),
            Expr::Path { root, steps } => {
                let mut current = scope.get(root).cloned().unwrap_or(Value::Null);
                for step in steps {
                    current = match step {
                        Step::Key(key) => access(&current, &Value::String(key.clone())),
                        Step::Index(expr) => access(&current, &expr.eval(scope)),
                    };
                }
                current
            }
            Expr::Call { name, args } => {
                let args: Vec<Value> = args.iter().map(|a| a.eval(scope)).collect();
                call(name, &args)
            }
            Expr::Unary(UnaryOp::Not, inner) => Value::Bool(!truthy(&inner.eval(scope))),
            Expr::Unary(UnaryOp::Neg, inner) => number(-to_number(&inner.eval(scope))),
            Expr::Binary(op, lhs, rhs) => {
                let left = lhs.eval(scope);

                // Short-circuit; logical operators return an operand
                match op {
                    BinaryOp::Or if truthy(&left) => return left,
                    BinaryOp::Or => return rhs.eval(scope),
                    BinaryOp::And if !truthy(&left) => return left,
                    BinaryOp::And => return rhs.eval(scope),
                    _ => {}
                }

                binary(*op, &left, &rhs.eval(scope))
            }
        }
    }
}

/// AQL truthiness: null, false, 0 and "" are false; arrays and objects are true
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn access(container: &Value, key: &Value) -> Value {
    match (container, key) {
        (Value::Object(map), Value::String(k)) => map.get(k).cloned().unwrap_or(Value::Null),
        (Value::Array(items), Value::Number(n)) => {
            let len = items.len() as i64;
            let i = n.as_i64().unwrap_or(i64::MAX);
            let i = if i < 0 { len + i } else { i };
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null)
        }
        (Value::Array(items), Value::String(k)) => k
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Eq => Value::Bool(equals(left, right)),
        BinaryOp::Ne => Value::Bool(!equals(left, right)),
        BinaryOp::Lt => Value::Bool(compare_values(left, right) == Ordering::Less),
        BinaryOp::Le => Value::Bool(compare_values(left, right) != Ordering::Greater),
        BinaryOp::Gt => Value::Bool(compare_values(left, right) == Ordering::Greater),
        BinaryOp::Ge => Value::Bool(compare_values(left, right) != Ordering::Less),
        BinaryOp::In | BinaryOp::NotIn => {
            let found = match right {
                Value::Array(items) => items.iter().any(|item| equals(left, item)),
                _ => false,
            };
            Value::Bool(found == (op == BinaryOp::In))
        }
        BinaryOp::Add => number(to_number(left) + to_number(right)),
        BinaryOp::Sub => number(to_number(left) - to_number(right)),
        BinaryOp::Mul => number(to_number(left) * to_number(right)),
        BinaryOp::Div | BinaryOp::Mod => {
            let divisor = to_number(right);
            if divisor == 0.0 {
                return Value::Null;
            }
            let dividend = to_number(left);
            number(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            })
        }
        // Handled by the short-circuit in `eval`
        BinaryOp::Or | BinaryOp::And => Value::Null,
    }
}

fn call(name: &str, args: &[Value]) -> Value {
    let first = args.first().unwrap_or(&Value::Null);

    match name {
        "LOWER" => Value::String(to_text(first).to_lowercase()),
        "UPPER" => Value::String(to_text(first).to_uppercase()),
        "LENGTH" => Value::from(match first {
            Value::Null => 0,
            Value::Bool(b) => *b as usize,
            Value::Number(_) => to_text(first).chars().count(),
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
        }),
        "TO_NUMBER" => number(to_number(first)),
        "FLOOR" => number(to_number(first).floor()),
        "CEIL" => number(to_number(first).ceil()),
        "ROUND" => number(to_number(first).round()),
        "ABS" => number(to_number(first).abs()),
        "DATE_TIMESTAMP" => match first {
            Value::Number(_) => first.clone(),
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::from(dt.timestamp_millis()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "CONCAT" => Value::String(args.iter().map(to_text).collect()),
        "CONTAINS" => {
            let search = to_text(args.get(1).unwrap_or(&Value::Null));
            Value::Bool(to_text(first).contains(&search))
        }
        _ => Value::Null,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => *b as u8 as f64,
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Array(items) if items.len() == 1 => to_number(&items[0]),
        Value::Array(_) | Value::Object(_) => 0.0,
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
