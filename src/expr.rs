//! Sandboxed expression grammar for skip conditions.
//!
//! Skip policies may carry a condition as a string instead of a callback.
//! The string is evaluated against a read-only projection of the execution
//! context; it can never mutate state, call arbitrary code, or loop.
//!
//! Supported grammar:
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := operand ( ("==" | "!=" | "<" | "<=" | ">" | ">=") operand )?
//! operand    := literal | path | helper | "(" expr ")"
//! literal    := number | 'string' | "string" | true | false | null
//! path       := root ( "." ident | "[" index "]" )*
//! root       := "ctx" | "stepOutputs" | "globals"
//! helper     := ("getStepOutput" | "getGlobal") "(" string ")" trailer*
//! ```
//!
//! Missing keys resolve to `null` so comparisons against absent data behave
//! predictably. Anything outside the grammar is a parse error; the skip
//! evaluator treats every error as "do not skip" and logs a warning.
//!
//! # Examples
//!
//! ```rust
//! use taskloom::context::ExecutionContext;
//! use taskloom::expr::{evaluate, ContextProjection};
//! use serde_json::json;
//!
//! let ctx = ExecutionContext::new();
//! ctx.set_step_output("choose", json!({"selectedOption": "fast"}));
//! ctx.set_global("limit", json!(10));
//!
//! let snap = ctx.snapshot();
//! let proj = ContextProjection::from_snapshot(&snap);
//!
//! assert!(evaluate("stepOutputs.choose.selectedOption == 'fast'", &proj).unwrap());
//! assert!(evaluate("getGlobal('limit') >= 10 && !false", &proj).unwrap());
//! ```

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::context::ContextSnapshot;

/// Errors raised while parsing or evaluating a skip expression.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("evaluation error: {message}")]
    Eval { message: String },
}

impl ExprError {
    fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    fn eval(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
        }
    }
}

/// Read-only view of the context handed to expressions.
#[derive(Clone, Copy, Debug)]
pub struct ContextProjection<'a> {
    pub step_outputs: &'a rustc_hash::FxHashMap<String, Value>,
    pub globals: &'a rustc_hash::FxHashMap<String, Value>,
}

impl<'a> ContextProjection<'a> {
    #[must_use]
    pub fn from_snapshot(snapshot: &'a ContextSnapshot) -> Self {
        Self {
            step_outputs: &snapshot.step_outputs,
            globals: &snapshot.globals,
        }
    }

    fn step_output(&self, id: &str) -> Value {
        self.step_outputs.get(id).cloned().unwrap_or(Value::Null)
    }

    fn global(&self, key: &str) -> Value {
        self.globals.get(key).cloned().unwrap_or(Value::Null)
    }

    fn namespace_object(map: &rustc_hash::FxHashMap<String, Value>) -> Value {
        let mut object = Map::new();
        for (k, v) in map {
            object.insert(k.clone(), v.clone());
        }
        Value::Object(object)
    }
}

/// Parses and evaluates `source`, returning the truthiness of the result.
///
/// Truthiness follows the usual rules: `null` and `false` are false, zero
/// and the empty string are false, everything else is true.
pub fn evaluate(source: &str, ctx: &ContextProjection<'_>) -> Result<bool, ExprError> {
    let value = evaluate_value(source, ctx)?;
    Ok(truthy(&value))
}

/// Parses and evaluates `source`, returning the raw result value.
pub fn evaluate_value(source: &str, ctx: &ContextProjection<'_>) -> Result<Value, ExprError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_len: source.len(),
    };
    let ast = parser.parse_expr()?;
    parser.expect_end()?;
    eval_node(&ast, ctx)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Dot,
    LBracket,
    RBracket,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, ExprError> {
        let mut tokens = Vec::new();
        while let Some(&byte) = self.src.get(self.pos) {
            let start = self.pos;
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.pos += 1;
                }
                b'(' => {
                    self.pos += 1;
                    tokens.push((start, Token::LParen));
                }
                b')' => {
                    self.pos += 1;
                    tokens.push((start, Token::RParen));
                }
                b'[' => {
                    self.pos += 1;
                    tokens.push((start, Token::LBracket));
                }
                b']' => {
                    self.pos += 1;
                    tokens.push((start, Token::RBracket));
                }
                b'.' => {
                    self.pos += 1;
                    tokens.push((start, Token::Dot));
                }
                b'=' => {
                    if self.src.get(self.pos + 1) == Some(&b'=') {
                        self.pos += 2;
                        tokens.push((start, Token::EqEq));
                    } else {
                        return Err(ExprError::parse(start, "expected '==', found '='"));
                    }
                }
                b'!' => {
                    if self.src.get(self.pos + 1) == Some(&b'=') {
                        self.pos += 2;
                        tokens.push((start, Token::NotEq));
                    } else {
                        self.pos += 1;
                        tokens.push((start, Token::Bang));
                    }
                }
                b'<' => {
                    if self.src.get(self.pos + 1) == Some(&b'=') {
                        self.pos += 2;
                        tokens.push((start, Token::Le));
                    } else {
                        self.pos += 1;
                        tokens.push((start, Token::Lt));
                    }
                }
                b'>' => {
                    if self.src.get(self.pos + 1) == Some(&b'=') {
                        self.pos += 2;
                        tokens.push((start, Token::Ge));
                    } else {
                        self.pos += 1;
                        tokens.push((start, Token::Gt));
                    }
                }
                b'&' => {
                    if self.src.get(self.pos + 1) == Some(&b'&') {
                        self.pos += 2;
                        tokens.push((start, Token::AndAnd));
                    } else {
                        return Err(ExprError::parse(start, "expected '&&', found '&'"));
                    }
                }
                b'|' => {
                    if self.src.get(self.pos + 1) == Some(&b'|') {
                        self.pos += 2;
                        tokens.push((start, Token::OrOr));
                    } else {
                        return Err(ExprError::parse(start, "expected '||', found '|'"));
                    }
                }
                b'\'' | b'"' => {
                    tokens.push((start, self.lex_string(byte)?));
                }
                b'0'..=b'9' => {
                    tokens.push((start, self.lex_number()?));
                }
                b'-' => {
                    tokens.push((start, self.lex_number()?));
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    tokens.push((start, self.lex_ident()));
                }
                other => {
                    return Err(ExprError::parse(
                        start,
                        format!("unexpected character '{}'", other as char),
                    ));
                }
            }
        }
        Ok(tokens)
    }

    fn lex_string(&mut self, quote: u8) -> Result<Token, ExprError> {
        let start = self.pos;
        self.pos += 1;
        let begin = self.pos;
        while let Some(&b) = self.src.get(self.pos) {
            if b == quote {
                let text = std::str::from_utf8(&self.src[begin..self.pos])
                    .map_err(|_| ExprError::parse(start, "invalid utf-8 in string"))?;
                self.pos += 1;
                return Ok(Token::Str(text.to_string()));
            }
            self.pos += 1;
        }
        Err(ExprError::parse(start, "unterminated string literal"))
    }

    fn lex_number(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        if self.src.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        while self
            .src
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_digit() || *b == b'.')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| ExprError::parse(start, "invalid number"))?;
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExprError::parse(start, format!("invalid number '{text}'")))
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .src
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .expect("ident bytes are ascii")
            .to_string();
        match text.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Ident(text),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Literal(Value),
    Path {
        root: String,
        segments: Vec<PathSegment>,
    },
    Helper {
        name: String,
        arg: String,
        segments: Vec<PathSegment>,
    },
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare {
        op: CompareOp,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    source_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source_len, |(o, _)| *o)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ExprError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExprError::parse(self.offset(), format!("expected {what}")))
        }
    }

    fn expect_end(&self) -> Result<(), ExprError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(ExprError::parse(self.offset(), "trailing input"))
        }
    }

    fn parse_expr(&mut self) -> Result<Node, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        if self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Node, ExprError> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::EqEq) => Some(CompareOp::Eq),
            Some(Token::NotEq) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(left);
        };
        self.pos += 1;
        let right = self.parse_operand()?;
        Ok(Node::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_operand(&mut self) -> Result<Node, ExprError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Node::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Node::Literal(Value::String(s))),
            Some(Token::True) => Ok(Node::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Node::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Node::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.parse_path_or_helper(name),
            other => Err(ExprError::parse(
                offset,
                format!("expected operand, found {other:?}"),
            )),
        }
    }

    fn parse_path_or_helper(&mut self, name: String) -> Result<Node, ExprError> {
        if matches!(name.as_str(), "getStepOutput" | "getGlobal") {
            self.expect(&Token::LParen, "'(' after helper name")?;
            let arg = match self.advance() {
                Some(Token::Str(s)) => s,
                _ => {
                    return Err(ExprError::parse(
                        self.offset(),
                        "helper argument must be a string literal",
                    ));
                }
            };
            self.expect(&Token::RParen, "')' after helper argument")?;
            let segments = self.parse_trailers()?;
            return Ok(Node::Helper {
                name,
                arg,
                segments,
            });
        }

        if !matches!(name.as_str(), "ctx" | "stepOutputs" | "globals") {
            return Err(ExprError::parse(
                self.offset(),
                format!("unknown identifier '{name}'"),
            ));
        }
        let segments = self.parse_trailers()?;
        Ok(Node::Path {
            root: name,
            segments,
        })
    }

    fn parse_trailers(&mut self) -> Result<Vec<PathSegment>, ExprError> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(key)) => segments.push(PathSegment::Key(key)),
                        _ => {
                            return Err(ExprError::parse(
                                self.offset(),
                                "expected identifier after '.'",
                            ));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let segment = match self.advance() {
                        Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                            PathSegment::Index(n as usize)
                        }
                        Some(Token::Str(key)) => PathSegment::Key(key),
                        _ => {
                            return Err(ExprError::parse(
                                self.offset(),
                                "expected index or string key in '[...]'",
                            ));
                        }
                    };
                    self.expect(&Token::RBracket, "']'")?;
                    segments.push(segment);
                }
                _ => break,
            }
        }
        Ok(segments)
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval_node(node: &Node, ctx: &ContextProjection<'_>) -> Result<Value, ExprError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Not(inner) => {
            let value = eval_node(inner, ctx)?;
            Ok(Value::Bool(!truthy(&value)))
        }
        Node::And(left, right) => {
            let lhs = eval_node(left, ctx)?;
            if !truthy(&lhs) {
                return Ok(Value::Bool(false));
            }
            let rhs = eval_node(right, ctx)?;
            Ok(Value::Bool(truthy(&rhs)))
        }
        Node::Or(left, right) => {
            let lhs = eval_node(left, ctx)?;
            if truthy(&lhs) {
                return Ok(Value::Bool(true));
            }
            let rhs = eval_node(right, ctx)?;
            Ok(Value::Bool(truthy(&rhs)))
        }
        Node::Compare { op, left, right } => {
            let lhs = eval_node(left, ctx)?;
            let rhs = eval_node(right, ctx)?;
            compare(*op, &lhs, &rhs).map(Value::Bool)
        }
        Node::Path { root, segments } => {
            let (base, rest) = resolve_root(root, segments, ctx)?;
            Ok(walk(base, rest))
        }
        Node::Helper {
            name,
            arg,
            segments,
        } => {
            let base = match name.as_str() {
                "getStepOutput" => ctx.step_output(arg),
                "getGlobal" => ctx.global(arg),
                _ => unreachable!("parser admits only known helpers"),
            };
            Ok(walk(base, segments))
        }
    }
}

/// Resolves the root identifier to a starting value, consuming the leading
/// segments that name a namespace (`ctx.stepOutputs`, `stepOutputs.foo`).
fn resolve_root<'s>(
    root: &str,
    segments: &'s [PathSegment],
    ctx: &ContextProjection<'_>,
) -> Result<(Value, &'s [PathSegment]), ExprError> {
    match root {
        "ctx" => match segments.first() {
            Some(PathSegment::Key(ns)) if ns == "stepOutputs" => {
                resolve_namespace(ctx.step_outputs, &segments[1..], ctx)
            }
            Some(PathSegment::Key(ns)) if ns == "globals" => {
                resolve_namespace(ctx.globals, &segments[1..], ctx)
            }
            _ => Err(ExprError::eval(
                "'ctx' must be followed by .stepOutputs or .globals",
            )),
        },
        "stepOutputs" => resolve_namespace(ctx.step_outputs, segments, ctx),
        "globals" => resolve_namespace(ctx.globals, segments, ctx),
        _ => unreachable!("parser admits only known roots"),
    }
}

fn resolve_namespace<'s>(
    map: &rustc_hash::FxHashMap<String, Value>,
    segments: &'s [PathSegment],
    _ctx: &ContextProjection<'_>,
) -> Result<(Value, &'s [PathSegment]), ExprError> {
    match segments.first() {
        Some(PathSegment::Key(key)) => Ok((
            map.get(key).cloned().unwrap_or(Value::Null),
            &segments[1..],
        )),
        Some(PathSegment::Index(_)) => Err(ExprError::eval("namespaces are keyed by name")),
        None => Ok((ContextProjection::namespace_object(map), segments)),
    }
}

fn walk(mut value: Value, segments: &[PathSegment]) -> Value {
    for segment in segments {
        value = match (&value, segment) {
            (Value::Object(map), PathSegment::Key(key)) => {
                map.get(key).cloned().unwrap_or(Value::Null)
            }
            (Value::Array(items), PathSegment::Index(idx)) => {
                items.get(*idx).cloned().unwrap_or(Value::Null)
            }
            _ => Value::Null,
        };
    }
    value
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<bool, ExprError> {
    match op {
        CompareOp::Eq => Ok(loose_eq(lhs, rhs)),
        CompareOp::Ne => Ok(!loose_eq(lhs, rhs)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => {
                    let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                    a.partial_cmp(&b)
                        .ok_or_else(|| ExprError::eval("cannot order NaN"))?
                }
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    return Err(ExprError::eval(format!(
                        "cannot order {lhs} and {rhs}"
                    )));
                }
            };
            Ok(match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            })
        }
    }
}

/// Equality with numeric coercion: `1 == 1.0` holds.
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().zip(b.as_f64()).is_some_and(|(a, b)| a == b)
        }
        _ => lhs == rhs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use serde_json::json;

    fn projection(
        outputs: &[(&str, Value)],
        globals: &[(&str, Value)],
    ) -> (FxHashMap<String, Value>, FxHashMap<String, Value>) {
        let step_outputs = outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let globals = globals
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        (step_outputs, globals)
    }

    fn eval(src: &str, outputs: &[(&str, Value)], globals: &[(&str, Value)]) -> Result<bool, ExprError> {
        let (step_outputs, globals) = projection(outputs, globals);
        let proj = ContextProjection {
            step_outputs: &step_outputs,
            globals: &globals,
        };
        evaluate(src, &proj)
    }

    #[test]
    fn literals_and_logic() {
        assert!(eval("true", &[], &[]).unwrap());
        assert!(!eval("false || null", &[], &[]).unwrap());
        assert!(eval("!false && (1 == 1)", &[], &[]).unwrap());
        assert!(eval("'a' != 'b'", &[], &[]).unwrap());
    }

    #[test]
    fn paths_resolve_into_structures() {
        let out = [("choose", json!({"selectedOption": "fast", "scores": [1, 2, 3]}))];
        assert!(eval("stepOutputs.choose.selectedOption == 'fast'", &out, &[]).unwrap());
        assert!(eval("ctx.stepOutputs.choose.scores[2] == 3", &out, &[]).unwrap());
        assert!(eval("stepOutputs.missing == null", &out, &[]).unwrap());
    }

    #[test]
    fn helpers_mirror_paths() {
        let out = [("a", json!(5))];
        let glob = [("threshold", json!(4))];
        assert!(eval("getStepOutput('a') > getGlobal('threshold')", &out, &glob).unwrap());
        assert!(eval("getGlobal('absent') == null", &out, &glob).unwrap());
    }

    #[test]
    fn numeric_equality_is_loose() {
        assert!(eval("1 == 1.0", &[], &[]).unwrap());
        assert!(eval("2 >= 1.5", &[], &[]).unwrap());
    }

    #[test]
    fn unknown_identifier_is_a_parse_error() {
        let err = eval("unknown.path == 1", &[], &[]).unwrap_err();
        assert!(matches!(err, ExprError::Parse { .. }));
    }

    #[test]
    fn ordering_non_numbers_is_an_eval_error() {
        let err = eval("true < 1", &[], &[]).unwrap_err();
        assert!(matches!(err, ExprError::Eval { .. }));
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert!(matches!(
            eval("true true", &[], &[]),
            Err(ExprError::Parse { .. })
        ));
    }
}
