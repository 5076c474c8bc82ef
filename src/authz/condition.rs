//! Rule conditions over the evaluation context.
//!
//! A condition set is a JSON object. Every ordinary key is an exact-match
//! attribute: the context must carry the key with an equal value. The
//! reserved key `$expr` holds a boolean expression for richer predicates:
//!
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Membership: `x in list`
//! - Dot-path access: `request.hour`, `location.site`
//! - Literals: integers, floats, `"strings"`, `true`, `false`
//! - Parentheses for grouping

use serde_json::{Map, Value};

use crate::errors::ArbiterError;

/// Reserved condition key carrying an expression.
pub const EXPR_KEY: &str = "$expr";

/// Longest accepted expression source, in bytes.
pub const MAX_EXPR_LEN: usize = 4096;

/// Deepest accepted nesting of the expression tree.
pub const MAX_EXPR_DEPTH: usize = 64;

/// Result of checking a condition set against a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Satisfied,
    Unsatisfied,
    /// The expression could not be evaluated against this context.
    Indeterminate(String),
}

/// Compiled form of a rule's `conditions` object.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditions {
    attributes: Vec<(String, Value)>,
    expr: Option<Expr>,
}

impl Conditions {
    /// Validate and compile a `conditions` value as supplied by the caller.
    pub fn compile(value: &Value) -> Result<Self, ArbiterError> {
        let Value::Object(map) = value else {
            return Err(ArbiterError::InvalidRequest(
                "conditions must be a JSON object of attribute -> value".into(),
            ));
        };

        let mut attributes = Vec::with_capacity(map.len());
        let mut expr = None;
        for (key, expected) in map {
            if key == EXPR_KEY {
                let source = expected.as_str().ok_or_else(|| {
                    ArbiterError::InvalidCondition(format!("`{EXPR_KEY}` must be a string"))
                })?;
                expr = Some(parse_expr(source)?);
            } else if key.is_empty() {
                return Err(ArbiterError::InvalidRequest(
                    "condition attribute names must not be empty".into(),
                ));
            } else {
                attributes.push((key.clone(), expected.clone()));
            }
        }
        Ok(Self { attributes, expr })
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.expr.is_none()
    }

    /// All attributes must be present and equal; then the expression, if
    /// any, must hold.
    pub fn evaluate(&self, context: &Map<String, Value>) -> Outcome {
        for (key, expected) in &self.attributes {
            match context.get(key) {
                Some(actual) if values_equal(expected, actual) => {}
                _ => return Outcome::Unsatisfied,
            }
        }

        let Some(expr) = &self.expr else {
            return Outcome::Satisfied;
        };
        match eval(expr, context) {
            Ok(Val::Bool(true)) => Outcome::Satisfied,
            Ok(Val::Bool(false)) => Outcome::Unsatisfied,
            Ok(other) => Outcome::Indeterminate(format!(
                "expression produced {other:?} instead of a boolean"
            )),
            Err(e) => Outcome::Indeterminate(e.to_string()),
        }
    }
}

/// JSON equality, except numbers compare by value (`5 == 5.0`).
fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => expected == actual,
    }
}

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Val),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// Runtime value of a (sub)expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    List(Vec<Val>),
    Null,
}

impl Val {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Int(n) => Some(*n as f64),
            Val::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn loosely_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Int(_) | Val::Float(_), Val::Int(_) | Val::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Val::List(a), Val::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
            }
            _ => self == other,
        }
    }

    fn from_json(value: &Value) -> Val {
        match value {
            Value::Null | Value::Object(_) => Val::Null,
            Value::Bool(b) => Val::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Val::Int(i),
                None => n.as_f64().map(Val::Float).unwrap_or(Val::Null),
            },
            Value::String(s) => Val::Str(s.clone()),
            Value::Array(items) => Val::List(items.iter().map(Val::from_json).collect()),
        }
    }
}

// ─── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    In,
    Dot,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Cmp(CmpOp),
}

fn tokenize(input: &str) -> Result<Vec<Token>, ArbiterError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            (c, _) if c.is_whitespace() => {
                i += 1;
                continue;
            }
            ('.', _) => (Token::Dot, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('=', Some('=')) => (Token::Cmp(CmpOp::Eq), 2),
            ('!', Some('=')) => (Token::Cmp(CmpOp::Ne), 2),
            ('>', Some('=')) => (Token::Cmp(CmpOp::Ge), 2),
            ('<', Some('=')) => (Token::Cmp(CmpOp::Le), 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('!', _) => (Token::Not, 1),
            ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
            ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
            ('"', _) => {
                let mut s = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => {
                            return Err(ArbiterError::InvalidCondition(
                                "unterminated string literal".into(),
                            ))
                        }
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(escaped) = chars.get(j + 1) {
                                s.push(*escaped);
                            }
                            j += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            j += 1;
                        }
                    }
                }
                (Token::Str(s), j + 1 - i)
            }
            (c, _) if c.is_ascii_digit() => {
                let len = chars[i..]
                    .iter()
                    .take_while(|ch| ch.is_ascii_digit() || **ch == '.')
                    .count();
                let text: String = chars[i..i + len].iter().collect();
                let token = if text.contains('.') {
                    Token::Float(text.parse().map_err(|_| {
                        ArbiterError::InvalidCondition(format!("invalid float `{text}`"))
                    })?)
                } else {
                    Token::Int(text.parse().map_err(|_| {
                        ArbiterError::InvalidCondition(format!("invalid integer `{text}`"))
                    })?)
                };
                (token, len)
            }
            (c, _) if c.is_ascii_alphabetic() || c == '_' => {
                let len = chars[i..]
                    .iter()
                    .take_while(|ch| ch.is_ascii_alphanumeric() || **ch == '_')
                    .count();
                let word: String = chars[i..i + len].iter().collect();
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                };
                (token, len)
            }
            (c, _) => {
                return Err(ArbiterError::InvalidCondition(format!(
                    "unexpected character `{c}`"
                )))
            }
        };
        tokens.push(token);
        i += width;
    }
    Ok(tokens)
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), ArbiterError> {
        self.depth += 1;
        if self.depth > MAX_EXPR_DEPTH {
            return Err(ArbiterError::InvalidCondition(format!(
                "expression nested too deeply (limit {MAX_EXPR_DEPTH})"
            )));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    /// or = and ("||" and)*
    fn or(&mut self) -> Result<Expr, ArbiterError> {
        let entry = self.depth;
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            self.descend()?;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        self.depth = entry;
        Ok(left)
    }

    /// and = comparison ("&&" comparison)*
    fn and(&mut self) -> Result<Expr, ArbiterError> {
        let entry = self.depth;
        let mut left = self.comparison()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            self.descend()?;
            left = Expr::And(Box::new(left), Box::new(self.comparison()?));
        }
        self.depth = entry;
        Ok(left)
    }

    /// comparison = unary ((cmp | "in") unary)?
    fn comparison(&mut self) -> Result<Expr, ArbiterError> {
        let left = self.unary()?;
        match self.peek() {
            Some(Token::Cmp(op)) => {
                let op = *op;
                self.next();
                Ok(Expr::Compare(op, Box::new(left), Box::new(self.unary()?)))
            }
            Some(Token::In) => {
                self.next();
                Ok(Expr::In(Box::new(left), Box::new(self.unary()?)))
            }
            _ => Ok(left),
        }
    }

    /// unary = "!" unary | primary
    fn unary(&mut self) -> Result<Expr, ArbiterError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ArbiterError> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Val::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Val::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Val::Str(s))),
            Some(Token::True) => Ok(Expr::Literal(Val::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Val::Bool(false))),
            Some(Token::Ident(first)) => {
                let mut path = vec![first];
                while self.peek() == Some(&Token::Dot) {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        _ => {
                            return Err(ArbiterError::InvalidCondition(
                                "expected identifier after `.`".into(),
                            ))
                        }
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.or()?;
                self.depth -= 1;
                if self.next() != Some(Token::RParen) {
                    return Err(ArbiterError::InvalidCondition(
                        "expected closing parenthesis `)`".into(),
                    ));
                }
                Ok(inner)
            }
            other => Err(ArbiterError::InvalidCondition(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }
}

/// Parse an expression string into an AST.
pub fn parse_expr(input: &str) -> Result<Expr, ArbiterError> {
    if input.len() > MAX_EXPR_LEN {
        return Err(ArbiterError::InvalidCondition(format!(
            "expression longer than {MAX_EXPR_LEN} bytes"
        )));
    }
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ArbiterError::InvalidCondition("empty expression".into()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or()?;
    if let Some(trailing) = parser.peek() {
        return Err(ArbiterError::InvalidCondition(format!(
            "unexpected trailing token: {trailing:?}"
        )));
    }
    Ok(expr)
}

// ─── Evaluator ──────────────────────────────────────────────────────────

fn eval(expr: &Expr, context: &Map<String, Value>) -> Result<Val, ArbiterError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(segments) => {
            let mut current = segments.first().and_then(|head| context.get(head));
            for seg in segments.iter().skip(1) {
                current = current.and_then(|v| v.get(seg));
            }
            Ok(current.map(Val::from_json).unwrap_or(Val::Null))
        }
        Expr::Not(inner) => match eval(inner, context)? {
            Val::Bool(b) => Ok(Val::Bool(!b)),
            _ => Err(ArbiterError::InvalidCondition(
                "`!` operator requires a boolean operand".into(),
            )),
        },
        Expr::And(l, r) => match (eval(l, context)?, eval(r, context)?) {
            (Val::Bool(a), Val::Bool(b)) => Ok(Val::Bool(a && b)),
            _ => Err(ArbiterError::InvalidCondition(
                "`&&` requires boolean operands".into(),
            )),
        },
        Expr::Or(l, r) => match (eval(l, context)?, eval(r, context)?) {
            (Val::Bool(a), Val::Bool(b)) => Ok(Val::Bool(a || b)),
            _ => Err(ArbiterError::InvalidCondition(
                "`||` requires boolean operands".into(),
            )),
        },
        Expr::In(element, collection) => {
            let elem = eval(element, context)?;
            match eval(collection, context)? {
                Val::List(items) => Ok(Val::Bool(items.iter().any(|i| i.loosely_eq(&elem)))),
                _ => Err(ArbiterError::InvalidCondition(
                    "`in` operator requires an array on the right side".into(),
                )),
            }
        }
        Expr::Compare(op, l, r) => {
            let (l, r) = (eval(l, context)?, eval(r, context)?);
            let result = match op {
                CmpOp::Eq => l.loosely_eq(&r),
                CmpOp::Ne => !l.loosely_eq(&r),
                ordering => {
                    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                        return Err(ArbiterError::InvalidCondition(
                            "comparison operator requires numeric operands".into(),
                        ));
                    };
                    match ordering {
                        CmpOp::Gt => a > b,
                        CmpOp::Lt => a < b,
                        CmpOp::Ge => a >= b,
                        _ => a <= b,
                    }
                }
            };
            Ok(Val::Bool(result))
        }
    }
}
