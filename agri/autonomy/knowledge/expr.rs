//! Restricted condition language for decision rules.
//!
//! Conditions are parsed once when the knowledge file loads and evaluated per
//! reading against an [`EvalContext`]. The grammar has no loops, calls, or
//! assignment, and the parser caps nesting depth and source length, so every
//! evaluation is linear in the size of the tree.

use std::{cmp::Ordering, fmt};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ExprError;

/// Maximum nesting depth accepted by the parser.
pub const MAX_DEPTH: usize = 64;
/// Maximum condition length in bytes.
pub const MAX_LENGTH: usize = 4096;

/// Scalar value visible to rule conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Any numeric reading or threshold.
    Number(f64),
    /// Categorical reading such as a nutrient level or prediction label.
    Text(String),
}

impl Value {
    /// Name of the value's type, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }

    /// Converts a JSON scalar. Arrays, objects, and null have no counterpart.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(flag) => Some(Self::Bool(*flag)),
            serde_json::Value::Number(number) => number.as_f64().map(Self::Number),
            serde_json::Value::String(text) => Some(Self::Text(text.clone())),
            _ => None,
        }
    }

    /// Numeric view of the value.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// Text view of the value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Number(number) if number.fract() == 0.0 && number.abs() < 1e15 => {
                write!(f, "{number:.0}")
            }
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Variables available to a condition.
pub type EvalContext = IndexMap<String, Value>;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl CmpOp {
    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    const fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Le => !matches!(ordering, Ordering::Greater),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Ge => !matches!(ordering, Ordering::Less),
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Ne => !matches!(ordering, Ordering::Equal),
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl ArithOp {
    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Parsed condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value.
    Literal(Value),
    /// Context lookup.
    Variable(String),
    /// Binary comparison producing a boolean.
    Comparison {
        /// Operator.
        op: CmpOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Binary arithmetic over numbers.
    Arithmetic {
        /// Operator.
        op: ArithOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Unary minus.
    Negate(Box<Expr>),
    /// Short-circuit conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Boolean negation.
    Not(Box<Expr>),
}

impl Expr {
    /// Parses condition source text.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        if source.len() > MAX_LENGTH {
            return Err(ExprError::TooLong(MAX_LENGTH));
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            cursor: 0,
            depth: 0,
            end: source.len(),
        };
        if parser.peek().is_none() {
            return Err(ExprError::Parse {
                position: 0,
                message: "empty condition".into(),
            });
        }
        let expr = parser.parse_or()?;
        if parser.peek().is_some() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Evaluates the tree to a value.
    pub fn evaluate(&self, ctx: &EvalContext) -> Result<Value, ExprError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Variable(name) => ctx
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
            Self::Comparison { op, left, right } => {
                let left = left.evaluate(ctx)?;
                let right = right.evaluate(ctx)?;
                compare(*op, &left, &right).map(Value::Bool)
            }
            Self::Arithmetic { op, left, right } => {
                arithmetic(*op, left.evaluate(ctx)?, right.evaluate(ctx)?)
            }
            Self::Negate(inner) => match inner.evaluate(ctx)? {
                Value::Number(number) => Ok(Value::Number(-number)),
                other => Err(ExprError::TypeMismatch {
                    op: "-".into(),
                    left: "nothing",
                    right: other.type_name(),
                }),
            },
            Self::And(left, right) => {
                if !expect_bool("and", left.evaluate(ctx)?)? {
                    return Ok(Value::Bool(false));
                }
                expect_bool("and", right.evaluate(ctx)?).map(Value::Bool)
            }
            Self::Or(left, right) => {
                if expect_bool("or", left.evaluate(ctx)?)? {
                    return Ok(Value::Bool(true));
                }
                expect_bool("or", right.evaluate(ctx)?).map(Value::Bool)
            }
            Self::Not(inner) => expect_bool("not", inner.evaluate(ctx)?).map(|flag| Value::Bool(!flag)),
        }
    }

    /// Evaluates the tree as a rule condition, which must produce a boolean.
    pub fn matches(&self, ctx: &EvalContext) -> Result<bool, ExprError> {
        expect_bool("condition", self.evaluate(ctx)?)
    }
}

fn expect_bool(op: &str, value: Value) -> Result<bool, ExprError> {
    match value {
        Value::Bool(flag) => Ok(flag),
        other => Err(ExprError::TypeMismatch {
            op: op.into(),
            left: "bool",
            right: other.type_name(),
        }),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) if matches!(op, CmpOp::Eq | CmpOp::Ne) => Some(a.cmp(b)),
        _ if op == CmpOp::Eq => return Ok(false),
        _ if op == CmpOp::Ne => return Ok(true),
        _ => {
            return Err(ExprError::TypeMismatch {
                op: op.symbol().into(),
                left: left.type_name(),
                right: right.type_name(),
            })
        }
    };
    // NaN compares unequal to everything.
    Ok(ordering.map_or(op == CmpOp::Ne, |ordering| op.accepts(ordering)))
}

fn arithmetic(op: ArithOp, left: Value, right: Value) -> Result<Value, ExprError> {
    match (op, left, right) {
        (ArithOp::Add, Value::Text(a), Value::Text(b)) => Ok(Value::Text(a + &b)),
        (_, Value::Number(_), Value::Number(b)) if op == ArithOp::Div && b == 0.0 => {
            Err(ExprError::DivisionByZero)
        }
        (_, Value::Number(a), Value::Number(b)) => Ok(Value::Number(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
        })),
        (_, left, right) => Err(ExprError::TypeMismatch {
            op: op.symbol().into(),
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    True,
    False,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    let unexpected = |position: usize, message: &str| ExprError::Parse {
        position,
        message: message.into(),
    };

    while let Some((start, ch)) = chars.next() {
        let token = match ch {
            c if c.is_whitespace() => continue,
            c if c.is_ascii_digit() || (c == '.' && matches!(chars.peek(), Some((_, d)) if d.is_ascii_digit())) => {
                let mut end = start + c.len_utf8();
                while let Some(&(idx, next)) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' || next == '_' {
                        end = idx + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = source[start..end].replace('_', "");
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| unexpected(start, "malformed number"))?;
                Token::Number(number)
            }
            quote @ ('\'' | '"') => {
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => text.push(c),
                    }
                }
                if !closed {
                    return Err(unexpected(start, "unterminated string literal"));
                }
                Token::Text(text)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some(&(idx, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        end = idx + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                match &source[start..end] {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "True" | "true" => Token::True,
                    "False" | "false" => Token::False,
                    ident => Token::Ident(ident.to_owned()),
                }
            }
            '&' if matches!(chars.peek(), Some((_, '&'))) => {
                chars.next();
                Token::And
            }
            '|' if matches!(chars.peek(), Some((_, '|'))) => {
                chars.next();
                Token::Or
            }
            '!' | '<' | '>' | '=' => {
                let followed_by_eq = matches!(chars.peek(), Some((_, '=')));
                if followed_by_eq {
                    chars.next();
                }
                match (ch, followed_by_eq) {
                    ('!', false) => Token::Not,
                    ('!', true) => Token::Cmp(CmpOp::Ne),
                    ('<', false) => Token::Cmp(CmpOp::Lt),
                    ('<', true) => Token::Cmp(CmpOp::Le),
                    ('>', false) => Token::Cmp(CmpOp::Gt),
                    ('>', true) => Token::Cmp(CmpOp::Ge),
                    ('=', true) => Token::Cmp(CmpOp::Eq),
                    _ => return Err(unexpected(start, "assignment is not supported; use `==`")),
                }
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => {
                return Err(unexpected(start, &format!("unexpected character `{other}`")));
            }
        };
        tokens.push((start, token));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, token)| token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|(_, token)| token.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn error(&self, message: &str) -> ExprError {
        ExprError::Parse {
            position: self.tokens.get(self.cursor).map_or(self.end, |(pos, _)| *pos),
            message: message.into(),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.enter()?;
            let inner = self.parse_not()?;
            self.leave();
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    /// `a < b < c` chains into `a < b and b < c`.
    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let first = self.parse_sum()?;
        let mut operands = vec![first];
        let mut ops = Vec::new();
        while let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.advance();
            ops.push(op);
            operands.push(self.parse_sum()?);
        }
        if ops.is_empty() {
            return Ok(operands.remove(0));
        }
        let mut chain: Option<Expr> = None;
        for (idx, op) in ops.into_iter().enumerate() {
            let link = Expr::Comparison {
                op,
                left: Box::new(operands[idx].clone()),
                right: Box::new(operands[idx + 1].clone()),
            };
            chain = Some(match chain {
                Some(prev) => Expr::And(Box::new(prev), Box::new(link)),
                None => link,
            });
        }
        chain.ok_or_else(|| self.error("expected comparison"))
    }

    fn parse_sum(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            self.enter()?;
            let inner = self.parse_unary()?;
            self.leave();
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expected a value"));
        };
        let expr = match token {
            Token::Number(number) => Expr::Literal(Value::Number(number)),
            Token::Text(text) => Expr::Literal(Value::Text(text)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Ident(name) => Expr::Variable(name),
            Token::LParen => {
                self.advance();
                self.enter()?;
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("expected `)`"));
                }
                self.advance();
                self.leave();
                return Ok(inner);
            }
            _ => return Err(self.error("expected a value")),
        };
        self.advance();
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.insert("moisture".into(), Value::Number(40.0));
        ctx.insert("temp".into(), Value::Number(35.0));
        ctx.insert("nutrient_level".into(), Value::from("LOW"));
        ctx.insert("prediction".into(), Value::from("Critical Drought Warning"));
        ctx.insert("max_daily_cost_kes".into(), Value::Number(50_000.0));
        ctx.insert("cost_kes".into(), Value::Number(1_200.0));
        ctx
    }

    fn eval(source: &str) -> Result<bool, ExprError> {
        Expr::parse(source)?.matches(&ctx())
    }

    #[test]
    fn evaluates_rule_style_conditions() {
        assert!(eval("moisture < 50 and temp > 30").unwrap());
        assert!(eval("prediction == 'Critical Drought Warning'").unwrap());
        assert!(eval("nutrient_level == \"LOW\" or moisture > 90").unwrap());
        assert!(eval("not (moisture >= 65)").unwrap());
        assert!(eval("cost_kes * 10 < max_daily_cost_kes").unwrap());
        assert!(!eval("moisture > 50 && temp > 30").unwrap());
    }

    #[test]
    fn chained_comparisons_match_interval_semantics() {
        assert!(eval("30 < moisture <= 40").unwrap());
        assert!(!eval("30 < moisture < 40").unwrap());
    }

    #[test]
    fn unknown_variable_is_reported() {
        assert_eq!(
            eval("wind_speed > 10"),
            Err(ExprError::UnknownVariable("wind_speed".into()))
        );
    }

    #[test]
    fn short_circuit_skips_unknown_variables() {
        assert!(!eval("moisture > 90 and wind_speed > 10").unwrap());
        assert!(eval("moisture < 90 or wind_speed > 10").unwrap());
    }

    #[test]
    fn ordering_across_types_is_a_mismatch() {
        assert!(matches!(
            eval("nutrient_level > 3"),
            Err(ExprError::TypeMismatch { .. })
        ));
        assert!(!eval("nutrient_level == 3").unwrap());
        assert!(matches!(eval("moisture + 1"), Err(ExprError::TypeMismatch { .. })));
    }

    #[test]
    fn rejects_assignment_and_garbage() {
        assert!(matches!(Expr::parse("moisture = 3"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("__import__('os')"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("moisture <"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("  "), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("'open"), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}true{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(Expr::parse(&deep), Err(ExprError::TooDeep(MAX_DEPTH)));
        let long = "moisture > 1 and ".repeat(400) + "true";
        assert_eq!(Expr::parse(&long), Err(ExprError::TooLong(MAX_LENGTH)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(eval("moisture / 0 > 1"), Err(ExprError::DivisionByZero));
        assert!(eval("-moisture < 0").unwrap());
    }
}
