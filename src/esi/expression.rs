//! Test expressions for `<esi:when>`.
//!
//! ```text
//! expr    := and (('|' | '||') and)*
//! and     := unary (('&' | '&&') unary)*
//! unary   := '!' unary | compare
//! compare := operand (('==' | '!=' | '<' | '<=' | '>' | '>=') operand)?
//! operand := '(' expr ')' | 'string' | number | $(VAR) | $(VAR{key}) | true | false
//! ```
//!
//! Comparisons are numeric when both sides are numbers, textual otherwise.
//! Groups and negations nest at most `MAX_NESTING` deep.

use std::cmp::Ordering;

use crate::esi::error::EsiError;
use crate::esi::template::{parse_reference, Variables};

const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Compare(CompareOp),
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty() && s != "false",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(self.as_text().cmp(&other.as_text())),
        }
    }
}

/// Evaluate `expression` to a boolean.
pub fn evaluate(expression: &str, variables: &Variables<'_>) -> Result<bool, EsiError> {
    let invalid = |reason: &str| EsiError::InvalidExpression {
        expression: expression.to_string(),
        reason: reason.to_string(),
    };
    let tokens = tokenize(expression, variables).map_err(|reason| match reason {
        LexError::Invalid(reason) => invalid(&reason),
        LexError::Variable(e) => e,
    })?;
    if tokens.is_empty() {
        return Err(invalid("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr().map_err(|reason| invalid(&reason))?;
    if parser.pos != parser.tokens.len() {
        return Err(invalid("unexpected trailing input"));
    }
    Ok(value.truthy())
}

enum LexError {
    Invalid(String),
    Variable(EsiError),
}

fn tokenize(input: &str, variables: &Variables<'_>) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            rest = &rest[c.len_utf8()..];
            continue;
        }
        let (token, len) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '!' if rest.starts_with("!=") => (Token::Compare(CompareOp::Ne), 2),
            '!' => (Token::Not, 1),
            '&' if rest.starts_with("&&") => (Token::And, 2),
            '&' => (Token::And, 1),
            '|' if rest.starts_with("||") => (Token::Or, 2),
            '|' => (Token::Or, 1),
            '=' if rest.starts_with("==") => (Token::Compare(CompareOp::Eq), 2),
            '<' if rest.starts_with("<=") => (Token::Compare(CompareOp::Le), 2),
            '<' => (Token::Compare(CompareOp::Lt), 1),
            '>' if rest.starts_with(">=") => (Token::Compare(CompareOp::Ge), 2),
            '>' => (Token::Compare(CompareOp::Gt), 1),
            '\'' | '"' => {
                let end = rest[1..]
                    .find(c)
                    .ok_or_else(|| LexError::Invalid("unterminated string".into()))?;
                (Token::Str(rest[1..1 + end].to_string()), end + 2)
            }
            '$' => {
                let (name, key, len) = parse_reference(rest)
                    .ok_or_else(|| LexError::Invalid("malformed variable".into()))?;
                let value = variables.lookup(name, key).map_err(LexError::Variable)?;
                (Token::Str(value), len)
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let len = rest
                    .char_indices()
                    .skip(1)
                    .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
                    .map_or(rest.len(), |(i, _)| i);
                let number = rest[..len]
                    .parse()
                    .map_err(|_| LexError::Invalid(format!("bad number '{}'", &rest[..len])))?;
                (Token::Num(number), len)
            }
            _ if rest.starts_with("true") => (Token::Bool(true), 4),
            _ if rest.starts_with("false") => (Token::Bool(false), 5),
            other => return Err(LexError::Invalid(format!("unexpected character '{}'", other))),
        };
        tokens.push(token);
        rest = &rest[len..];
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth == MAX_NESTING {
            return Err("nesting too deep".to_string());
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expr(&mut self) -> Result<Value, String> {
        let mut value = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            value = Value::Bool(value.truthy() || right.truthy());
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<Value, String> {
        let mut value = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            value = Value::Bool(value.truthy() && right.truthy());
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<Value, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let value = self.nested(Self::unary)?;
            return Ok(Value::Bool(!value.truthy()));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Value, String> {
        let left = self.operand()?;
        let Some(Token::Compare(op)) = self.peek().cloned() else {
            return Ok(left);
        };
        self.pos += 1;
        let right = self.operand()?;
        let ordering = left.compare(&right);
        let result = match op {
            CompareOp::Eq => ordering == Some(Ordering::Equal),
            CompareOp::Ne => ordering != Some(Ordering::Equal),
            CompareOp::Lt => ordering == Some(Ordering::Less),
            CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Gt => ordering == Some(Ordering::Greater),
            CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        };
        Ok(Value::Bool(result))
    }

    fn operand(&mut self) -> Result<Value, String> {
        match self.advance() {
            Some(Token::LParen) => {
                let value = self.nested(Self::expr)?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Num(n)) => Ok(Value::Num(n)),
            Some(Token::Bool(b)) => Ok(Value::Bool(b)),
            Some(other) => Err(format!("unexpected {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
