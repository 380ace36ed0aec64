//! Arithmetic formula evaluation for custom aggregations and charges.
//!
//! Supports `+ - * / ( )`, decimal literals, and bare identifiers resolved
//! against a caller-supplied variable map. Nothing else: formulas are data,
//! never code.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{BillingError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Decimal),
    Variable(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// A parsed arithmetic formula, reusable across evaluations.
#[derive(Debug, Clone)]
pub struct Expression {
    root: Expr,
}

impl Expression {
    /// Parse a formula without evaluating it.
    pub fn parse(formula: &str) -> Result<Self> {
        let tokens = tokenize(formula)?;
        if tokens.is_empty() {
            return Err(malformed("empty expression"));
        }

        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_additive()?;

        if let Some(token) = parser.peek() {
            return Err(malformed(format!("unexpected trailing token {token:?}")));
        }

        Ok(Self { root })
    }

    /// Evaluate against the given variable bindings.
    pub fn evaluate(&self, variables: &HashMap<String, Decimal>) -> Result<Decimal> {
        eval(&self.root, variables)
    }
}

/// Parse and evaluate a formula in one step.
pub fn evaluate(formula: &str, variables: &HashMap<String, Decimal>) -> Result<Decimal> {
    Expression::parse(formula)?.evaluate(variables)
}

fn malformed(message: impl Into<String>) -> BillingError {
    BillingError::MalformedExpression {
        message: message.into(),
    }
}

fn tokenize(formula: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = formula.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = Decimal::from_str(&literal)
                    .map_err(|_| malformed(format!("invalid number literal '{literal}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(malformed(format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_primary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_primary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Literal(value)),
            Some(Token::Ident(name)) => Ok(Expr::Variable(name)),
            Some(Token::Minus) => {
                let inner = self.parse_primary()?;
                Ok(Expr::Negate(Box::new(inner)))
            }
            Some(Token::LParen) => {
                let inner = self.parse_additive()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(malformed("expected closing parenthesis")),
                }
            }
            Some(token) => Err(malformed(format!("unexpected token {token:?}"))),
            None => Err(malformed("unexpected end of expression")),
        }
    }
}

fn eval(expr: &Expr, variables: &HashMap<String, Decimal>) -> Result<Decimal> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Variable(name) => variables
            .get(name)
            .copied()
            .ok_or_else(|| malformed(format!("unknown identifier '{name}'"))),
        Expr::Negate(inner) => Ok(-eval(inner, variables)?),
        Expr::Binary { op, lhs, rhs } => {
            let left = eval(lhs, variables)?;
            let right = eval(rhs, variables)?;
            match op {
                BinaryOp::Add => Ok(left + right),
                BinaryOp::Subtract => Ok(left - right),
                BinaryOp::Multiply => Ok(left * right),
                BinaryOp::Divide => left
                    .checked_div(right)
                    .ok_or_else(|| malformed("division by zero")),
            }
        }
    }
}
