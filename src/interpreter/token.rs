use super::statement::{BinaryOp, UnaryOp};
use super::InterpreterError;
use crate::lexer::{Lexeme, LexemeKind, LexemeValue};
use crate::reference::Reference;
use serde::Serialize;
use std::fmt::{self, Display};

/// A value produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Token {
    Integer(i64),
    Decimal(f64),
    Percentage(i64),
    String(String),
    Reference(Reference),
    Boolean(bool),
}

impl Token {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Token::Integer(_) => "an integer",
            Token::Decimal(_) => "a decimal",
            Token::Percentage(_) => "a percentage",
            Token::String(_) => "a string",
            Token::Reference(_) => "a reference",
            Token::Boolean(_) => "a boolean",
        }
    }

    /// Integer-like tokens: integers, percentages and booleans.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Token::Integer(value) | Token::Percentage(value) => Some(*value),
            Token::Boolean(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Token::Decimal(value) => Some(*value),
            Token::Integer(value) | Token::Percentage(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Token::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Token::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Token::Integer(value) | Token::Percentage(value) => *value != 0,
            Token::Decimal(value) => *value != 0.0,
            Token::String(value) => !value.is_empty(),
            Token::Reference(reference) => !reference.is_any() && !reference.is_auto(),
            Token::Boolean(value) => *value,
        }
    }

    /// The literal a lexeme denotes, if it is one.
    pub fn from_lexeme(lexeme: &Lexeme) -> Option<Token> {
        match (lexeme.kind, &lexeme.value) {
            (LexemeKind::Integer, Some(LexemeValue::Integer(value))) => Some(Token::Integer(*value)),
            (LexemeKind::Percentage, Some(LexemeValue::Integer(value))) => {
                Some(Token::Percentage(*value))
            }
            (LexemeKind::Decimal, Some(LexemeValue::Decimal(value))) => Some(Token::Decimal(*value)),
            (LexemeKind::Reference, Some(LexemeValue::Reference(reference))) => {
                Some(Token::Reference(reference.clone()))
            }
            (LexemeKind::String, _) => Some(Token::String(lexeme.text.clone())),
            (LexemeKind::Identifier, _) if lexeme.text == "true" => Some(Token::Boolean(true)),
            (LexemeKind::Identifier, _) if lexeme.text == "false" => Some(Token::Boolean(false)),
            _ => None,
        }
    }

    /// A literal lexeme for this value, positioned over `origin`.
    pub fn to_lexeme(&self, origin: &Lexeme) -> Lexeme {
        let (kind, value) = match self {
            Token::Integer(value) => (LexemeKind::Integer, Some(LexemeValue::Integer(*value))),
            Token::Percentage(value) => {
                (LexemeKind::Percentage, Some(LexemeValue::Integer(*value)))
            }
            Token::Decimal(value) => (LexemeKind::Decimal, Some(LexemeValue::Decimal(*value))),
            Token::Reference(reference) => (
                LexemeKind::Reference,
                Some(LexemeValue::Reference(reference.clone())),
            ),
            Token::String(_) => (LexemeKind::String, None),
            Token::Boolean(_) => (LexemeKind::Identifier, None),
        };
        Lexeme::synthesized(kind, self.to_string(), value, origin)
    }

    pub fn apply_unary(self, op: UnaryOp) -> Result<Token, InterpreterError> {
        let invalid = |operand: &Token| InterpreterError::InvalidOperand {
            operator: op.symbol().to_string(),
            operand: operand.kind_name().to_string(),
        };
        match (op, self) {
            (UnaryOp::Negate, Token::Integer(value)) => value
                .checked_neg()
                .map(Token::Integer)
                .ok_or_else(|| overflow(op.symbol())),
            (UnaryOp::Negate, Token::Percentage(value)) => value
                .checked_neg()
                .map(Token::Percentage)
                .ok_or_else(|| overflow(op.symbol())),
            (UnaryOp::Negate, Token::Decimal(value)) => Ok(Token::Decimal(-value)),
            (UnaryOp::BitNot, Token::Integer(value)) => Ok(Token::Integer(!value)),
            (UnaryOp::Not, Token::Boolean(value)) => Ok(Token::Boolean(!value)),
            (UnaryOp::Not, Token::Integer(value)) => Ok(Token::Boolean(value == 0)),
            (_, operand) => Err(invalid(&operand)),
        }
    }

    pub fn apply_binary(self, op: BinaryOp, rhs: Token) -> Result<Token, InterpreterError> {
        match (self, rhs) {
            (Token::String(lhs), rhs) if op == BinaryOp::Add => {
                Ok(Token::String(format!("{lhs}{rhs}")))
            }
            (lhs, Token::String(rhs)) if op == BinaryOp::Add => {
                Ok(Token::String(format!("{lhs}{rhs}")))
            }
            (Token::Boolean(lhs), Token::Boolean(rhs)) => match op {
                BinaryOp::And => Ok(Token::Boolean(lhs && rhs)),
                BinaryOp::Or => Ok(Token::Boolean(lhs || rhs)),
                BinaryOp::Xor => Ok(Token::Boolean(lhs ^ rhs)),
                _ => Err(invalid_operands(op, &Token::Boolean(lhs), &Token::Boolean(rhs))),
            },
            (Token::Reference(reference), Token::Integer(offset))
                if matches!(op, BinaryOp::Add | BinaryOp::Subtract) =>
            {
                let shifted = if op == BinaryOp::Add {
                    reference.id().checked_add(offset)
                } else {
                    reference.id().checked_sub(offset)
                };
                let id = shifted.ok_or_else(|| overflow(op.symbol()))?;
                Ok(Token::Reference(reference.with_id(id)))
            }
            (lhs @ Token::Decimal(_), rhs) | (lhs, rhs @ Token::Decimal(_)) => {
                decimal_arithmetic(op, lhs, rhs)
            }
            (lhs, rhs) => integer_arithmetic(op, lhs, rhs),
        }
    }
}

fn overflow(operator: &str) -> InterpreterError {
    InterpreterError::Overflow {
        operator: operator.to_string(),
    }
}

fn invalid_operands(op: BinaryOp, lhs: &Token, rhs: &Token) -> InterpreterError {
    InterpreterError::InvalidOperands {
        operator: op.symbol().to_string(),
        lhs: lhs.kind_name().to_string(),
        rhs: rhs.kind_name().to_string(),
    }
}

fn decimal_arithmetic(op: BinaryOp, lhs: Token, rhs: Token) -> Result<Token, InterpreterError> {
    let (Some(a), Some(b)) = (lhs.as_decimal(), rhs.as_decimal()) else {
        return Err(invalid_operands(op, &lhs, &rhs));
    };
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide if b == 0.0 => return Err(InterpreterError::DivisionByZero),
        BinaryOp::Divide => a / b,
        BinaryOp::Remainder if b == 0.0 => return Err(InterpreterError::DivisionByZero),
        BinaryOp::Remainder => a % b,
        _ => return Err(invalid_operands(op, &lhs, &rhs)),
    };
    Ok(Token::Decimal(value))
}

fn integer_arithmetic(op: BinaryOp, lhs: Token, rhs: Token) -> Result<Token, InterpreterError> {
    let (a, b) = match (&lhs, &rhs) {
        (
            Token::Integer(a) | Token::Percentage(a),
            Token::Integer(b) | Token::Percentage(b),
        ) => (*a, *b),
        _ => return Err(invalid_operands(op, &lhs, &rhs)),
    };
    let value = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Subtract => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide | BinaryOp::Remainder if b == 0 => {
            return Err(InterpreterError::DivisionByZero)
        }
        BinaryOp::Divide => a.checked_div(b),
        BinaryOp::Remainder => a.checked_rem(b),
        BinaryOp::And => Some(a & b),
        BinaryOp::Or => Some(a | b),
        BinaryOp::Xor => Some(a ^ b),
        BinaryOp::ShiftLeft => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
        BinaryOp::ShiftRight => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
    }
    .ok_or_else(|| overflow(op.symbol()))?;

    match (lhs, rhs) {
        (Token::Percentage(_), Token::Percentage(_)) => Ok(Token::Percentage(value)),
        _ => Ok(Token::Integer(value)),
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Integer(value) => write!(f, "{value}"),
            Token::Decimal(value) => write!(f, "{value}"),
            Token::Percentage(value) => write!(f, "{value}%"),
            Token::String(value) => f.write_str(value),
            Token::Reference(reference) => write!(f, "{reference}"),
            Token::Boolean(value) => write!(f, "{value}"),
        }
    }
}
