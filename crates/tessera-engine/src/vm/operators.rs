//! Unary and binary operators on runtime values.
//!
//! Integer arithmetic is checked; overflow and division by zero are runtime
//! errors. Mixed integer/float operands are computed as floats.

use crate::ast::{BinaryOp, UnaryOp};
use crate::runtime::value::Value;
use std::cmp::Ordering;

/// Applies a prefix operator.
pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, String> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string()),
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::BitNot, Value::Int(n)) => Ok(Value::Int(!n)),
        (op, v) => Err(format!(
            "invalid operation: {}{}",
            op.symbol(),
            v.type_name()
        )),
    }
}

/// Applies an infix operator.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => return Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(lhs, rhs).ok_or_else(|| mismatch(op, lhs, rhs))?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => integer(op, *a, *b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            float(op, to_float(lhs), to_float(rhs)).ok_or_else(|| mismatch(op, lhs, rhs))?
        }
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => {
            Ok(Value::Str(format!("{}{}", a, b)))
        }
        (Value::Str(a), other) if op == BinaryOp::Add => Ok(Value::Str(format!("{}{}", a, other))),
        (Value::Slice(a), Value::Slice(b)) if op == BinaryOp::Add => {
            let mut items = a.read().clone();
            items.extend(b.read().iter().cloned());
            Ok(Value::slice(items))
        }
        _ => Err(mismatch(op, lhs, rhs)),
    }
}

/// Orders two values of comparable kinds.
pub fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            to_float(lhs).partial_cmp(&to_float(rhs))
        }
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn integer(op: BinaryOp, a: i64, b: i64) -> Result<Value, String> {
    let overflow = || "integer overflow".to_string();
    let result = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err("division by zero".to_string()),
        BinaryOp::Div => a.checked_div(b).ok_or_else(overflow)?,
        BinaryOp::Rem => a.checked_rem(b).ok_or_else(overflow)?,
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::Shl | BinaryOp::Shr => {
            let shift = u32::try_from(b).map_err(|_| format!("negative shift count {}", b))?;
            let shifted = if op == BinaryOp::Shl {
                a.checked_shl(shift)
            } else {
                a.checked_shr(shift)
            };
            shifted.ok_or_else(|| format!("shift count {} too large", b))?
        }
        _ => return Err(format!("invalid operation: int {} int", op.symbol())),
    };
    Ok(Value::Int(result))
}

fn float(op: BinaryOp, a: f64, b: f64) -> Option<Result<Value, String>> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
            return Some(Err("division by zero".to_string()));
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return None,
    };
    Some(Ok(Value::Float(result)))
}

fn to_float(value: &Value) -> f64 {
    match value {
        Value::Int(n) => *n as f64,
        Value::Float(n) => *n,
        _ => f64::NAN,
    }
}

fn mismatch(op: BinaryOp, lhs: &Value, rhs: &Value) -> String {
    format!(
        "invalid operation: {} {} {}",
        lhs.type_name(),
        op.symbol(),
        rhs.type_name()
    )
}
