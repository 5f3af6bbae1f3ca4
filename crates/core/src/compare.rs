//! Comparison operators for simple conditions.

use crate::pattern::like;
use crate::value::Value;
use core::cmp::Ordering;

/// A binary comparison between a column value and a literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    /// Evaluates the comparison.
    ///
    /// Any Null operand makes the comparison false, including `Ne`,
    /// matching SQL three-valued logic collapsed to a boolean.
    pub fn eval(&self, left: &Value, right: &Value) -> bool {
        if left.is_null() || right.is_null() {
            return false;
        }
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left.compare(right) == Ordering::Less,
            CompareOp::Le => left.compare(right) != Ordering::Greater,
            CompareOp::Gt => left.compare(right) == Ordering::Greater,
            CompareOp::Ge => left.compare(right) != Ordering::Less,
            CompareOp::Like => match (left.as_str(), right.as_str()) {
                (Some(value), Some(pattern)) => like(value, pattern),
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_ops() {
        assert!(CompareOp::Lt.eval(&Value::Int(1), &Value::Int(2)));
        assert!(CompareOp::Ge.eval(&Value::Int(2), &Value::Int(2)));
        assert!(!CompareOp::Gt.eval(&Value::Int(2), &Value::Int(2)));
        assert!(CompareOp::Ne.eval(&Value::from("a"), &Value::from("b")));
    }

    #[test]
    fn test_null_never_matches() {
        assert!(!CompareOp::Eq.eval(&Value::Null, &Value::Null));
        assert!(!CompareOp::Ne.eval(&Value::Null, &Value::Int(1)));
    }

    #[test]
    fn test_like() {
        assert!(CompareOp::Like.eval(&Value::from("hello"), &Value::from("h%")));
        assert!(!CompareOp::Like.eval(&Value::Int(5), &Value::from("%")));
    }
}
