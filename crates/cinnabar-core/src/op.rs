//! Operator kinds, attributes, and fused post-operations.

use std::collections::HashMap;
use std::fmt;

/// Kind tag of an operator node.
///
/// `SquaredDifference` is composite and is lowered to primitives before
/// planning. `Broadcast` nodes are inserted by broadcast canonicalization and
/// materialize an operand to the binary result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Reciprocal,
    Sigmoid,
    Relu,
    Swish,
    SquaredDifference,
    Broadcast,
}

impl OpKind {
    /// Whether this is a two-input elementwise operator.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div | OpKind::Max | OpKind::Min
        )
    }

    /// Whether this is a one-input elementwise operator.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            OpKind::Reciprocal | OpKind::Sigmoid | OpKind::Relu | OpKind::Swish
        )
    }

    /// Whether operand order does not affect the result.
    pub fn is_commutative(&self) -> bool {
        matches!(self, OpKind::Add | OpKind::Mul | OpKind::Max | OpKind::Min)
    }

    /// Number of data operands, excluding any post-op operands appended by
    /// fusion.
    pub fn data_input_count(&self) -> usize {
        match self {
            OpKind::Reciprocal
            | OpKind::Sigmoid
            | OpKind::Relu
            | OpKind::Swish
            | OpKind::Broadcast => 1,
            _ => 2,
        }
    }

    /// Whether the first data operand may alias the output.
    ///
    /// All primitive elementwise kinds read each element before writing it,
    /// so src0 and dst may share storage. `Broadcast` reads src0 at a
    /// different index than it writes dst and must not alias.
    pub fn is_inplace_capable(&self) -> bool {
        self.is_binary() || self.is_unary()
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Operator-specific attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Float(f32),
    Bool(bool),
    String(String),
}

impl AttrValue {
    /// Get the value as a list of integers.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttrValue::Ints(v) => Some(v),
            _ => None,
        }
    }
}

/// Attribute map attached to an operator node.
pub type AttrMap = HashMap<String, AttrValue>;

/// A follow-on operation folded into a preceding compute node.
///
/// Post-op fusion replaces `compute -> elementwise` chains with a single
/// node carrying the elementwise step here; the compute kernel applies it to
/// each output element before the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PostOp {
    /// Unary elementwise applied to the accumulator (e.g. Relu, Sigmoid).
    Eltwise(OpKind),
    /// Binary elementwise against an extra operand appended to the fused
    /// node's input list (e.g. bias add).
    Binary(OpKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(OpKind::Add.is_binary());
        assert!(OpKind::Add.is_commutative());
        assert!(!OpKind::Sub.is_commutative());
        assert!(OpKind::Sigmoid.is_unary());
        assert!(!OpKind::Broadcast.is_inplace_capable());
        assert!(OpKind::Div.is_inplace_capable());
    }
}
