//! Logical tensors: the values flowing between operator nodes.

use crate::types::{DataType, Layout, TensorShape};

/// Stable identifier for a logical tensor within one partition.
///
/// Indexes into the `SubgraphIr` tensor side-table and remains valid across
/// graph mutations (node insertion/removal never renumbers tensors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub usize);

impl TensorId {
    /// Create a new tensor ID.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Role of a tensor with respect to the partition boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorRole {
    /// Declared external input; aliases a caller-supplied handle.
    Input,
    /// Declared external output; aliases a caller-supplied handle.
    Output,
    /// Produced and consumed inside the partition.
    Internal,
}

/// Compile-time data carried by a tensor.
///
/// Constant tensors (weights, folded values) are materialized into the
/// persistent internal arena when an execution args set is instantiated;
/// runtime tensors get their storage from the caller or the scratchpad.
#[derive(Debug, Clone)]
pub enum TensorData {
    /// Value arrives at runtime.
    Runtime,
    /// Raw little-endian bytes known at compile time.
    Constant(Vec<u8>),
}

/// A logical tensor: identity, element type, shape, layout, and role.
///
/// Immutable once finalized by shape/type inference and layout propagation;
/// passes before that point fill in `shape`, `dtype`, and `layout`.
#[derive(Debug, Clone)]
pub struct LogicalTensor {
    /// Tensor name (unique within the partition, may be empty).
    pub name: String,

    /// Element type.
    pub dtype: DataType,

    /// Shape (static once inference has run).
    pub shape: TensorShape,

    /// Memory layout (concrete once layout propagation has run).
    pub layout: Layout,

    /// Role with respect to the partition boundary.
    pub role: TensorRole,

    /// Compile-time data, if any.
    pub data: TensorData,
}

impl LogicalTensor {
    /// Create a runtime tensor with no data.
    pub fn new(name: String, dtype: DataType, shape: TensorShape, role: TensorRole) -> Self {
        Self {
            name,
            dtype,
            shape,
            layout: Layout::Any,
            role,
            data: TensorData::Runtime,
        }
    }

    /// Create an internal tensor carrying a compile-time constant.
    pub fn with_constant(name: String, dtype: DataType, shape: TensorShape, bytes: Vec<u8>) -> Self {
        Self {
            name,
            dtype,
            shape,
            layout: Layout::Any,
            role: TensorRole::Internal,
            data: TensorData::Constant(bytes),
        }
    }

    /// Whether this tensor holds a compile-time constant.
    pub fn is_constant(&self) -> bool {
        matches!(self.data, TensorData::Constant(_))
    }

    /// Get the constant bytes, if any.
    pub fn constant_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            TensorData::Constant(bytes) => Some(bytes),
            TensorData::Runtime => None,
        }
    }

    /// Size of this tensor in bytes, if the shape is static.
    pub fn size_bytes(&self) -> Option<usize> {
        self.shape
            .element_count()
            .map(|count| count * self.dtype.size())
    }
}
