//! Element types, shapes, and memory layouts for logical tensors.

use crate::{Error, Result};

/// Element type of a logical tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit IEEE float.
    F32,
    /// 32-bit signed integer.
    I32,
    /// Unspecified; must be resolved by type inference before planning.
    Undefined,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::Undefined => 0,
        }
    }
}

/// Shape of a logical tensor.
///
/// Shapes start out `Unknown` for tensors produced inside the partition and
/// become `Static` once shape inference has run. External inputs must be
/// declared with static shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorShape {
    /// Fully known dimensions.
    Static(Vec<usize>),
    /// Not yet inferred.
    Unknown,
}

impl TensorShape {
    /// Get the dimensions if the shape is static.
    pub fn as_static(&self) -> Option<&[usize]> {
        match self {
            TensorShape::Static(dims) => Some(dims),
            TensorShape::Unknown => None,
        }
    }

    /// Get the dimensions, or an error if the shape is still unknown.
    pub fn dims(&self) -> Result<&[usize]> {
        self.as_static()
            .ok_or_else(|| Error::Shape("shape has not been inferred".to_string()))
    }

    /// Number of elements, if static.
    pub fn element_count(&self) -> Option<usize> {
        self.as_static().map(|dims| dims.iter().product())
    }
}

/// Memory layout of a tensor.
///
/// Tensors carry `Any` until layout propagation picks a concrete layout.
/// After propagation every planned tensor is `Strided` with element strides
/// in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// No layout chosen yet; producer/consumer preferences still open.
    Any,
    /// Concrete element strides, outermost dimension first.
    Strided(Vec<usize>),
}

impl Layout {
    /// Dense row-major strides for the given dimensions.
    pub fn contiguous(dims: &[usize]) -> Self {
        let mut strides = vec![1usize; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
        Layout::Strided(strides)
    }

    /// Whether a concrete layout has been chosen.
    pub fn is_concrete(&self) -> bool {
        matches!(self, Layout::Strided(_))
    }
}
