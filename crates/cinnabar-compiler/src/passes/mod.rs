//! Graph rewrite passes.
//!
//! Each pass has the pipeline signature: subgraph in, rewritten subgraph
//! out. Passes are pure graph-to-graph rewrites; memory planning and kernel
//! resolution live in their own modules and are appended to the same
//! pipeline by the compiler entry point.

mod canonicalize;
mod fuse;
mod infer;
mod layout;
mod lower;
mod simplify;

pub use canonicalize::{canonicalize_broadcasts, canonicalize_operand_order};
pub use fuse::{fuse_post_ops, FusionConfig};
pub use infer::{infer_shapes, infer_types};
pub use layout::propagate_layouts;
pub use lower::lower_composites;
pub use simplify::simplify_algebra;
