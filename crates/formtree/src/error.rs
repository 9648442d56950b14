#![forbid(unsafe_code)]

//! Fatal errors raised by node operations.
//!
//! Every [`FormError`] is an invariant violation: continuing would leave the
//! dirty/error bookkeeping of some node inconsistent, so the error is returned
//! to the caller of the outermost mutator instead of being absorbed.
//!
//! Two other error classes never show up here:
//!
//! - Validation errors are data. They live in a node's error map as
//!   [`FieldError`](crate::FieldError) values.
//! - Usage errors (unregistering an unknown subscription, an out-of-range
//!   sequence index) are reported with `tracing::warn!` and the call becomes a
//!   no-op.

use crate::node::NodeId;
use crate::value::{ContainerKind, FieldKey};

/// Invariant violation raised by a node operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    /// A field that must hold a list or map holds a scalar or is missing.
    #[error("{node}: field `{key}` does not hold a list or map")]
    NotAContainer { node: NodeId, key: FieldKey },

    /// A container of the wrong kind was supplied for a node.
    #[error("{node}: expected a {expected} container, found a {found}")]
    KindMismatch {
        node: NodeId,
        expected: ContainerKind,
        found: ContainerKind,
    },

    /// A key of the wrong kind was used to address a container.
    #[error("{node}: key `{key}` cannot address a {kind} container")]
    KeyMismatch {
        node: NodeId,
        key: FieldKey,
        kind: ContainerKind,
    },

    /// A list write addressed an index past the end of the list. Writing at
    /// `len` appends; anything further is rejected.
    #[error("{node}: index {index} is out of range for a list of length {len}")]
    IndexOutOfRange {
        node: NodeId,
        index: usize,
        len: usize,
    },

    /// A sequence operation was invoked on a map-valued node.
    #[error("{node}: sequence operation on a map container")]
    NotASequence { node: NodeId },
}

impl FormError {
    /// The node the violation was detected on.
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::NotAContainer { node, .. }
            | Self::KindMismatch { node, .. }
            | Self::KeyMismatch { node, .. }
            | Self::IndexOutOfRange { node, .. }
            | Self::NotASequence { node } => *node,
        }
    }
}

/// Result alias for node operations.
pub type Result<T, E = FormError> = std::result::Result<T, E>;
