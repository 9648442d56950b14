#![forbid(unsafe_code)]

//! Reactive nested form state.
//!
//! This crate provides:
//! - [`FormNode`], an observable values tree with defaults, dirty tracking,
//!   per-field errors and submission state
//! - [`ListenerRegistry`] with per-key and any-change subscriptions
//! - [`derive`] to split a container-valued field into a child node kept in
//!   sync with its parent in both directions
//! - [`Validator`] and [`FieldRules`] for pluggable validation
//! - list operations ([`FormNode::append`], [`FormNode::remove`],
//!   [`FormNode::swap`], [`FormNode::move_item`], [`FormNode::clear`])
//!
//! # Example
//!
//! ```
//! use formtree::{derive, list, map, FieldRules, FormNode, Topic};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let initial = map! { "name" => "", "tags" => list!["rust"] };
//! let form = FormNode::builder(initial.clone(), initial)
//!     .validator(FieldRules::new().required("name", "required").build())
//!     .build()?;
//!
//! let changes = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&changes);
//! form.listen(Topic::Any, move |_| seen.set(seen.get() + 1));
//!
//! let tags = derive(&form, "tags")?;
//! tags.append("forms")?;
//! assert_eq!(changes.get(), 1);
//! assert!(form.is_dirty());
//!
//! assert!(!form.validate()?);
//! form.set_value("name", "Ada")?;
//! assert_eq!(form.submit(|f| f.values().len())?, Some(2));
//! # Ok::<(), formtree::FormError>(())
//! ```
//!
//! Nodes are single-threaded (`Rc` inside) and every notification is
//! delivered synchronously before the mutating call returns.

pub mod compose;
pub mod config;
pub mod error;
pub mod node;
pub mod registry;
pub mod sequence;
pub mod validate;
pub mod value;

pub use compose::{ChildNode, CompositionEdge, derive};
pub use config::FormConfig;
pub use error::{FormError, Result};
pub use node::{
    FormNode, FormNodeBuilder, NodeId, Snapshot, SubmissionState, Subscription, WeakFormNode,
};
pub use registry::{Change, ChangeScope, ListenerRegistry, SubscriptionId, Topic};
pub use validate::{ErrorMap, FieldError, FieldRules, Validator, normalize};
pub use value::{Container, ContainerKind, FieldKey, Value};
