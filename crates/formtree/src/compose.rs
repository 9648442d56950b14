#![forbid(unsafe_code)]

//! Parent/child composition: a derived node for one container-valued field.
//!
//! [`derive`] builds a child [`FormNode`] from `parent[key]` and wires a
//! [`CompositionEdge`] between the two so edits flow both ways:
//!
//! - parent → child: a per-key listener on the parent pushes the field's
//!   container, nested errors and submission state into the child with
//!   [`FormNode::set_values`].
//! - child → parent: an any-change listener on the child pushes the child's
//!   values, dirtiness and errors into the parent with
//!   [`FormNode::set_value_internal`].
//!
//! # Usage
//!
//! ```
//! use formtree::{derive, list, map, FormNode, Value};
//!
//! let form = FormNode::new(map! { "tags" => list!["a", "b"] }, map! { "tags" => list!["a", "b"] })?;
//! let tags = derive(&form, "tags")?;
//!
//! tags.set_value(1usize, "c")?;
//! assert_eq!(form.value("tags"), Some(Value::from(list!["a", "c"])));
//! assert!(form.is_dirty());
//! # Ok::<(), formtree::FormError>(())
//! ```
//!
//! # Invariants
//!
//! 1. Each side pushes with the *other* side's subscription id as the skip
//!    token, so one originating change crosses the edge exactly once and never
//!    bounces back.
//! 2. Both callbacks hold their nodes weakly; the edge never keeps a node
//!    alive and parent and child never form an `Rc` cycle.
//! 3. Dropping a [`ChildNode`] (or calling [`ChildNode::teardown`])
//!    unregisters both subscriptions and drops the parent's dirty/error
//!    entries for the field.
//! 4. The child's values container is a distinct allocation from the one
//!    stored in the parent after any child-side write (copy-on-write).
//!
//! # Failure Modes
//!
//! - Parent field is not a container when derived or pushed down:
//!   [`FormError::NotAContainer`], propagated to the caller that triggered
//!   the push.
//! - Parent field changes container kind: [`FormError::KindMismatch`] from
//!   the child's bulk replace.
//! - Teardown inside `Drop` fails: logged with `tracing::error!`, since
//!   `Drop` cannot return it. Use [`ChildNode::teardown`] to observe it.
//!
//! Termination is guaranteed for this one-hop shape (and chains of it).
//! Listener graphs beyond that need their own cycle detection.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::error::{FormError, Result};
use crate::node::{FormNode, WeakFormNode};
use crate::registry::{Callback, Change, SubscriptionId, Topic};
use crate::validate::{ErrorMap, FieldError, Validator};
use crate::value::{Container, FieldKey, Value};

// ---------------------------------------------------------------------------
// CompositionEdge
// ---------------------------------------------------------------------------

/// The pair of subscriptions linking a parent field to its child node.
///
/// Each id is the other direction's skip token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositionEdge {
    key: FieldKey,
    parent_key: SubscriptionId,
    child_any: SubscriptionId,
}

impl CompositionEdge {
    #[must_use]
    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    /// The parent's per-key subscription (parent → child).
    #[must_use]
    pub fn parent_subscription(&self) -> SubscriptionId {
        self.parent_key
    }

    /// The child's any-change subscription (child → parent).
    #[must_use]
    pub fn child_subscription(&self) -> SubscriptionId {
        self.child_any
    }
}

// ---------------------------------------------------------------------------
// ChildNode
// ---------------------------------------------------------------------------

/// A derived node plus the edge that keeps it in sync with its parent.
///
/// Dereferences to the child [`FormNode`]. Dropping it tears the edge down.
pub struct ChildNode {
    node: FormNode,
    parent: FormNode,
    key: FieldKey,
    edge: Option<CompositionEdge>,
}

impl ChildNode {
    #[must_use]
    pub fn node(&self) -> &FormNode {
        &self.node
    }

    #[must_use]
    pub fn parent(&self) -> &FormNode {
        &self.parent
    }

    /// The parent field this child mirrors.
    #[must_use]
    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    #[must_use]
    pub fn edge(&self) -> Option<&CompositionEdge> {
        self.edge.as_ref()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.edge.is_some()
    }

    /// Release the edge now and report any error raised while notifying the
    /// parent's listeners.
    ///
    /// # Errors
    ///
    /// Any violation raised by a parent listener during
    /// [`FormNode::unset_value`].
    pub fn teardown(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let Some(edge) = self.edge.take() else {
            return Ok(());
        };
        self.parent
            .unlisten(&Topic::Key(edge.key.clone()), edge.parent_key);
        self.node.unlisten(&Topic::Any, edge.child_any);
        tracing::debug!(
            parent = %self.parent.id(),
            child = %self.node.id(),
            key = %edge.key,
            "composition edge released"
        );
        self.parent.unset_value(edge.key)
    }
}

impl Deref for ChildNode {
    type Target = FormNode;

    fn deref(&self) -> &FormNode {
        &self.node
    }
}

impl Drop for ChildNode {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::error!(%err, key = %self.key, "composition edge teardown failed");
        }
    }
}

impl fmt::Debug for ChildNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildNode")
            .field("parent", &self.parent.id())
            .field("key", &self.key)
            .field("edge", &self.edge)
            .field("node", &self.node)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// derive
// ---------------------------------------------------------------------------

/// Derive a child node for the container-valued field `key` of `parent`.
///
/// The child starts from a shallow copy of `parent[key]`, with the parent's
/// default for that field as its baseline (or the current value when there is
/// no container default of the same kind). It inherits the parent's config
/// and submission state, starts with the parent's nested errors for the
/// field, and validates by delegating to the parent's validator.
///
/// # Errors
///
/// [`FormError::NotAContainer`] when `parent[key]` is missing or a scalar.
pub fn derive(parent: &FormNode, key: impl Into<FieldKey>) -> Result<ChildNode> {
    let key = key.into();
    let _span = tracing::debug_span!("derive", parent = %parent.id(), %key).entered();

    let values = field_container(parent, &key)?;
    let defaults = match parent.default_value(&key) {
        Some(Value::Container(defaults)) if defaults.kind() == values.kind() => defaults,
        _ => values.clone(),
    };
    let node = FormNode::builder(values.shallow_copy(), defaults)
        .config(parent.config().clone())
        .validator(delegate_to_parent(parent.downgrade(), key.clone()))
        .state(parent.state())
        .errors(FieldError::into_nested(parent.error(&key)))
        .build()?;

    // Two-pass wiring: the parent-side closure learns the child-side id
    // through this slot once the child side is registered.
    let child_any_slot = Rc::new(Cell::new(None));
    let parent_key = parent.listen_raw(
        Topic::Key(key.clone()),
        push_down(
            parent.downgrade(),
            node.downgrade(),
            key.clone(),
            Rc::clone(&child_any_slot),
        ),
    );
    let child_any = node.listen_raw(
        Topic::Any,
        push_up(parent.downgrade(), node.downgrade(), key.clone(), parent_key),
    );
    child_any_slot.set(Some(child_any));

    tracing::debug!(child = %node.id(), %parent_key, %child_any, "composition edge wired");
    Ok(ChildNode {
        node,
        parent: parent.clone(),
        key: key.clone(),
        edge: Some(CompositionEdge {
            key,
            parent_key,
            child_any,
        }),
    })
}

impl FormNode {
    /// Method form of [`derive`].
    ///
    /// # Errors
    ///
    /// Same as [`derive`].
    pub fn derive(&self, key: impl Into<FieldKey>) -> Result<ChildNode> {
        derive(self, key)
    }
}

fn field_container(parent: &FormNode, key: &FieldKey) -> Result<Container> {
    match parent.value(key) {
        Some(Value::Container(container)) => Ok(container),
        _ => Err(FormError::NotAContainer {
            node: parent.id(),
            key: key.clone(),
        }),
    }
}

fn push_down(
    parent: WeakFormNode,
    child: WeakFormNode,
    key: FieldKey,
    skip: Rc<Cell<Option<SubscriptionId>>>,
) -> Callback {
    Rc::new(move |change: &Change| {
        let (Some(parent), Some(child)) = (parent.upgrade(), child.upgrade()) else {
            return Ok(());
        };
        let values = field_container(&parent, &key)?;
        let errors = FieldError::into_nested(parent.error(&key));
        tracing::trace!(parent = %parent.id(), child = %child.id(), %key, "push down");
        child.set_values(
            values,
            Some(errors),
            change.is_default,
            Some(parent.state()),
            skip.get(),
        )
    })
}

fn push_up(
    parent: WeakFormNode,
    child: WeakFormNode,
    key: FieldKey,
    skip: SubscriptionId,
) -> Callback {
    Rc::new(move |_: &Change| {
        let (Some(parent), Some(child)) = (parent.upgrade(), child.upgrade()) else {
            return Ok(());
        };
        tracing::trace!(parent = %parent.id(), child = %child.id(), %key, "push up");
        parent.set_value_internal(
            key.clone(),
            Value::Container(child.values()),
            child.is_dirty(),
            Some(FieldError::Nested(child.errors())),
            Some(skip),
        )
    })
}

/// Validate a child by splicing its values into a copy of the parent's and
/// extracting the nested errors the parent's validator reports for `key`.
fn delegate_to_parent(parent: WeakFormNode, key: FieldKey) -> Validator {
    Validator::new(move |child_values| {
        let Some(parent) = parent.upgrade() else {
            return ErrorMap::new();
        };
        let mut spliced = parent.values();
        spliced.set(key.clone(), Value::Container(child_values.clone()));
        FieldError::into_nested(parent.validator().validate(&spliced).remove(&key))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
