#![forbid(unsafe_code)]

//! Per-key and any-change listener bookkeeping with synchronous dispatch.
//!
//! # Dispatch
//!
//! Every `fire*` call first snapshots the callbacks it is going to deliver,
//! releases its internal borrow, then invokes them in registration order:
//! per-key callbacks before any-change callbacks. Callbacks are therefore free
//! to register, unregister, or mutate the owning node while being delivered.
//!
//! # Invariants
//!
//! 1. Registration or unregistration during a dispatch only affects later
//!    dispatches; the in-flight one delivers exactly its snapshot.
//! 2. A dispatch never delivers to the subscription passed as `skip`.
//! 3. Subscription ids are unique per registry and never reused.
//! 4. The first callback error stops the dispatch and is returned.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Unknown key on unregister | Key never had listeners | `warn!`, returns `false` |
//! | Unknown id on unregister | Already removed / foreign id | `warn!`, returns `false` |
//! | Callback error | Invariant violation in a nested setter | Propagated, rest skipped |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::error::Result;
use crate::node::NodeId;
use crate::value::FieldKey;

/// Opaque handle returned by a registration, used only to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// What a subscription listens to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Changes to one field.
    Key(FieldKey),
    /// Every change to the node.
    Any,
}

impl Topic {
    pub fn key(key: impl Into<FieldKey>) -> Self {
        Self::Key(key.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "key {key}"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// The kind of mutation that triggered a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeScope {
    /// A single field was set.
    Field,
    /// The whole values container was replaced.
    Bulk,
    /// Only the error map changed.
    Errors,
    /// Only the submission state changed.
    State,
    /// A field's dirty/error entries were dropped.
    Unset,
}

/// Payload handed to every listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// The field that changed, for single-field changes.
    pub key: Option<FieldKey>,
    pub scope: ChangeScope,
    /// The change came from replacing the node's default values.
    pub is_default: bool,
}

impl Change {
    #[must_use]
    pub fn field(key: FieldKey) -> Self {
        Self {
            key: Some(key),
            scope: ChangeScope::Field,
            is_default: false,
        }
    }

    #[must_use]
    pub fn bulk(is_default: bool) -> Self {
        Self {
            key: None,
            scope: ChangeScope::Bulk,
            is_default,
        }
    }

    #[must_use]
    pub fn errors(key: Option<FieldKey>) -> Self {
        Self {
            key,
            scope: ChangeScope::Errors,
            is_default: false,
        }
    }

    #[must_use]
    pub fn state() -> Self {
        Self {
            key: None,
            scope: ChangeScope::State,
            is_default: false,
        }
    }

    #[must_use]
    pub fn unset(key: FieldKey) -> Self {
        Self {
            key: Some(key),
            scope: ChangeScope::Unset,
            is_default: false,
        }
    }

    /// True when values are untouched and only errors changed.
    #[must_use]
    pub fn is_errors_only(&self) -> bool {
        self.scope == ChangeScope::Errors
    }
}

pub(crate) type Callback = Rc<dyn Fn(&Change) -> Result<()>>;

type Entries = Vec<(SubscriptionId, Callback)>;

#[derive(Default)]
struct Slots {
    keyed: AHashMap<FieldKey, Entries>,
    any: Entries,
}

/// Listener storage for one node.
pub struct ListenerRegistry {
    owner: NodeId,
    next_id: Cell<u64>,
    slots: RefCell<Slots>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new(owner: NodeId) -> Self {
        Self {
            owner,
            next_id: Cell::new(0),
            slots: RefCell::new(Slots::default()),
        }
    }

    fn allocate(&self) -> SubscriptionId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        SubscriptionId(id)
    }

    /// Listen for changes to `key`.
    pub fn register_key(
        &self,
        key: FieldKey,
        callback: impl Fn(&Change) -> Result<()> + 'static,
    ) -> SubscriptionId {
        self.register_key_rc(key, Rc::new(callback))
    }

    pub(crate) fn register_key_rc(&self, key: FieldKey, callback: Callback) -> SubscriptionId {
        let id = self.allocate();
        self.slots
            .borrow_mut()
            .keyed
            .entry(key)
            .or_default()
            .push((id, callback));
        id
    }

    /// Listen for every change.
    pub fn register_any(&self, callback: impl Fn(&Change) -> Result<()> + 'static) -> SubscriptionId {
        self.register_any_rc(Rc::new(callback))
    }

    pub(crate) fn register_any_rc(&self, callback: Callback) -> SubscriptionId {
        let id = self.allocate();
        self.slots.borrow_mut().any.push((id, callback));
        id
    }

    /// Remove a per-key subscription. Unknown keys or ids are a usage error:
    /// logged, then ignored.
    pub fn unregister_key(&self, key: &FieldKey, id: SubscriptionId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let Some(entries) = slots.keyed.get_mut(key) else {
            tracing::warn!(node = %self.owner, %key, %id, "unregister on a key with no listeners");
            return false;
        };
        let before = entries.len();
        entries.retain(|(sid, _)| *sid != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            slots.keyed.remove(key);
        }
        if !removed {
            tracing::warn!(node = %self.owner, %key, %id, "unregister of an unknown subscription");
        }
        removed
    }

    /// Remove an any-change subscription.
    pub fn unregister_any(&self, id: SubscriptionId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.any.len();
        slots.any.retain(|(sid, _)| *sid != id);
        let removed = slots.any.len() != before;
        if !removed {
            tracing::warn!(node = %self.owner, %id, "unregister of an unknown any-listener");
        }
        removed
    }

    pub fn unregister(&self, topic: &Topic, id: SubscriptionId) -> bool {
        match topic {
            Topic::Key(key) => self.unregister_key(key, id),
            Topic::Any => self.unregister_any(id),
        }
    }

    /// Deliver to the listeners of `key`, then to the any-change listeners.
    pub fn fire(&self, key: &FieldKey, skip: Option<SubscriptionId>, change: &Change) -> Result<usize> {
        self.fire_many(std::slice::from_ref(key), skip, change)
    }

    /// Deliver to the listeners of each key in order, then once to the
    /// any-change listeners.
    pub fn fire_many(
        &self,
        keys: &[FieldKey],
        skip: Option<SubscriptionId>,
        change: &Change,
    ) -> Result<usize> {
        let batch = {
            let slots = self.slots.borrow();
            let mut batch = Vec::new();
            for key in keys {
                if let Some(entries) = slots.keyed.get(key) {
                    collect(entries, skip, &mut batch);
                }
            }
            collect(&slots.any, skip, &mut batch);
            batch
        };
        self.deliver(batch, change)
    }

    /// Deliver to the listeners of each key, without any-change listeners.
    pub fn fire_keys(
        &self,
        keys: &[FieldKey],
        skip: Option<SubscriptionId>,
        change: &Change,
    ) -> Result<usize> {
        let batch = {
            let slots = self.slots.borrow();
            let mut batch = Vec::new();
            for key in keys {
                if let Some(entries) = slots.keyed.get(key) {
                    collect(entries, skip, &mut batch);
                }
            }
            batch
        };
        self.deliver(batch, change)
    }

    /// Deliver to every per-key listener, keys in key order.
    pub fn fire_all_keys(&self, skip: Option<SubscriptionId>, change: &Change) -> Result<usize> {
        let keys = self.registered_keys();
        self.fire_keys(&keys, skip, change)
    }

    /// Deliver to the any-change listeners only.
    pub fn fire_any(&self, skip: Option<SubscriptionId>, change: &Change) -> Result<usize> {
        let batch = {
            let slots = self.slots.borrow();
            let mut batch = Vec::new();
            collect(&slots.any, skip, &mut batch);
            batch
        };
        self.deliver(batch, change)
    }

    fn deliver(&self, batch: Vec<Callback>, change: &Change) -> Result<usize> {
        let count = batch.len();
        for callback in batch {
            callback(change)?;
        }
        if count > 0 {
            tracing::trace!(
                node = %self.owner,
                scope = ?change.scope,
                key = ?change.key,
                delivered = count,
                "dispatched change"
            );
        }
        Ok(count)
    }

    /// Keys that currently have at least one listener, sorted.
    #[must_use]
    pub fn registered_keys(&self) -> Vec<FieldKey> {
        let mut keys: Vec<_> = self.slots.borrow().keyed.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn key_listener_count(&self, key: &FieldKey) -> usize {
        self.slots.borrow().keyed.get(key).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn any_listener_count(&self) -> usize {
        self.slots.borrow().any.len()
    }
}

fn collect(entries: &[(SubscriptionId, Callback)], skip: Option<SubscriptionId>, out: &mut Vec<Callback>) {
    out.extend(
        entries
            .iter()
            .filter(|(id, _)| Some(*id) != skip)
            .map(|(_, cb)| Rc::clone(cb)),
    );
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.borrow();
        f.debug_struct("ListenerRegistry")
            .field("owner", &self.owner)
            .field("keys", &slots.keyed.len())
            .field("any", &slots.any.len())
            .finish()
    }
}
