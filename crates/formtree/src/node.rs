#![forbid(unsafe_code)]

//! The observable state node.
//!
//! A [`FormNode`] owns a values container, a default-values container of the
//! same kind, a dirty map, an error map and a [`SubmissionState`]. Every
//! mutation updates those, then notifies listeners synchronously before
//! returning.
//!
//! `FormNode` is a cheap, clonable handle (`Rc` inside); clones refer to the
//! same node. Nodes are single-threaded by construction.
//!
//! # Invariants
//!
//! 1. `values` and `default_values` are always the same [`ContainerKind`].
//! 2. `dirty[k]` is set directly by targeted setters and recomputed for
//!    scalar fields after a non-default bulk replace. A default replace
//!    clears it.
//! 3. The error map never holds a falsy entry.
//! 4. No internal borrow is held while a listener or the validator runs, so
//!    both may call back into any node.
//!
//! # Re-entrancy
//!
//! Listeners may call setters on the node that is notifying them. Termination
//! is only guaranteed for the one-hop parent/child shape wired by
//! [`derive`](crate::derive); arbitrary listener graphs need their own cycle
//! detection.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ulid::Ulid;

use crate::config::FormConfig;
use crate::error::{FormError, Result};
use crate::registry::{Callback, Change, ListenerRegistry, SubscriptionId, Topic};
use crate::validate::{ErrorMap, FieldError, Validator};
use crate::value::{Container, ContainerKind, FieldKey, Value};

/// Diagnostic identity of a node. Not used for equality of node contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(Ulid);

impl NodeId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Submission bookkeeping, broadcast like any other change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubmissionState {
    pub is_submitting: bool,
    pub submit_count: u32,
}

/// Point-in-time copy of everything a UI binding renders from.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub values: Container,
    pub default_values: Container,
    pub errors: ErrorMap,
    pub dirty: BTreeMap<FieldKey, bool>,
    pub is_dirty: bool,
    pub any_error: bool,
    pub state: SubmissionState,
}

struct Fields {
    values: Container,
    defaults: Container,
    dirty: BTreeMap<FieldKey, bool>,
    errors: ErrorMap,
    state: SubmissionState,
}

impl Fields {
    fn is_dirty(&self) -> bool {
        self.values.len() != self.defaults.len() || self.dirty.values().any(|d| *d)
    }
}

pub(crate) struct NodeInner {
    id: NodeId,
    config: FormConfig,
    fields: RefCell<Fields>,
    validator: RefCell<Validator>,
    listeners: ListenerRegistry,
}

/// Handle to an observable state node.
#[derive(Clone)]
pub struct FormNode {
    inner: Rc<NodeInner>,
}

/// Non-owning handle to a [`FormNode`].
#[derive(Clone)]
pub struct WeakFormNode {
    inner: Weak<NodeInner>,
}

impl WeakFormNode {
    #[must_use]
    pub fn upgrade(&self) -> Option<FormNode> {
        self.inner.upgrade().map(|inner| FormNode { inner })
    }
}

impl fmt::Debug for WeakFormNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakFormNode")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Builder for a [`FormNode`].
#[derive(Debug)]
pub struct FormNodeBuilder {
    values: Container,
    defaults: Container,
    validator: Validator,
    config: FormConfig,
    state: SubmissionState,
    errors: ErrorMap,
}

impl FormNodeBuilder {
    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn config(mut self, config: FormConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn state(mut self, state: SubmissionState) -> Self {
        self.state = state;
        self
    }

    /// Initial error map. Replaced by the validator's output when
    /// `validate_on_mount` is set.
    #[must_use]
    pub fn errors(mut self, errors: ErrorMap) -> Self {
        self.errors = errors;
        self
    }

    /// Build the node.
    ///
    /// # Errors
    ///
    /// [`FormError::KindMismatch`] when values and defaults are not the same
    /// container kind.
    pub fn build(self) -> Result<FormNode> {
        let id = NodeId::generate();
        if self.values.kind() != self.defaults.kind() {
            return Err(FormError::KindMismatch {
                node: id,
                expected: self.defaults.kind(),
                found: self.values.kind(),
            });
        }
        let errors = if self.config.validate_on_mount {
            self.validator.validate(&self.values)
        } else {
            crate::validate::normalize(self.errors)
        };
        tracing::debug!(node = %id, kind = %self.values.kind(), len = self.values.len(), "node created");
        Ok(FormNode {
            inner: Rc::new(NodeInner {
                id,
                config: self.config,
                fields: RefCell::new(Fields {
                    values: self.values,
                    defaults: self.defaults,
                    dirty: BTreeMap::new(),
                    errors,
                    state: self.state,
                }),
                validator: RefCell::new(self.validator),
                listeners: ListenerRegistry::new(id),
            }),
        })
    }
}

impl FormNode {
    /// Create a node with the default config and no validation.
    ///
    /// # Errors
    ///
    /// [`FormError::KindMismatch`] when the two containers differ in kind.
    pub fn new(values: Container, defaults: Container) -> Result<Self> {
        Self::builder(values, defaults).build()
    }

    #[must_use]
    pub fn builder(values: Container, defaults: Container) -> FormNodeBuilder {
        FormNodeBuilder {
            values,
            defaults,
            validator: Validator::none(),
            config: FormConfig::default(),
            state: SubmissionState::default(),
            errors: ErrorMap::new(),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakFormNode {
        WeakFormNode {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &FormNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    #[must_use]
    pub fn config(&self) -> &FormConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        self.inner.fields.borrow().values.kind()
    }

    /// The values container. Shares the node's allocation until either side
    /// writes.
    #[must_use]
    pub fn values(&self) -> Container {
        self.inner.fields.borrow().values.clone()
    }

    #[must_use]
    pub fn default_values(&self) -> Container {
        self.inner.fields.borrow().defaults.clone()
    }

    #[must_use]
    pub fn value(&self, key: impl Into<FieldKey>) -> Option<Value> {
        self.inner.fields.borrow().values.get(&key.into()).cloned()
    }

    #[must_use]
    pub fn default_value(&self, key: impl Into<FieldKey>) -> Option<Value> {
        self.inner.fields.borrow().defaults.get(&key.into()).cloned()
    }

    #[must_use]
    pub fn errors(&self) -> ErrorMap {
        self.inner.fields.borrow().errors.clone()
    }

    #[must_use]
    pub fn error(&self, key: impl Into<FieldKey>) -> Option<FieldError> {
        self.inner.fields.borrow().errors.get(&key.into()).cloned()
    }

    #[must_use]
    pub fn dirty(&self) -> BTreeMap<FieldKey, bool> {
        self.inner.fields.borrow().dirty.clone()
    }

    #[must_use]
    pub fn is_field_dirty(&self, key: impl Into<FieldKey>) -> bool {
        self.inner
            .fields
            .borrow()
            .dirty
            .get(&key.into())
            .copied()
            .unwrap_or(false)
    }

    /// Any field dirty, or a field added/removed relative to the defaults.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.fields.borrow().is_dirty()
    }

    #[must_use]
    pub fn any_error(&self) -> bool {
        !self.inner.fields.borrow().errors.is_empty()
    }

    #[must_use]
    pub fn state(&self) -> SubmissionState {
        self.inner.fields.borrow().state
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let fields = self.inner.fields.borrow();
        Snapshot {
            values: fields.values.clone(),
            default_values: fields.defaults.clone(),
            errors: fields.errors.clone(),
            dirty: fields.dirty.clone(),
            is_dirty: fields.is_dirty(),
            any_error: !fields.errors.is_empty(),
            state: fields.state,
        }
    }

    #[must_use]
    pub fn validator(&self) -> Validator {
        self.inner.validator.borrow().clone()
    }

    /// Swap the validator. Errors are not recomputed until the next change
    /// or an explicit [`validate`](Self::validate).
    pub fn set_validator(&self, validator: Validator) {
        *self.inner.validator.borrow_mut() = validator;
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Register a listener and return its id.
    pub fn listen(&self, topic: Topic, callback: impl Fn(&Change) + 'static) -> SubscriptionId {
        self.listen_raw(
            topic,
            Rc::new(move |change: &Change| {
                callback(change);
                Ok(())
            }),
        )
    }

    pub(crate) fn listen_raw(&self, topic: Topic, callback: Callback) -> SubscriptionId {
        match topic {
            Topic::Key(key) => self.inner.listeners.register_key_rc(key, callback),
            Topic::Any => self.inner.listeners.register_any_rc(callback),
        }
    }

    /// Remove a listener registered with [`listen`](Self::listen).
    pub fn unlisten(&self, topic: &Topic, id: SubscriptionId) -> bool {
        self.inner.listeners.unregister(topic, id)
    }

    /// Register a listener held by an RAII guard.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe(&self, topic: Topic, callback: impl Fn(&Change) + 'static) -> Subscription {
        let id = self.listen(topic.clone(), callback);
        Subscription {
            node: Rc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// The node's listener registry.
    #[must_use]
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Errors to store after a value change without an explicit payload;
    /// `None` keeps the current map.
    fn auto_errors(&self, values: &Container) -> Option<ErrorMap> {
        if !self.inner.config.validate_on_change {
            return None;
        }
        let validator = self.validator();
        Some(validator.validate(values))
    }

    fn rejected_key(&self, values: &Container, key: FieldKey) -> FormError {
        match (values, key) {
            (Container::List(items), FieldKey::Index(index)) => FormError::IndexOutOfRange {
                node: self.id(),
                index,
                len: items.len(),
            },
            (values, key) => FormError::KeyMismatch {
                node: self.id(),
                key,
                kind: values.kind(),
            },
        }
    }

    /// Set one field.
    ///
    /// A scalar equal to the current value is a no-op. Containers are
    /// compared by identity and so always count as a change (and as dirty
    /// unless they are the very default allocation); nested structures should
    /// go through [`derive`](crate::derive) instead.
    ///
    /// # Errors
    ///
    /// [`FormError::KeyMismatch`] for a key of the wrong kind,
    /// [`FormError::IndexOutOfRange`] for a list index past the end, or any
    /// violation raised by a listener.
    pub fn set_value(&self, key: impl Into<FieldKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        let values = {
            let mut fields = self.inner.fields.borrow_mut();
            if !fields.values.accepts(&key) {
                return Err(self.rejected_key(&fields.values, key));
            }
            if !value.is_container()
                && fields.values.get(&key).is_some_and(|cur| cur.same(&value))
            {
                return Ok(());
            }
            let dirty = fields.defaults.get(&key).is_none_or(|d| !d.same(&value));
            fields.values.set(key.clone(), value);
            fields.dirty.insert(key.clone(), dirty);
            fields.values.clone()
        };
        if let Some(errors) = self.auto_errors(&values) {
            self.inner.fields.borrow_mut().errors = errors;
        }
        self.inner
            .listeners
            .fire(&key, None, &Change::field(key.clone()))?;
        Ok(())
    }

    /// Set one field with a caller-supplied dirty flag and error.
    ///
    /// `error: None` recomputes errors through the validator; `Some(e)` stores
    /// `e` when truthy and clears the entry otherwise. Listener `skip` is not
    /// notified. This is the primitive the composition layer pushes child
    /// state through.
    ///
    /// # Errors
    ///
    /// [`FormError::KeyMismatch`], [`FormError::IndexOutOfRange`], or any
    /// violation raised by a listener.
    pub fn set_value_internal(
        &self,
        key: impl Into<FieldKey>,
        value: Value,
        dirty: bool,
        error: Option<FieldError>,
        skip: Option<SubscriptionId>,
    ) -> Result<()> {
        let key = key.into();
        let values = {
            let mut fields = self.inner.fields.borrow_mut();
            if !fields.values.set(key.clone(), value) {
                return Err(self.rejected_key(&fields.values, key));
            }
            fields.dirty.insert(key.clone(), dirty);
            if let Some(error) = error {
                match error.normalized() {
                    Some(error) => fields.errors.insert(key.clone(), error),
                    None => fields.errors.remove(&key),
                };
                None
            } else {
                Some(fields.values.clone())
            }
        };
        if let Some(values) = values {
            if let Some(errors) = self.auto_errors(&values) {
                self.inner.fields.borrow_mut().errors = errors;
            }
        }
        self.inner
            .listeners
            .fire(&key, skip, &Change::field(key.clone()))?;
        Ok(())
    }

    /// Drop the dirty and error entries of `key` and notify its listeners.
    ///
    /// # Errors
    ///
    /// Any violation raised by a listener.
    pub fn unset_value(&self, key: impl Into<FieldKey>) -> Result<()> {
        let key = key.into();
        {
            let mut fields = self.inner.fields.borrow_mut();
            fields.dirty.remove(&key);
            fields.errors.remove(&key);
        }
        self.inner
            .listeners
            .fire(&key, None, &Change::unset(key.clone()))?;
        Ok(())
    }

    /// Replace the whole values container.
    ///
    /// With `is_default`, `new_values` becomes the new baseline: the defaults
    /// take it as-is, the values take a shallow copy, and the dirty map is
    /// cleared. Otherwise the values take `new_values` as-is.
    ///
    /// `errors: None` recomputes through the validator (subject to
    /// [`FormConfig::validate_on_change`]). Per-key listeners of every present
    /// key fire first, then dirty flags of scalar fields are recomputed, then
    /// any-change listeners fire. `skip` is excluded from both.
    ///
    /// # Errors
    ///
    /// [`FormError::KindMismatch`] when `new_values` is not the node's
    /// container kind, or any violation raised by a listener.
    pub fn set_values(
        &self,
        new_values: Container,
        errors: Option<ErrorMap>,
        is_default: bool,
        state: Option<SubmissionState>,
        skip: Option<SubscriptionId>,
    ) -> Result<()> {
        let _span = tracing::debug_span!(
            "set_values",
            node = %self.id(),
            len = new_values.len(),
            is_default
        )
        .entered();

        let values = {
            let mut fields = self.inner.fields.borrow_mut();
            let expected = fields.values.kind();
            if new_values.kind() != expected {
                return Err(FormError::KindMismatch {
                    node: self.id(),
                    expected,
                    found: new_values.kind(),
                });
            }
            if is_default {
                fields.values = new_values.shallow_copy();
                fields.defaults = new_values;
                fields.dirty.clear();
            } else {
                fields.values = new_values;
            }
            if let Some(state) = state {
                fields.state = state;
            }
            fields.values.clone()
        };

        let errors = match errors {
            Some(errors) => Some(crate::validate::normalize(errors)),
            None => self.auto_errors(&values),
        };
        if let Some(errors) = errors {
            self.inner.fields.borrow_mut().errors = errors;
        }

        let change = Change::bulk(is_default);
        self.inner.listeners.fire_keys(&values.keys(), skip, &change)?;
        if !is_default {
            self.recompute_dirty();
        }
        self.inner.listeners.fire_any(skip, &change)?;
        Ok(())
    }

    fn recompute_dirty(&self) {
        let mut fields = self.inner.fields.borrow_mut();
        let Fields {
            values,
            defaults,
            dirty,
            ..
        } = &mut *fields;
        dirty.retain(|key, _| values.get(key).is_some());
        for (key, value) in values.iter() {
            if value.is_container() {
                continue;
            }
            let changed = defaults.get(&key).is_none_or(|d| !d.same(value));
            dirty.insert(key, changed);
        }
    }

    /// Replace the error map, or recompute it through the validator when
    /// `errors` is `None`. No-op when the result equals the current map.
    ///
    /// # Errors
    ///
    /// Any violation raised by a listener.
    pub fn set_errors(&self, errors: Option<ErrorMap>, skip: Option<SubscriptionId>) -> Result<()> {
        let errors = match errors {
            Some(errors) => crate::validate::normalize(errors),
            None => {
                let values = self.values();
                self.validator().validate(&values)
            }
        };
        {
            let mut fields = self.inner.fields.borrow_mut();
            if fields.errors == errors {
                return Ok(());
            }
            fields.errors = errors;
        }
        let change = Change::errors(None);
        self.inner.listeners.fire_all_keys(skip, &change)?;
        self.inner.listeners.fire_any(skip, &change)?;
        Ok(())
    }

    /// Set or clear the error of one field. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// Any violation raised by a listener.
    pub fn set_error(&self, key: impl Into<FieldKey>, error: Option<FieldError>) -> Result<()> {
        let key = key.into();
        let error = error.and_then(FieldError::normalized);
        {
            let mut fields = self.inner.fields.borrow_mut();
            if fields.errors.get(&key) == error.as_ref() {
                return Ok(());
            }
            match error {
                Some(error) => fields.errors.insert(key.clone(), error),
                None => fields.errors.remove(&key),
            };
        }
        self.inner
            .listeners
            .fire(&key, None, &Change::errors(Some(key.clone())))?;
        Ok(())
    }

    /// Replace the submission state and broadcast it. No-op when unchanged.
    ///
    /// # Errors
    ///
    /// Any violation raised by a listener.
    pub fn set_state(&self, state: SubmissionState) -> Result<()> {
        {
            let mut fields = self.inner.fields.borrow_mut();
            if fields.state == state {
                return Ok(());
            }
            fields.state = state;
        }
        let change = Change::state();
        self.inner.listeners.fire_all_keys(None, &change)?;
        self.inner.listeners.fire_any(None, &change)?;
        Ok(())
    }

    /// Make `values` (or the current defaults) the new baseline and clear
    /// all errors.
    ///
    /// # Errors
    ///
    /// Same as [`set_values`](Self::set_values).
    pub fn reset(&self, values: Option<Container>) -> Result<()> {
        let values = values.unwrap_or_else(|| self.default_values());
        self.set_values(values, Some(ErrorMap::new()), true, None, None)
    }

    /// Run the validator regardless of config, store the result, and report
    /// whether the node is error-free.
    ///
    /// # Errors
    ///
    /// Any violation raised by a listener.
    pub fn validate(&self) -> Result<bool> {
        self.set_errors(None, None)?;
        Ok(!self.any_error())
    }

    /// Validate (when [`FormConfig::validate_on_submit`] is set) and, if the
    /// node has no errors, run `handler` while `is_submitting` is raised.
    ///
    /// Returns `Ok(None)` without calling `handler` when errors remain.
    ///
    /// # Errors
    ///
    /// Any violation raised by a listener.
    pub fn submit<R>(&self, handler: impl FnOnce(&FormNode) -> R) -> Result<Option<R>> {
        if self.inner.config.validate_on_submit {
            self.validate()?;
        }
        if self.any_error() {
            tracing::debug!(node = %self.id(), "submit blocked by validation errors");
            return Ok(None);
        }
        let mut state = self.state();
        state.is_submitting = true;
        state.submit_count = state.submit_count.saturating_add(1);
        self.set_state(state)?;

        let out = handler(self);

        let mut state = self.state();
        state.is_submitting = false;
        self.set_state(state)?;
        Ok(Some(out))
    }
}

impl fmt::Debug for FormNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.inner.fields.borrow();
        f.debug_struct("FormNode")
            .field("id", &self.inner.id)
            .field("values", &fields.values)
            .field("dirty", &fields.dirty)
            .field("errors", &fields.errors)
            .field("state", &fields.state)
            .finish_non_exhaustive()
    }
}

/// RAII guard for a listener; unregisters it on drop.
///
/// Holds the node weakly, so a live subscription never keeps its node alive.
#[must_use = "dropping the subscription unregisters the listener"]
pub struct Subscription {
    node: Weak<NodeInner>,
    topic: Topic,
    id: SubscriptionId,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.node.upgrade() {
            inner.listeners.unregister(&self.topic, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
