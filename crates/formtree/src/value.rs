#![forbid(unsafe_code)]

//! Field values and the two container kinds a node can hold.
//!
//! A [`Container`] is either an ordered list or a name-keyed map. Both kinds
//! are reference-counted: cloning a container shares the allocation, and
//! [`Container::same`] compares by allocation identity. Writes go through
//! [`Rc::make_mut`], so a container that is shared with another node is
//! copied on first write and the other side never observes the mutation.
//!
//! # Invariants
//!
//! 1. A list container is only addressed by [`FieldKey::Index`], a map only by
//!    [`FieldKey::Name`].
//! 2. [`Value::same`] is strict equality: scalars by value, containers by
//!    identity. Two structurally equal but separately allocated containers are
//!    not `same`.
//! 3. A list write lands at an existing index or at `len` (append). Writes
//!    further out are rejected, so a list never grows by more than one slot
//!    per write.
//! 4. [`Container::shallow_copy`] always yields a fresh outer allocation whose
//!    members are shared with the source.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Address of a field inside a [`Container`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    /// Position in a list container.
    Index(usize),
    /// Name in a map container.
    Name(String),
}

impl FieldKey {
    /// The list position, if this key addresses a list.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Name(_) => None,
        }
    }

    /// The field name, if this key addresses a map.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Index(_) => None,
            Self::Name(name) => Some(name),
        }
    }
}

impl From<usize> for FieldKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for FieldKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for FieldKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&FieldKey> for FieldKey {
    fn from(key: &FieldKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "[{i}]"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Which of the two container shapes a [`Container`] has.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    List,
    Map,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::List => "list",
            Self::Map => "map",
        })
    }
}

/// A single field value.
///
/// `PartialEq` is structural. Use [`Value::same`] for the identity-based
/// comparison that drives dirty tracking.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Container(Container),
}

impl Value {
    /// Strict equality: scalars by value, containers by allocation identity.
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Container(a), Self::Container(b)) => a.same(b),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container(_))
    }

    #[must_use]
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Self::Container(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Container> for Value {
    fn from(v: Container) -> Self {
        Self::Container(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// An ordered list or a name-keyed map of [`Value`]s.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Container {
    List(Rc<Vec<Value>>),
    Map(Rc<BTreeMap<String, Value>>),
}

impl Container {
    /// Build a list container.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Self::List(Rc::new(items.into_iter().map(Into::into).collect()))
    }

    /// Build a map container.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(Rc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// An empty container of the given kind.
    #[must_use]
    pub fn empty(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::List => Self::List(Rc::default()),
            ContainerKind::Map => Self::Map(Rc::default()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        match self {
            Self::List(_) => ContainerKind::List,
            Self::Map(_) => ContainerKind::Map,
        }
    }

    /// Number of entries (list length or map size).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            Self::Map(entries) => entries.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` can be written: a name for a map, an index no greater
    /// than the length for a list.
    #[must_use]
    pub fn accepts(&self, key: &FieldKey) -> bool {
        match (self, key) {
            (Self::List(items), FieldKey::Index(i)) => *i <= items.len(),
            (Self::Map(_), FieldKey::Name(_)) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn get(&self, key: &FieldKey) -> Option<&Value> {
        match (self, key) {
            (Self::List(items), FieldKey::Index(i)) => items.get(*i),
            (Self::Map(entries), FieldKey::Name(name)) => entries.get(name),
            _ => None,
        }
    }

    /// Store `value` at `key`, copying the container first if it is shared.
    ///
    /// Writing at index `len` of a list appends. Returns `false` (and leaves
    /// the container untouched) when [`accepts`](Self::accepts) rejects `key`.
    pub fn set(&mut self, key: FieldKey, value: Value) -> bool {
        match (self, key) {
            (Self::List(items), FieldKey::Index(i)) => {
                if i > items.len() {
                    return false;
                }
                let items = Rc::make_mut(items);
                if i == items.len() {
                    items.push(value);
                } else {
                    items[i] = value;
                }
                true
            }
            (Self::Map(entries), FieldKey::Name(name)) => {
                Rc::make_mut(entries).insert(name, value);
                true
            }
            _ => false,
        }
    }

    /// All keys, in list order or map key order.
    #[must_use]
    pub fn keys(&self) -> Vec<FieldKey> {
        match self {
            Self::List(items) => (0..items.len()).map(FieldKey::Index).collect(),
            Self::Map(entries) => entries.keys().cloned().map(FieldKey::Name).collect(),
        }
    }

    /// Iterate `(key, value)` pairs in key order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (FieldKey, &Value)> + '_> {
        match self {
            Self::List(items) => Box::new(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (FieldKey::Index(i), v)),
            ),
            Self::Map(entries) => Box::new(
                entries
                    .iter()
                    .map(|(k, v)| (FieldKey::Name(k.clone()), v)),
            ),
        }
    }

    /// List items, or `None` for a map.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            Self::Map(_) => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::List(_) => None,
            Self::Map(entries) => Some(entries),
        }
    }

    /// Fresh outer allocation with the same members. Nested containers stay
    /// shared.
    #[must_use]
    pub fn shallow_copy(&self) -> Self {
        match self {
            Self::List(items) => Self::List(Rc::new(Vec::clone(items))),
            Self::Map(entries) => Self::Map(Rc::new(BTreeMap::clone(entries))),
        }
    }

    /// Allocation identity.
    #[must_use]
    pub fn same(&self, other: &Container) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Build a list [`Container`] from values convertible into [`Value`].
///
/// ```
/// use formtree::{list, Value};
/// let items = list![1, "two", 3.0];
/// assert_eq!(items.len(), 3);
/// assert_eq!(items.as_list().unwrap()[1], Value::from("two"));
/// ```
#[macro_export]
macro_rules! list {
    () => {
        $crate::Container::empty($crate::ContainerKind::List)
    };
    ($($item:expr),+ $(,)?) => {
        $crate::Container::list([$($crate::Value::from($item)),+])
    };
}

/// Build a map [`Container`] from `name => value` pairs.
///
/// ```
/// use formtree::{list, map, Value};
/// let form = map! { "name" => "Ada", "tags" => list!["math"] };
/// assert_eq!(form.len(), 2);
/// ```
#[macro_export]
macro_rules! map {
    () => {
        $crate::Container::empty($crate::ContainerKind::Map)
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Container::map([
            $((::std::string::String::from($name), $crate::Value::from($value))),+
        ])
    };
}
