#![forbid(unsafe_code)]

//! List operations for list-valued nodes.
//!
//! Each operation builds a fresh list (and, where it touches errors, a fresh
//! error map) and hands it to [`FormNode::set_values`]; nothing is mutated in
//! place. On a derived child the result reaches the parent through the
//! composition edge like any other child change.
//!
//! # Error entries
//!
//! - [`remove`](FormNode::remove) drops the entry of the removed index and
//!   leaves entries above it keyed by their old index. They are not
//!   renumbered, so after a removal an error can sit on the element that
//!   shifted into its slot.
//! - [`swap`](FormNode::swap) exchanges the two entries.
//! - [`move_item`](FormNode::move_item) moves the entry with its element and
//!   shifts the entries in between by one, so errors stay with their
//!   elements.
//!
//! Out-of-range indices are a usage error: logged, no change, no
//! notification.

use crate::error::{FormError, Result};
use crate::node::FormNode;
use crate::validate::ErrorMap;
use crate::value::{Container, ContainerKind, FieldKey, Value};

impl FormNode {
    fn list_items(&self) -> Result<Vec<Value>> {
        match self.values() {
            Container::List(items) => Ok(items.as_ref().clone()),
            Container::Map(_) => Err(FormError::NotASequence { node: self.id() }),
        }
    }

    fn in_bounds(&self, op: &'static str, len: usize, indices: &[usize]) -> bool {
        if let Some(bad) = indices.iter().find(|&&i| i >= len) {
            tracing::warn!(node = %self.id(), op, index = bad, len, "sequence index out of range");
            return false;
        }
        true
    }

    /// Append `item` to the end of the list.
    ///
    /// # Errors
    ///
    /// [`FormError::NotASequence`] on a map node, or any listener violation.
    pub fn append(&self, item: impl Into<Value>) -> Result<()> {
        let mut items = self.list_items()?;
        items.push(item.into());
        self.set_values(Container::list(items), None, false, None, None)
    }

    /// Remove the element at `index`.
    ///
    /// # Errors
    ///
    /// [`FormError::NotASequence`] on a map node, or any listener violation.
    pub fn remove(&self, index: usize) -> Result<()> {
        let mut items = self.list_items()?;
        if !self.in_bounds("remove", items.len(), &[index]) {
            return Ok(());
        }
        items.remove(index);
        let mut errors = self.errors();
        errors.remove(&FieldKey::Index(index));
        self.set_values(Container::list(items), Some(errors), false, None, None)
    }

    /// Remove every element and every error.
    ///
    /// # Errors
    ///
    /// [`FormError::NotASequence`] on a map node, or any listener violation.
    pub fn clear(&self) -> Result<()> {
        if self.kind() != ContainerKind::List {
            return Err(FormError::NotASequence { node: self.id() });
        }
        self.set_values(
            Container::empty(ContainerKind::List),
            Some(ErrorMap::new()),
            false,
            None,
            None,
        )
    }

    /// Exchange the elements (and their errors) at `a` and `b`.
    ///
    /// # Errors
    ///
    /// [`FormError::NotASequence`] on a map node, or any listener violation.
    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        let mut items = self.list_items()?;
        if !self.in_bounds("swap", items.len(), &[a, b]) {
            return Ok(());
        }
        items.swap(a, b);
        let mut errors = self.errors();
        let at_a = errors.remove(&FieldKey::Index(a));
        let at_b = errors.remove(&FieldKey::Index(b));
        if let Some(err) = at_a {
            errors.insert(FieldKey::Index(b), err);
        }
        if let Some(err) = at_b {
            errors.insert(FieldKey::Index(a), err);
        }
        self.set_values(Container::list(items), Some(errors), false, None, None)
    }

    /// Move the element at `from` so it ends up at `to`, shifting the
    /// elements in between by one. Errors travel with their elements.
    ///
    /// # Errors
    ///
    /// [`FormError::NotASequence`] on a map node, or any listener violation.
    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        let mut items = self.list_items()?;
        if !self.in_bounds("move", items.len(), &[from, to]) {
            return Ok(());
        }
        let item = items.remove(from);
        items.insert(to, item);
        let errors = self
            .errors()
            .into_iter()
            .map(|(key, err)| match key {
                FieldKey::Index(i) => (FieldKey::Index(shifted_index(i, from, to)), err),
                other => (other, err),
            })
            .collect();
        self.set_values(Container::list(items), Some(errors), false, None, None)
    }
}

/// Where index `i` lands after moving `from` to `to`.
fn shifted_index(i: usize, from: usize, to: usize) -> usize {
    if i == from {
        to
    } else if from < to && (from + 1..=to).contains(&i) {
        i - 1
    } else if to < from && (to..from).contains(&i) {
        i + 1
    } else {
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::FieldError;
    use crate::{list, map};
    use tracing_test::traced_test;

    fn node(items: Container) -> FormNode {
        FormNode::new(items.clone(), items).unwrap()
    }

    fn errors_at(pairs: &[(usize, &str)]) -> ErrorMap {
        pairs
            .iter()
            .map(|(i, msg)| (FieldKey::Index(*i), FieldError::from(*msg)))
            .collect()
    }

    #[test]
    fn append_builds_new_list() {
        let n = node(list![1]);
        let before = n.values();
        n.append(2).unwrap();
        assert_eq!(n.values(), list![1, 2]);
        assert!(!n.values().same(&before));
        assert_eq!(before, list![1], "old list untouched");
        assert!(n.is_dirty());
    }

    #[test]
    fn remove_keeps_higher_error_indices() {
        let n = node(list!["a", "b", "c"]);
        n.set_errors(Some(errors_at(&[(0, "e0"), (1, "e1"), (2, "e2")])), None)
            .unwrap();
        n.remove(1).unwrap();
        assert_eq!(n.values(), list!["a", "c"]);
        assert_eq!(n.errors(), errors_at(&[(0, "e0"), (2, "e2")]));
    }

    #[test]
    fn clear_empties_values_and_errors() {
        let n = node(list![1, 2]);
        n.set_error(0usize, Some("bad".into())).unwrap();
        n.clear().unwrap();
        assert!(n.values().is_empty());
        assert!(!n.any_error());
        assert!(n.is_dirty());
    }

    #[test]
    fn swap_exchanges_values_and_errors() {
        let n = node(list![1, 2, 3]);
        n.set_errors(Some(errors_at(&[(0, "first")])), None).unwrap();
        n.swap(0, 2).unwrap();
        assert_eq!(n.values(), list![3, 2, 1]);
        assert_eq!(n.errors(), errors_at(&[(2, "first")]));
    }

    #[test]
    fn move_forward_shifts_between() {
        let n = node(list!["a", "b", "c", "d"]);
        n.set_errors(
            Some(errors_at(&[(0, "ea"), (1, "eb"), (2, "ec"), (3, "ed")])),
            None,
        )
        .unwrap();
        n.move_item(0, 2).unwrap();
        assert_eq!(n.values(), list!["b", "c", "a", "d"]);
        assert_eq!(
            n.errors(),
            errors_at(&[(0, "eb"), (1, "ec"), (2, "ea"), (3, "ed")])
        );
    }

    #[test]
    fn move_backward_shifts_between() {
        let n = node(list!["a", "b", "c", "d"]);
        n.set_errors(Some(errors_at(&[(1, "eb"), (3, "ed")])), None)
            .unwrap();
        n.move_item(3, 1).unwrap();
        assert_eq!(n.values(), list!["a", "d", "b", "c"]);
        assert_eq!(n.errors(), errors_at(&[(1, "ed"), (2, "eb")]));
    }

    #[test]
    fn move_to_same_index_keeps_order() {
        let n = node(list![1, 2]);
        n.move_item(1, 1).unwrap();
        assert_eq!(n.values(), list![1, 2]);
    }

    #[test]
    fn shifted_index_table() {
        assert_eq!(shifted_index(0, 0, 3), 3);
        assert_eq!(shifted_index(1, 0, 3), 0);
        assert_eq!(shifted_index(3, 0, 3), 2);
        assert_eq!(shifted_index(4, 0, 3), 4);
        assert_eq!(shifted_index(3, 3, 0), 0);
        assert_eq!(shifted_index(0, 3, 0), 1);
        assert_eq!(shifted_index(2, 3, 0), 3);
    }

    #[test]
    fn map_node_is_not_a_sequence() {
        let n = node(map! { "a" => 1 });
        assert!(matches!(n.append(1), Err(FormError::NotASequence { .. })));
        assert!(matches!(n.clear(), Err(FormError::NotASequence { .. })));
        assert!(matches!(n.swap(0, 0), Err(FormError::NotASequence { .. })));
    }

    #[traced_test]
    #[test]
    fn out_of_range_is_logged_noop() {
        let n = node(list![1, 2]);
        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let h = std::rc::Rc::clone(&hits);
        n.listen(crate::Topic::Any, move |_| h.set(h.get() + 1));

        n.remove(5).unwrap();
        n.swap(0, 9).unwrap();
        n.move_item(7, 0).unwrap();
        assert_eq!(n.values(), list![1, 2]);
        assert_eq!(hits.get(), 0);
        assert!(logs_contain("sequence index out of range"));
    }
}
