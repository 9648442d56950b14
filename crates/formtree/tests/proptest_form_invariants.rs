//! Property-based invariant tests for form nodes and composition edges.
//!
//! 1. With change validation on, stored errors always equal the validator's
//!    output for the current values.
//! 2. Setting a scalar to its current value notifies nobody.
//! 3. `reset(x)` leaves `values == x` and an empty dirty map.
//! 4. A scalar field is dirty exactly when it differs from its default.
//! 5. `move_item` permutes the list and keeps each error with its element.
//! 6. After any sequence of child list edits the parent holds the child's
//!    values and matches its dirtiness.

use std::cell::Cell;
use std::rc::Rc;

use formtree::{
    Container, FieldError, FieldKey, FieldRules, FormConfig, FormNode, Topic, Validator, Value,
    derive, list, map,
};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

const KEYS: [&str; 3] = ["a", "b", "c"];

fn key_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just(KEYS[0]), Just(KEYS[1]), Just(KEYS[2])]
}

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-5i64..5).prop_map(Value::from),
        "[a-c]{0,2}".prop_map(Value::from),
    ]
}

fn record_strategy() -> impl Strategy<Value = Container> {
    proptest::collection::vec(scalar_strategy(), KEYS.len())
        .prop_map(|vals| Container::map(KEYS.iter().copied().zip(vals)))
}

fn rules() -> Validator {
    FieldRules::new()
        .required("a", "a is required")
        .rule("b", |v| match v.and_then(Value::as_int) {
            Some(n) if n < 0 => Some("b must not be negative".into()),
            _ => None,
        })
        .build()
}

#[derive(Clone, Debug)]
enum ListOp {
    Append(i64),
    Remove(usize),
    Swap(usize, usize),
    Move(usize, usize),
    Set(usize, i64),
    Clear,
}

fn list_op_strategy() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        3 => (0i64..10).prop_map(ListOp::Append),
        2 => (0usize..6).prop_map(ListOp::Remove),
        1 => (0usize..6, 0usize..6).prop_map(|(a, b)| ListOp::Swap(a, b)),
        1 => (0usize..6, 0usize..6).prop_map(|(a, b)| ListOp::Move(a, b)),
        2 => (0usize..6, 0i64..10).prop_map(|(i, v)| ListOp::Set(i, v)),
        1 => Just(ListOp::Clear),
    ]
}

fn apply(node: &FormNode, op: &ListOp) {
    let len = node.values().len();
    let result = match *op {
        ListOp::Append(v) => node.append(v),
        ListOp::Remove(i) => node.remove(i),
        ListOp::Swap(a, b) => node.swap(a, b),
        ListOp::Move(a, b) => node.move_item(a, b),
        ListOp::Set(i, v) if i < len => node.set_value(i, v),
        ListOp::Set(..) => Ok(()),
        ListOp::Clear => node.clear(),
    };
    result.unwrap_or_else(|e| panic!("{op:?} failed: {e}"));
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Errors track the validator
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn errors_equal_validator_output(
        start in record_strategy(),
        edits in proptest::collection::vec((key_strategy(), scalar_strategy()), 0..12),
    ) {
        let validator = rules();
        let form = FormNode::builder(start.clone(), start)
            .config(FormConfig::default().with_validate_on_mount(true))
            .validator(validator.clone())
            .build()
            .unwrap();
        for (key, value) in edits {
            form.set_value(key, value).unwrap();
            prop_assert_eq!(form.errors(), validator.validate(&form.values()));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Same-value writes are silent
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn same_scalar_is_silent(start in record_strategy(), key in key_strategy()) {
        let form = FormNode::new(start.clone(), start).unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        form.listen(Topic::Any, move |_| h.set(h.get() + 1));

        let current = form.value(key).unwrap();
        form.set_value(key, current).unwrap();
        prop_assert_eq!(hits.get(), 0);
        prop_assert!(form.dirty().is_empty());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. reset round-trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn reset_round_trip(
        start in record_strategy(),
        edits in proptest::collection::vec((key_strategy(), scalar_strategy()), 0..6),
        next in record_strategy(),
    ) {
        let form = FormNode::new(start.clone(), start).unwrap();
        for (key, value) in edits {
            form.set_value(key, value).unwrap();
        }
        form.reset(Some(next.clone())).unwrap();
        prop_assert_eq!(form.values(), next.clone());
        prop_assert_eq!(form.default_values(), next);
        prop_assert!(form.dirty().is_empty());
        prop_assert!(!form.is_dirty());
        prop_assert!(!form.any_error());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Scalar dirtiness
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn scalar_dirty_iff_differs_from_default(
        start in record_strategy(),
        edits in proptest::collection::vec((key_strategy(), scalar_strategy()), 1..12),
    ) {
        let form = FormNode::new(start.clone(), start).unwrap();
        for (key, value) in edits {
            form.set_value(key, value).unwrap();
        }
        for key in KEYS {
            let differs = form.value(key) != form.default_value(key);
            prop_assert_eq!(form.is_field_dirty(key), differs, "field {}", key);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. move_item is a permutation that carries errors
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn move_carries_errors(len in 1usize..8, from in 0usize..8, to in 0usize..8) {
        prop_assume!(from < len && to < len);
        let items = Container::list(0..len as i64);
        let node = FormNode::new(items.clone(), items).unwrap();
        let errors = (0..len)
            .map(|i| (FieldKey::Index(i), FieldError::from(format!("e{i}"))))
            .collect();
        node.set_errors(Some(errors), None).unwrap();

        node.move_item(from, to).unwrap();

        let values = node.values();
        prop_assert_eq!(values.len(), len);
        for i in 0..len {
            let Some(Value::Int(original)) = values.get(&FieldKey::Index(i)) else {
                return Err(TestCaseError::fail(format!("missing int at {i}")));
            };
            prop_assert_eq!(
                node.error(i),
                Some(FieldError::from(format!("e{original}"))),
                "error follows element {}", original
            );
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Parent mirrors child after arbitrary list edits
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn parent_mirrors_child(ops in proptest::collection::vec(list_op_strategy(), 0..24)) {
        let initial = map! { "items" => list![1, 2, 3] };
        let form = FormNode::new(initial.clone(), initial).unwrap();
        let items = derive(&form, "items").unwrap();

        for op in &ops {
            apply(&items, op);
            prop_assert_eq!(form.value("items"), Some(Value::Container(items.values())));
            prop_assert_eq!(form.is_field_dirty("items"), items.is_dirty());
        }
    }
}
