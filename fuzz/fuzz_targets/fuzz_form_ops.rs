#![no_main]

use arbitrary::Arbitrary;
use formtree::{Container, FieldError, FieldRules, FormNode, Value, derive, list, map};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    // Parent side
    SetName(Option<u8>),
    ReplaceItems(Vec<u8>),
    Reset,
    Validate,
    Submit,
    // Child side
    Append(u8),
    Remove(u8),
    Swap(u8, u8),
    Move(u8, u8),
    Set(u8, u8),
    Clear,
    SetError(u8, bool),
}

fn name_value(name: Option<u8>) -> Value {
    name.map_or(Value::Null, |b| Value::from(format!("n{}", b % 4)))
}

fn items_value(items: &[u8]) -> Value {
    Value::from(Container::list(items.iter().map(|b| i64::from(*b % 8))))
}

fuzz_target!(|ops: Vec<Op>| {
    let initial = map! { "name" => "", "items" => list![0, 1] };
    let Ok(form) = FormNode::builder(initial.clone(), initial)
        .validator(FieldRules::new().required("name", "required").build())
        .build()
    else {
        return;
    };
    let Ok(items) = derive(&form, "items") else {
        return;
    };

    for op in ops.into_iter().take(256) {
        let result = match op {
            Op::SetName(name) => form.set_value("name", name_value(name)),
            Op::ReplaceItems(v) => form.set_value("items", items_value(&v[..v.len().min(16)])),
            Op::Reset => form.reset(None),
            Op::Validate => form.validate().map(drop),
            Op::Submit => form.submit(|_| ()).map(drop),
            Op::Append(v) => items.append(i64::from(v)),
            Op::Remove(i) => items.remove(usize::from(i % 8)),
            Op::Swap(a, b) => items.swap(usize::from(a % 8), usize::from(b % 8)),
            Op::Move(a, b) => items.move_item(usize::from(a % 8), usize::from(b % 8)),
            Op::Set(i, v) => {
                let i = usize::from(i % 8);
                if i < items.values().len() {
                    items.set_value(i, i64::from(v))
                } else {
                    Ok(())
                }
            }
            Op::Clear => items.clear(),
            Op::SetError(i, on) => items.set_error(
                usize::from(i % 8),
                on.then(|| FieldError::from("flagged")),
            ),
        };
        assert!(result.is_ok(), "{result:?}");

        // The parent always holds exactly what the child holds.
        assert_eq!(form.value("items"), Some(Value::Container(items.values())));
        assert!(!form.state().is_submitting);
    }
});
