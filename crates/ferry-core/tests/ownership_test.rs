//! Integration tests for reference counting, atom pairing and conversions

use std::rc::Rc;

use ferry_core::{Context, ContextConfig, FerryValue, HeapStats, IntoValue};

fn assert_clean(ctx: &Context) {
    let stats = ctx.stats();
    assert_eq!(
        stats,
        HeapStats {
            stale_releases: 0,
            ..HeapStats::default()
        },
        "engine resources leaked or double-freed: {stats:?}"
    );
}

#[test]
fn test_adopted_values_net_to_zero() {
    let ctx = Context::new().unwrap();
    {
        let obj = ctx.eval("({ a: [1, 2, 3], b: 'text' })");
        let a = obj.property("a");
        let first = a.at_index(0);
        let b = obj.property("b");
        assert_eq!(first.to_int(), Some(1));
        assert_eq!(b.to_string().as_deref(), Some("text"));
        assert_eq!(ctx.stats().total_refs, 3);
    }
    assert_clean(&ctx);
}

#[test]
fn test_early_return_releases() {
    fn find_name(ctx: &Context) -> Option<String> {
        let obj = ctx.eval("({ inner: { name: 42 } })");
        let inner = obj.property("inner");
        let name = inner.property("name").to_string()?;
        Some(name)
    }

    let ctx = Context::new().unwrap();
    assert_eq!(find_name(&ctx), None);
    assert_clean(&ctx);
}

#[test]
fn test_clones_and_raw_handoff() {
    let ctx = Context::new().unwrap();
    let original = ctx.eval("[]");
    let copies: Vec<FerryValue> = (0..5).map(|_| original.clone()).collect();
    assert_eq!(ctx.engine().ref_count(original.raw()), 6);
    drop(copies);
    assert_eq!(ctx.engine().ref_count(original.raw()), 1);

    let raw = original.into_raw();
    let readopted = FerryValue::adopt(&ctx, raw);
    assert!(readopted.is_array());
    drop(readopted);
    assert_clean(&ctx);
}

#[test]
fn test_values_keep_context_alive() {
    let value = {
        let ctx = Context::new().unwrap();
        ctx.eval("({ kept: true })")
    };
    assert_eq!(value.property("kept").to_bool(), Some(true));
}

#[test]
fn test_has_property_does_not_leak_atoms() {
    let ctx = Context::with_config(ContextConfig::new().max_atoms(8)).unwrap();
    let obj = ctx.eval("({})");
    for i in 0..1_000 {
        let name = format!("key{i}");
        assert!(!obj.has_property(&name));
        assert!(obj.property(&name).is_undefined());
    }
    assert_eq!(ctx.stats().live_atoms, 0);

    ctx.eval("globalThis.late = 1");
    assert!(ctx.global().has_property("late"));
}

#[test]
fn test_has_property_after_external_set() {
    let ctx = Context::new().unwrap();
    let obj = ctx.eval("globalThis.target = {}; target");
    assert!(!obj.has_property("flag"));
    ctx.eval("target.flag = 1");
    assert!(obj.has_property("flag"));
}

#[test]
fn test_exhausted_atoms_degrade() {
    let ctx = Context::with_config(ContextConfig::new().max_atoms(1)).unwrap();
    let obj = ctx.eval("({ a: 1 })");
    let atom = ctx.atom("held").unwrap();
    assert!(!obj.has_property("a"));
    assert!(obj.property("a").is_undefined());
    assert!(obj.set_property("a", &2).is_err());
    drop(atom);
    assert_eq!(obj.property("a").to_int(), Some(1));
}

#[test]
fn test_at_index_out_of_range() {
    let ctx = Context::new().unwrap();
    let array = ctx.eval("[1, 2]");
    assert_eq!(array.at_index(1).to_int(), Some(2));
    for index in [-1, 2, 5] {
        let value = array.at_index(index);
        assert!(value.is_undefined());
        assert!(!value.is_exception());
    }
    drop(array);
    assert_clean(&ctx);
}

#[test]
fn test_integer_roundtrips() {
    let ctx = Context::new().unwrap();
    for n in [0i32, -1, i32::MAX] {
        assert_eq!(n.to_value(&ctx).get::<i32>(), Some(n));
    }
    let promoted = i64::from(i32::MAX) + 1;
    assert_eq!(promoted.to_value(&ctx).get::<i64>(), Some(promoted));
    assert_eq!(promoted.to_value(&ctx).get::<i32>(), Some(i32::MIN));
}

#[test]
fn test_string_and_bool_roundtrips() {
    let ctx = Context::new().unwrap();
    for s in ["", "ascii", "👋你好"] {
        assert_eq!(s.to_value(&ctx).to_string().as_deref(), Some(s));
    }
    for b in [true, false] {
        assert_eq!(b.to_value(&ctx).to_bool(), Some(b));
    }
    assert_clean(&ctx);
}

#[test]
fn test_tag_mismatch_is_none() {
    let ctx = Context::new().unwrap();
    assert_eq!(ctx.value("10").to_int(), None);
    assert_eq!(ctx.value(&10).to_string(), None);
    assert_eq!(ctx.value(&1).to_bool(), None);
    assert_eq!(ctx.value(&true).to_double(), None);
}

#[test]
fn test_opaque_handle_is_unretained() {
    struct Native {
        id: u32,
    }

    let ctx = Context::new().unwrap();
    let obj = ctx.eval("({})");
    let alias = ctx.eval("(o) => o").call(&[&obj]);
    let native = Rc::new(Native { id: 9 });
    assert!(obj.set_opaque(&native));

    // Same engine object, same association.
    assert_eq!(alias.get_opaque::<Native>().map(|n| n.id), Some(9));
    assert_eq!(Rc::strong_count(&native), 1);

    drop(native);
    assert!(alias.get_opaque::<Native>().is_none());
}
