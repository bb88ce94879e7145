//! Property tests for shape determinism and handle accounting

use foreign_proxy::handle::{ForeignObject, Value, WellKnownSymbol};
use foreign_proxy::{BridgeConfig, HandleTable, PropertyKey, ProxyRuntime, RawHandle};
use proptest::prelude::*;
use std::sync::Arc;

/// Structural recipe for a foreign object
#[derive(Debug, Clone)]
struct Recipe {
    length: Option<f64>,
    methods: Vec<&'static str>,
    iterable: bool,
}

fn recipe() -> impl Strategy<Value = Recipe> {
    (
        proptest::option::of(0.0f64..1000.0),
        proptest::sample::subsequence(vec!["get", "set", "has", "includes", "next", "then"], 0..=6),
        any::<bool>(),
    )
        .prop_map(|(length, methods, iterable)| Recipe { length, methods, iterable })
}

fn build(table: &HandleTable, recipe: &Recipe) -> RawHandle {
    let mut object = ForeignObject::plain();
    if let Some(len) = recipe.length {
        object = object.with_number("length", len);
    }
    for name in &recipe.methods {
        let f = table.insert_function(|_, _, _| Ok(Value::Undefined));
        object = object.with_value(PropertyKey::named(*name), f);
    }
    if recipe.iterable {
        let f = table.insert_function(|_, _, _| Ok(Value::Undefined));
        object = object.with_value(PropertyKey::Symbol(WellKnownSymbol::Iterator), f);
    }
    table.insert(object)
}

proptest! {
    #[test]
    fn same_structure_same_shape(recipe in recipe()) {
        let table = Arc::new(HandleTable::new());
        let runtime = ProxyRuntime::new(table.clone(), BridgeConfig::default()).unwrap();

        let a = build(&table, &recipe);
        let b = build(&table, &recipe);
        let pa = runtime.create(a).unwrap();
        let pb = runtime.create(b).unwrap();

        prop_assert!(Arc::ptr_eq(pa.shape(), pb.shape()));
        prop_assert_eq!(pa.flags(), runtime.factory().compute_capabilities(b).unwrap());
    }

    #[test]
    fn create_then_drop_leaves_no_references(
        recipes in proptest::collection::vec(recipe(), 1..16)
    ) {
        let table = Arc::new(HandleTable::new());
        let runtime = ProxyRuntime::new(table.clone(), BridgeConfig::default()).unwrap();

        let handles: Vec<RawHandle> = recipes.iter().map(|r| build(&table, r)).collect();
        let baseline = table.outstanding();

        let proxies: Vec<_> = handles.iter().map(|h| runtime.create(*h).unwrap()).collect();
        prop_assert_eq!(table.outstanding(), baseline + proxies.len());
        drop(proxies);

        prop_assert_eq!(table.outstanding(), baseline);
        prop_assert_eq!(runtime.stats().live_proxies, 0);
    }
}
