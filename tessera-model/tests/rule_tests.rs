mod common;

use common::{Log, Shop, shop, shop_with};
use pretty_assertions::assert_eq;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tessera_model::{
    CalculatedPropertyRule, ChangeKind, Entity, ModelConfig, ModelError, NestingExceeded,
    PropertyOptions, RuleInvocation, RuleOptions, Value, ValueType,
};

fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
    let count = Rc::new(Cell::new(0));
    (Rc::clone(&count), count)
}

fn sum_of_prices(order: &Entity) -> tessera_model::Result<Value> {
    let mut total = 0.0;
    for line in order.list("lines")?.items() {
        if let Some(line) = line.as_entity() {
            total += line.get("price")?.as_number().unwrap_or(0.0);
        }
    }
    Ok(Value::Number(total))
}

fn add_total_rule(shop: &Shop, runs: Rc<Cell<u32>>) {
    shop.order
        .add_rule(
            CalculatedPropertyRule::new("total", move |order| {
                runs.set(runs.get() + 1);
                sum_of_prices(order)
            })
            .on_change_of(["lines.price"]),
        )
        .unwrap();
}

fn add_line(shop: &Shop, order: &Entity, price: f64) -> Entity {
    let line = shop.line.create_entity().unwrap();
    line.set("price", price).unwrap();
    order.list("lines").unwrap().push(&line).unwrap();
    line
}

// ── Init rules ───────────────────────────────────────────────────

#[test]
fn bare_functions_run_when_entities_initialize() {
    let shop = shop();
    shop.order
        .add_rule(|order: &Entity| order.set("number", "N-1"))
        .unwrap();

    let fresh = shop.order.create_entity().unwrap();
    assert_eq!(fresh.get("number").unwrap(), Value::from("N-1"));

    let existing = shop.order.create_existing("77").unwrap();
    assert_eq!(existing.get("number").unwrap(), Value::from("N-1"));
}

#[test]
fn init_new_rules_skip_existing_entities() {
    let shop = shop();
    let (runs, seen) = counter();
    shop.order
        .add_rule(
            RuleOptions::new()
                .name("Order.stamp")
                .on_init_new()
                .execute(move |_| {
                    seen.set(seen.get() + 1);
                    Ok(())
                }),
        )
        .unwrap();

    shop.order.create_existing("1").unwrap();
    assert_eq!(runs.get(), 0);
    shop.order.create_entity().unwrap();
    assert_eq!(runs.get(), 1);
}

#[test]
fn base_type_rules_apply_to_derived_instances() {
    let shop = shop();
    let (runs, seen) = counter();
    shop.customer
        .add_rule(RuleOptions::new().on_init().execute(move |_| {
            seen.set(seen.get() + 1);
            Ok(())
        }))
        .unwrap();
    let preferred = shop
        .model
        .add_type("PreferredCustomer", Some(&shop.customer), Default::default())
        .unwrap();

    preferred.create_entity().unwrap();
    assert_eq!(runs.get(), 1);
}

// ── Change rules ─────────────────────────────────────────────────

#[test]
fn change_rules_run_once_per_scope() {
    let shop = shop();
    let (runs, seen) = counter();
    let rule = shop
        .line
        .add_rule(
            RuleOptions::new()
                .name("OrderLine.amount")
                .on_change_of(["{quantity,price}"])
                .execute(move |line| {
                    seen.set(seen.get() + 1);
                    let quantity = line.get("quantity")?.as_number().unwrap_or(0.0);
                    let price = line.get("price")?.as_number().unwrap_or(0.0);
                    line.set("amount", quantity * price)
                }),
        )
        .unwrap();
    assert!(rule.invocation().on_property_changed());
    assert_eq!(rule.predicates().len(), 2);

    let line = shop.line.create_entity().unwrap();
    shop.model
        .perform(|| {
            line.set("quantity", 2_i64)?;
            line.set("price", 3.0)?;
            assert_eq!(runs.get(), 0);
            Ok(())
        })
        .unwrap();

    assert_eq!(runs.get(), 1);
    assert_eq!(line.get("amount").unwrap(), Value::Number(6.0));

    line.set("price", 4.0).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(line.get("amount").unwrap(), Value::Number(8.0));
}

#[test]
fn rule_failures_surface_from_the_triggering_write() {
    let shop = shop();
    shop.customer
        .add_rule(
            RuleOptions::new()
                .on_change_of(["name"])
                .execute(|_| Err(ModelError::rule("Customer.guard", "names are frozen"))),
        )
        .unwrap();

    let customer = shop.customer.create_entity().unwrap();
    let err = customer.set("name", "Ann").unwrap_err();
    assert!(matches!(err, ModelError::Rule { .. }), "{err}");

    // Pending state was released: the next write triggers the rule again.
    let err = customer.set("name", "Bea").unwrap_err();
    assert!(matches!(err, ModelError::Rule { .. }), "{err}");
}

#[test]
fn runaway_cascades_stop_at_the_nesting_ceiling() {
    let shop = shop_with(ModelConfig {
        max_scope_nesting: 10,
        ..ModelConfig::default()
    });
    shop.customer
        .add_property(
            "visits",
            ValueType::Integer,
            false,
            false,
            PropertyOptions::default().default_value(0_i64),
        )
        .unwrap();
    shop.customer
        .add_rule(RuleOptions::new().on_change_of(["visits"]).execute(|c| {
            let visits = c.get("visits")?.as_integer().unwrap_or(0);
            c.set("visits", visits + 1)
        }))
        .unwrap();

    let exceeded: Rc<RefCell<Vec<NestingExceeded>>> = Rc::default();
    let sink = Rc::clone(&exceeded);
    shop.model
        .on_nesting_exceeded(move |event| sink.borrow_mut().push(*event));

    let customer = shop.customer.create_entity().unwrap();
    customer.set("visits", 1_i64).unwrap();

    assert_eq!(
        *exceeded.borrow(),
        vec![NestingExceeded {
            transfers: 10,
            ceiling: 10
        }]
    );
    assert_eq!(customer.get("visits").unwrap(), Value::Integer(11));
}

#[test]
fn large_batches_run_every_rule_once() {
    let shop = shop();
    let (runs, seen) = counter();
    shop.customer
        .add_rule(RuleOptions::new().on_change_of(["name"]).execute(move |_| {
            seen.set(seen.get() + 1);
            Ok(())
        }))
        .unwrap();

    let exceeded = Rc::new(Cell::new(false));
    let flag = Rc::clone(&exceeded);
    shop.model.on_nesting_exceeded(move |_| flag.set(true));

    let customers: Vec<Entity> = (0..150)
        .map(|_| {
            let customer = shop.customer.create_entity().unwrap();
            customer.set("name", "a").unwrap();
            customer
        })
        .collect();
    runs.set(0);

    shop.model
        .perform(|| {
            for customer in &customers {
                customer.set("name", "b")?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(runs.get(), 150);
    assert!(!exceeded.get());
}

// ── Calculated properties ────────────────────────────────────────

#[test]
fn calculated_properties_compute_on_first_read() {
    let shop = shop();
    let (runs, seen) = counter();
    add_total_rule(&shop, seen);

    let total = shop.order.property("total").unwrap();
    assert!(total.is_calculated());

    let order = shop.order.create_entity().unwrap();
    add_line(&shop, &order, 1.5);
    add_line(&shop, &order, 2.0);
    assert_eq!(runs.get(), 0);

    assert_eq!(order.get("total").unwrap(), Value::Number(3.5));
    assert_eq!(order.get("total").unwrap(), Value::Number(3.5));
    assert_eq!(runs.get(), 1);
}

#[test]
fn predicate_changes_invalidate_without_recomputing() {
    let shop = shop();
    let (runs, seen) = counter();
    add_total_rule(&shop, seen);

    let order = shop.order.create_entity().unwrap();
    let line = add_line(&shop, &order, 1.0);
    assert_eq!(order.get("total").unwrap(), Value::Number(1.0));

    let log = Log::new();
    let sink = log.clone();
    order.changed().subscribe(move |change| {
        if change.property.name() == "total" {
            sink.push(format!("{:?}", change.kind));
        }
        Ok(())
    });

    line.set("price", 5.0).unwrap();
    assert_eq!(log.entries(), vec![format!("{:?}", ChangeKind::Invalidated)]);
    assert_eq!(runs.get(), 1);

    assert_eq!(order.get("total").unwrap(), Value::Number(5.0));
    assert_eq!(runs.get(), 2);
}

#[test]
fn watched_calculated_properties_recompute_eagerly() {
    let shop = shop();
    let (runs, seen) = counter();
    add_total_rule(&shop, seen);

    let order = shop.order.create_entity().unwrap();
    let line = add_line(&shop, &order, 1.0);
    assert_eq!(order.get("total").unwrap(), Value::Number(1.0));

    let log = Log::new();
    let sink = log.clone();
    let total = shop.order.property("total").unwrap();
    let id = order.watch(&total, move |change| {
        sink.push(change.new.to_string());
        Ok(())
    });
    assert!(order.has_watchers(&total));

    line.set("price", 2.5).unwrap();
    assert_eq!(log.entries(), vec!["2.5"]);
    assert_eq!(runs.get(), 2);

    assert!(order.unwatch(id));
    assert!(!order.has_watchers(&total));
}

#[test]
fn calculated_list_properties_are_reconciled() {
    let shop = shop();
    shop.order
        .add_property(
            "expensive",
            ValueType::Entity("OrderLine".into()),
            true,
            false,
            PropertyOptions::default(),
        )
        .unwrap();
    shop.order
        .add_rule(
            CalculatedPropertyRule::new("expensive", |order| {
                let mut picked = Vec::new();
                for item in order.list("lines")?.items() {
                    if let Some(line) = item.as_entity() {
                        if line.get("price")?.as_number().unwrap_or(0.0) > 10.0 {
                            picked.push(item.clone());
                        }
                    }
                }
                let list = tessera_model::ObservableList::from_values(None, picked)?;
                Ok(Value::from(list))
            })
            .on_change_of(["lines.price"]),
        )
        .unwrap();

    let order = shop.order.create_entity().unwrap();
    let cheap = add_line(&shop, &order, 5.0);
    let pricey = add_line(&shop, &order, 50.0);

    let expensive = order.list("expensive").unwrap();
    assert_eq!(expensive.items(), vec![Value::from(&pricey)]);

    cheap.set("price", 20.0).unwrap();
    let again = order.list("expensive").unwrap();
    assert_eq!(again.len(), 2);
    assert!(again.contains(&Value::from(&cheap)));
}

// ── Registration ─────────────────────────────────────────────────

#[test]
fn invalid_rules_are_rejected() {
    let shop = shop();

    let err = shop
        .order
        .add_rule(RuleOptions::new().on_init())
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidRule { .. }), "{err}");

    let err = shop
        .order
        .add_rule(RuleOptions::new().execute(|_| Ok(())))
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidRule { .. }), "{err}");

    let err = shop
        .order
        .add_rule(
            RuleOptions::new()
                .on_change_of(["discount"])
                .execute(|_| Ok(())),
        )
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownProperty { .. }), "{err}");

    let err = shop
        .order
        .add_rule(
            RuleOptions::new()
                .returns(["customer.name"])
                .execute(|_| Ok(())),
        )
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidRule { .. }), "{err}");
}

#[test]
fn registered_rules_are_frozen() {
    let shop = shop();
    let rule = shop
        .order
        .add_rule(
            RuleOptions::new()
                .name("Order.touch")
                .on_change_of(["status"])
                .execute(|_| Ok(())),
        )
        .unwrap();

    assert!(rule.is_registered());
    assert_eq!(shop.order.rules(), vec![rule.clone()]);
    assert!(shop.order.property("status").unwrap().rules().contains(&rule));
    assert!(matches!(
        rule.on_change_of("number"),
        Err(ModelError::RuleRegistered(_))
    ));
    assert!(matches!(
        rule.add_invocation(RuleInvocation::INIT_NEW),
        Err(ModelError::RuleRegistered(_))
    ));
}

#[test]
fn rules_configured_by_hand_can_be_registered() {
    let shop = shop();
    let (runs, seen) = counter();
    let rule = tessera_model::Rule::new(
        &shop.order,
        RuleOptions::new().name("Order.audit").execute(move |_| {
            seen.set(seen.get() + 1);
            Ok(())
        }),
    )
    .unwrap();
    rule.on_change_of("status").unwrap();
    rule.add_invocation(RuleInvocation::INIT_NEW).unwrap();
    let rule = shop.order.add_rule(rule).unwrap();

    assert_eq!(
        rule.invocation(),
        RuleInvocation::new(RuleInvocation::INIT_NEW | RuleInvocation::PROPERTY_CHANGED)
    );

    let order = shop.order.create_entity().unwrap();
    order.set("status", "closed").unwrap();
    assert_eq!(runs.get(), 2);
}

#[test]
fn rules_belong_to_their_root_type() {
    let shop = shop();
    let rule = tessera_model::Rule::new(
        &shop.order,
        RuleOptions::new().on_init().execute(|_| Ok(())),
    )
    .unwrap();
    let err = shop.customer.add_rule(rule).unwrap_err();
    assert!(matches!(err, ModelError::InvalidRule { .. }), "{err}");
}

// ── Loading ──────────────────────────────────────────────────────

#[test]
fn registration_waits_for_loading_to_finish() {
    let shop = shop();
    let token = shop.model.begin_loading();
    assert!(shop.model.is_loading());

    let rule = shop
        .order
        .add_rule(|order: &Entity| order.set("number", "loaded"))
        .unwrap();
    assert!(!rule.is_registered());
    assert!(shop.order.rules().is_empty());

    token.finish().unwrap();
    assert!(!shop.model.is_loading());
    assert!(rule.is_registered());

    let order = shop.order.create_entity().unwrap();
    assert_eq!(order.get("number").unwrap(), Value::from("loaded"));
}

#[test]
fn deferred_registration_failures_surface_from_finish() {
    let shop = shop();
    let outer = shop.model.begin_loading();
    let inner = shop.model.begin_loading();

    shop.order
        .add_rule(
            RuleOptions::new()
                .on_change_of(["nowhere"])
                .execute(|_| Ok(())),
        )
        .unwrap();

    inner.finish().unwrap();
    assert!(shop.model.is_loading());
    let err = outer.finish().unwrap_err();
    assert!(matches!(err, ModelError::UnknownProperty { .. }), "{err}");
}

#[test]
fn dropping_the_token_ends_loading() {
    let shop = shop();
    {
        let _token = shop.model.begin_loading();
        assert!(shop.model.is_loading());
    }
    assert!(!shop.model.is_loading());
}

#[test]
fn dropped_tokens_do_not_leave_failures_for_later_loads() {
    let shop = shop();
    {
        let _token = shop.model.begin_loading();
        shop.order
            .add_rule(
                RuleOptions::new()
                    .on_change_of(["nowhere"])
                    .execute(|_| Ok(())),
            )
            .unwrap();
    }
    assert!(!shop.model.is_loading());

    let later = shop.model.begin_loading();
    later.finish().unwrap();
}
