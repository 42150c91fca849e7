mod common;

use common::{Log, shop};
use pretty_assertions::assert_eq;
use tessera_model::{
    ChangeKind, ModelError, Origin, PropertyOptions, Value, ValueType,
};

// ── Initialization ───────────────────────────────────────────────

#[test]
fn new_entities_start_with_defaults() {
    let shop = shop();
    let order = shop.order.create_entity().unwrap();

    assert!(order.meta().is_new());
    assert!(order.id().starts_with("+c"));
    assert_eq!(order.get("status").unwrap(), Value::from("open"));
    assert!(order.get("number").unwrap().is_null());

    let customer = shop.customer.create_entity().unwrap();
    assert_eq!(customer.get("vip").unwrap(), Value::Bool(false));
}

#[test]
fn existing_entities_initialize_lazily_on_read() {
    let shop = shop();
    let order = shop.order.create_existing("1001").unwrap();
    let status = shop.order.property("status").unwrap();

    assert!(!order.meta().is_new());
    assert!(!status.is_inited(&order));
    assert_eq!(order.get("status").unwrap(), Value::from("open"));
    assert!(status.is_inited(&order));
}

#[test]
fn first_write_to_an_uninitialized_property_is_silent() {
    let shop = shop();
    let customer = shop.customer.create_existing("7").unwrap();
    let log = Log::new();
    let sink = log.clone();
    customer.changed().subscribe(move |change| {
        sink.push(format!("{}: {} -> {}", change.property, change.old, change.new));
        Ok(())
    });

    customer.set("name", "Ann").unwrap();
    assert_eq!(log.len(), 0);
    assert_eq!(customer.get("name").unwrap(), Value::from("Ann"));

    customer.set("name", "Bob").unwrap();
    assert_eq!(log.entries(), vec!["name: Ann -> Bob"]);
}

// ── Writes ───────────────────────────────────────────────────────

#[test]
fn writing_the_same_value_publishes_nothing() {
    let shop = shop();
    let line = shop.line.create_entity().unwrap();
    line.set("price", 2.0).unwrap();

    let log = Log::new();
    let sink = log.clone();
    line.changed().subscribe(move |_| {
        sink.push("changed");
        Ok(())
    });

    line.set("price", 2.0).unwrap();
    line.set("price", 2_i64).unwrap();
    assert_eq!(log.len(), 0);

    line.set("price", 2.5).unwrap();
    assert_eq!(log.len(), 1);
}

#[test]
fn writing_nan_over_nan_publishes_nothing() {
    let shop = shop();
    let line = shop.line.create_entity().unwrap();
    line.set("price", f64::NAN).unwrap();

    let price = shop.line.property("price").unwrap();
    let log = Log::new();
    let sink = log.clone();
    price.changed().subscribe(move |_| {
        sink.push("property");
        Ok(())
    });
    let sink = log.clone();
    line.changed().subscribe(move |_| {
        sink.push("entity");
        Ok(())
    });

    line.set("price", f64::NAN).unwrap();
    line.set("price", Value::Number(f64::NAN)).unwrap();
    assert_eq!(log.len(), 0);
    assert!(line.get("price").unwrap().as_number().is_some_and(f64::is_nan));

    line.set("price", 1.0).unwrap();
    assert_eq!(log.entries(), vec!["property", "entity"]);
}

#[test]
fn property_channel_fires_before_entity_channel() {
    let shop = shop();
    let customer = shop.customer.create_entity().unwrap();
    let name = shop.customer.property("name").unwrap();
    let log = Log::new();

    let sink = log.clone();
    customer.changed().subscribe(move |_| {
        sink.push("entity");
        Ok(())
    });
    let sink = log.clone();
    name.changed().subscribe(move |change| {
        assert_eq!(change.kind, ChangeKind::Set);
        sink.push("property");
        Ok(())
    });

    customer.set("name", "Ann").unwrap();
    assert_eq!(log.entries(), vec!["property", "entity"]);
}

#[test]
fn writes_are_type_checked() {
    let shop = shop();
    let customer = shop.customer.create_entity().unwrap();
    let order = shop.order.create_entity().unwrap();

    let err = customer.set("vip", "yes").unwrap_err();
    assert!(matches!(err, ModelError::TypeMismatch { .. }), "{err}");

    let err = order.set("customer", &order).unwrap_err();
    assert!(matches!(err, ModelError::TypeMismatch { .. }), "{err}");

    order.set("customer", &customer).unwrap();
    assert_eq!(order.get("customer").unwrap(), Value::from(&customer));
    order.set("customer", Value::Null).unwrap();
    assert!(order.get("customer").unwrap().is_null());
}

#[test]
fn list_properties_cannot_be_reassigned() {
    let shop = shop();
    let order = shop.order.create_entity().unwrap();
    let err = order.set("lines", Value::Null).unwrap_err();
    assert!(matches!(err, ModelError::ListReassignment(_)), "{err}");
}

#[test]
fn unknown_properties_are_reported() {
    let shop = shop();
    let order = shop.order.create_entity().unwrap();
    let err = order.get("discount").unwrap_err();
    assert!(matches!(err, ModelError::UnknownProperty { .. }), "{err}");
}

#[test]
fn destroyed_entities_reject_access() {
    let shop = shop();
    let customer = shop.customer.create_entity().unwrap();
    customer.meta().destroy().unwrap();

    assert!(customer.is_destroyed());
    let err = customer.get("name").unwrap_err();
    assert!(matches!(err, ModelError::EntityDestroyed(_)), "{err}");
}

// ── Metadata ─────────────────────────────────────────────────────

#[test]
fn labels_derive_from_names_unless_given() {
    let shop = shop();
    let ty = &shop.customer;
    let phone = ty
        .add_property(
            "phoneNumber",
            ValueType::Text,
            false,
            false,
            PropertyOptions::default(),
        )
        .unwrap();
    let fax = ty
        .add_property(
            "fax",
            ValueType::Text,
            false,
            false,
            PropertyOptions::default()
                .label("Facsimile")
                .helptext("Nobody uses this")
                .persisted(false),
        )
        .unwrap();

    assert_eq!(phone.label(), "Phone Number");
    assert_eq!(phone.qualified_name(), "Customer.phoneNumber");
    assert_eq!(fax.label(), "Facsimile");
    assert_eq!(fax.helptext(), Some("Nobody uses this"));
    assert!(!fax.is_persisted());
}

#[test]
fn defaults_must_match_the_declared_type() {
    let shop = shop();
    let err = shop
        .customer
        .add_property(
            "age",
            ValueType::Integer,
            false,
            false,
            PropertyOptions::default().default_value("old"),
        )
        .unwrap_err();
    assert!(matches!(err, ModelError::TypeMismatch { .. }), "{err}");
}

#[test]
fn derived_types_inherit_properties() {
    let shop = shop();
    let preferred = shop
        .model
        .add_type("PreferredCustomer", Some(&shop.customer), Origin::Client)
        .unwrap();
    preferred
        .add_property("discount", ValueType::Number, false, false, PropertyOptions::default())
        .unwrap();

    let names: Vec<String> = preferred
        .all_properties()
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(names, vec!["name", "email", "vip", "discount"]);

    let err = preferred
        .add_property("email", ValueType::Text, false, false, PropertyOptions::default())
        .unwrap_err();
    assert!(matches!(err, ModelError::DuplicateProperty { .. }), "{err}");

    // A base type cannot declare what a derived type already has.
    let err = shop
        .customer
        .add_property("discount", ValueType::Number, false, false, PropertyOptions::default())
        .unwrap_err();
    assert!(matches!(err, ModelError::DuplicateProperty { .. }), "{err}");

    let entity = preferred.create_entity().unwrap();
    entity.set("name", "Ann").unwrap();
    assert!(entity.is_instance_of(&shop.customer));
    assert_eq!(entity.get("name").unwrap(), Value::from("Ann"));
}

// ── Static properties ────────────────────────────────────────────

#[test]
fn static_properties_hold_one_value_per_type() {
    let shop = shop();
    let rate = shop
        .order
        .add_property(
            "taxRate",
            ValueType::Number,
            false,
            true,
            PropertyOptions::default().default_value(0.2),
        )
        .unwrap();
    let log = Log::new();
    let sink = log.clone();
    rate.changed().subscribe(move |change| {
        assert!(change.entity.is_none());
        sink.push(change.new.to_string());
        Ok(())
    });

    assert_eq!(rate.static_value().unwrap(), Value::Number(0.2));
    rate.set_static_value(0.25).unwrap();
    assert_eq!(log.entries(), vec!["0.25"]);

    let order = shop.order.create_entity().unwrap();
    let err = order.get("taxRate").unwrap_err();
    assert!(matches!(err, ModelError::StaticProperty(_)), "{err}");
}

// ── Access events ────────────────────────────────────────────────

#[test]
fn reads_publish_access_events() {
    let shop = shop();
    let customer = shop.customer.create_entity().unwrap();
    customer.set("name", "Ann").unwrap();

    let log = Log::new();
    let sink = log.clone();
    customer.accessed().subscribe(move |access| {
        sink.push(format!("{}={}", access.property, access.value));
        Ok(())
    });

    customer.get("name").unwrap();
    assert_eq!(log.entries(), vec!["name=Ann"]);
}

#[test]
fn handler_errors_surface_from_writes() {
    let shop = shop();
    let customer = shop.customer.create_entity().unwrap();
    customer.changed().subscribe(|_| Err(ModelError::rule("audit", "read-only")));

    let err = customer.set("name", "Ann").unwrap_err();
    assert!(matches!(err, ModelError::Rule { .. }), "{err}");
    // The value itself was stored before publication.
    assert_eq!(customer.get("name").unwrap(), Value::from("Ann"));
}
