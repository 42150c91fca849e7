mod common;

use common::{Log, shop, shop_with};
use pretty_assertions::assert_eq;
use std::io::Write;
use tessera_model::{Model, ModelConfig, ModelError, Origin, Value};

// ── Types ────────────────────────────────────────────────────────

#[test]
fn type_names_are_unique_and_well_formed() {
    let model = Model::new();
    let order = model.add_type("Order", None, Origin::Server).unwrap();
    assert_eq!(order.origin(), Origin::Server);

    let err = model.add_type("Order", None, Origin::Client).unwrap_err();
    assert!(matches!(err, ModelError::DuplicateType(_)), "{err}");

    let err = model.add_type("Order|Line", None, Origin::Client).unwrap_err();
    assert!(matches!(err, ModelError::InvalidPath { .. }), "{err}");

    let err = model.require_type("Invoice").unwrap_err();
    assert!(matches!(err, ModelError::UnknownType(_)), "{err}");
}

#[test]
fn types_from_another_model_cannot_be_bases() {
    let first = Model::new();
    let second = Model::new();
    let base = first.add_type("Party", None, Origin::Client).unwrap();
    let err = second
        .add_type("Customer", Some(&base), Origin::Client)
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownType(_)), "{err}");
}

#[test]
fn lineage_runs_from_the_type_to_its_root() {
    let model = Model::new();
    let party = model.add_type("Party", None, Origin::Client).unwrap();
    let customer = model.add_type("Customer", Some(&party), Origin::Client).unwrap();
    let vip = model.add_type("VipCustomer", Some(&customer), Origin::Client).unwrap();

    let names: Vec<String> = vip.lineage().iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["VipCustomer", "Customer", "Party"]);
    assert!(vip.is_subtype_of(&party));
    assert!(!party.is_subtype_of(&vip));
    assert_eq!(party.derived_types(), vec![customer.clone()]);
    assert_eq!(vip.base_type(), Some(&customer));

    let all: Vec<String> = model.types().iter().map(|t| t.name().to_string()).collect();
    assert_eq!(all, vec!["Party", "Customer", "VipCustomer"]);
}

#[test]
fn registry_events_announce_types_and_entities() {
    let model = Model::new();
    let log = Log::new();
    let sink = log.clone();
    model.events().type_added.subscribe(move |ty| {
        sink.push(format!("type {}", ty.name()));
        Ok(())
    });
    let sink = log.clone();
    model.events().entity_registered.subscribe(move |entity| {
        sink.push(format!("registered {}", entity.identity()));
        Ok(())
    });
    let sink = log.clone();
    model.events().entity_unregistered.subscribe(move |entity| {
        sink.push(format!("unregistered {}", entity.identity()));
        Ok(())
    });

    let order = model.add_type("Order", None, Origin::Client).unwrap();
    let entity = order.create_existing("9").unwrap();
    entity.meta().destroy().unwrap();

    assert_eq!(
        log.entries(),
        vec!["type Order", "registered Order|9", "unregistered Order|9"]
    );
}

// ── Pools ────────────────────────────────────────────────────────

#[test]
fn ids_are_pooled_case_insensitively() {
    let shop = shop();
    let order = shop.order.create_existing("AbC-1").unwrap();
    assert_eq!(shop.order.get("abc-1", false), Some(order.clone()));
    assert_eq!(shop.order.get_or_create("ABC-1").unwrap(), order);

    let err = shop.order.create_existing("abc-1").unwrap_err();
    assert!(matches!(err, ModelError::DuplicateId { .. }), "{err}");
}

#[test]
fn derived_instances_live_in_base_pools() {
    let shop = shop();
    let preferred = shop
        .model
        .add_type("PreferredCustomer", Some(&shop.customer), Origin::Client)
        .unwrap();
    let plain = shop.customer.create_existing("1").unwrap();
    let special = preferred.create_existing("2").unwrap();

    assert_eq!(shop.customer.get("2", false), Some(special.clone()));
    assert_eq!(shop.customer.get("2", true), None);
    assert_eq!(preferred.get("1", false), None);
    assert_eq!(shop.customer.known(), vec![plain, special.clone()]);
    assert_eq!(preferred.known(), vec![special]);

    let err = preferred.create_existing("1").unwrap_err();
    assert!(matches!(err, ModelError::DuplicateId { .. }), "{err}");
}

#[test]
fn invalid_ids_are_rejected() {
    let shop = shop();
    for id in ["", "a|b"] {
        let err = shop.order.create_existing(id).unwrap_err();
        assert!(matches!(err, ModelError::InvalidIdentity(_)), "{id:?}: {err}");
    }
}

#[test]
fn change_id_keeps_the_old_id_resolvable() {
    let shop = shop();
    let order = shop.order.create_entity().unwrap();
    let temporary = order.id();
    assert!(order.meta().is_new());
    assert_eq!(order.meta().legacy_id(), None);

    order.meta().change_id("1001").unwrap();

    assert_eq!(order.id(), "1001");
    assert!(!order.meta().is_new());
    assert_eq!(order.meta().legacy_id(), Some(temporary.clone()));
    assert_eq!(shop.order.get("1001", false), Some(order.clone()));
    assert_eq!(shop.order.get(&temporary, false), Some(order.clone()));

    let other = shop.order.create_entity().unwrap();
    let err = other.meta().change_id("1001").unwrap_err();
    assert!(matches!(err, ModelError::DuplicateId { .. }), "{err}");
}

#[test]
fn generated_ids_use_the_configured_prefix() {
    let shop = shop_with(ModelConfig {
        new_id_prefix: "tmp-".into(),
        ..ModelConfig::default()
    });
    let first = shop.order.create_entity().unwrap();
    let second = shop.order.create_entity().unwrap();
    assert!(first.id().starts_with("tmp-"));
    assert_ne!(first.id(), second.id());
}

// ── Identities ───────────────────────────────────────────────────

#[test]
fn identities_round_trip_through_the_model() {
    let shop = shop();
    let order = shop.order.create_existing("42").unwrap();
    assert_eq!(order.identity(), "Order|42");
    assert_eq!(format!("{order:?}"), "Entity(Order|42)");
    assert_eq!(Value::from(&order).to_string(), "Order|42");

    assert_eq!(shop.model.resolve_identity("Order|42").unwrap(), Some(order.clone()));
    assert_eq!(shop.model.resolve_identity("Order|43").unwrap(), None);
    assert_eq!(shop.model.from_identity("Order|42").unwrap(), order);

    let created = shop.model.from_identity("Customer|7").unwrap();
    assert!(!created.meta().is_new());
    assert_eq!(created.entity_type(), &shop.customer);
}

#[test]
fn malformed_identities_are_errors() {
    let shop = shop();
    let err = shop.model.resolve_identity("Order").unwrap_err();
    assert!(matches!(err, ModelError::InvalidIdentity(_)), "{err}");

    let err = shop.model.from_identity("Invoice|1").unwrap_err();
    assert!(matches!(err, ModelError::UnknownType(_)), "{err}");
}

// ── Scopes ───────────────────────────────────────────────────────

#[test]
fn perform_defers_change_work_until_the_scope_exits() {
    let shop = shop();
    let customer = shop.customer.create_entity().unwrap();
    assert!(!shop.model.scopes().is_active());

    let value = shop
        .model
        .perform(|| {
            assert!(shop.model.scopes().is_active());
            customer.set("name", "Ann")?;
            Ok(5)
        })
        .unwrap();
    assert_eq!(value, 5);
    assert!(!shop.model.scopes().is_active());
}

// ── Configuration ────────────────────────────────────────────────

#[test]
fn config_defaults_fill_missing_fields() {
    let config = ModelConfig::from_toml_str("max_scope_nesting = 5").unwrap();
    assert_eq!(
        config,
        ModelConfig {
            max_scope_nesting: 5,
            ..ModelConfig::default()
        }
    );
    assert_eq!(ModelConfig::default().new_id_prefix, "+c");
}

#[test]
fn config_values_are_validated() {
    let err = ModelConfig::from_toml_str("max_scope_nesting = 0").unwrap_err();
    assert!(matches!(err, ModelError::InvalidConfig(_)), "{err}");

    let err = ModelConfig::from_json_str(r#"{"new_id_prefix": "a|b"}"#).unwrap_err();
    assert!(matches!(err, ModelError::InvalidConfig(_)), "{err}");

    let err = ModelConfig::from_toml_str("max_scope_nesting = \"many\"").unwrap_err();
    assert!(matches!(err, ModelError::Config(_)), "{err}");
}

#[test]
fn config_files_load_by_extension() {
    let dir = tempfile::tempdir().unwrap();

    let toml_path = dir.path().join("model.toml");
    let mut file = std::fs::File::create(&toml_path).unwrap();
    writeln!(file, "new_id_prefix = \"draft-\"").unwrap();
    writeln!(file, "validate_on_init_existing = false").unwrap();
    let config = ModelConfig::load_from(&toml_path).unwrap();
    assert_eq!(config.new_id_prefix, "draft-");
    assert!(!config.validate_on_init_existing);

    let json_path = dir.path().join("model.json");
    std::fs::write(&json_path, r#"{"max_scope_nesting": 12}"#).unwrap();
    let config = ModelConfig::load_from(&json_path).unwrap();
    assert_eq!(config.max_scope_nesting, 12);

    let missing = ModelConfig::load_from(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(missing, ModelError::Io(_)), "{missing}");
}

// ── Teardown ─────────────────────────────────────────────────────

#[test]
fn dropping_the_model_releases_its_entities() {
    let weak = {
        let shop = shop();
        let order = shop.order.create_entity().unwrap();
        let customer = shop.customer.create_entity().unwrap();
        order.set("customer", &customer).unwrap();
        order.list("lines").unwrap().push(&shop.line.create_entity().unwrap()).unwrap();
        order.downgrade()
    };
    assert!(weak.upgrade().is_none());
}
