//! Shared fixtures for model tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use tessera_model::{Model, ModelConfig, Origin, PropertyOptions, Type, ValueType};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A small order-entry model:
///
/// - `Customer { name, email, vip }`
/// - `Order { number, customer: Customer, lines: [OrderLine], status, total }`
/// - `OrderLine { description, quantity, price, amount }`
pub struct Shop {
    pub model: Model,
    pub customer: Type,
    pub order: Type,
    pub line: Type,
}

pub fn shop() -> Shop {
    shop_with(ModelConfig::default())
}

pub fn shop_with(config: ModelConfig) -> Shop {
    init_tracing();
    let model = Model::with_config(config);
    let customer = model.add_type("Customer", None, Origin::Client).unwrap();
    let order = model.add_type("Order", None, Origin::Client).unwrap();
    let line = model.add_type("OrderLine", None, Origin::Client).unwrap();

    text(&customer, "name");
    text(&customer, "email");
    customer
        .add_property("vip", ValueType::Bool, false, false, PropertyOptions::default())
        .unwrap();

    text(&order, "number");
    order
        .add_property(
            "customer",
            ValueType::Entity("Customer".into()),
            false,
            false,
            PropertyOptions::default(),
        )
        .unwrap();
    order
        .add_property(
            "lines",
            ValueType::Entity("OrderLine".into()),
            true,
            false,
            PropertyOptions::default(),
        )
        .unwrap();
    order
        .add_property(
            "status",
            ValueType::Text,
            false,
            false,
            PropertyOptions::default().default_value("open"),
        )
        .unwrap();
    order
        .add_property("total", ValueType::Number, false, false, PropertyOptions::default())
        .unwrap();

    text(&line, "description");
    line.add_property("quantity", ValueType::Integer, false, false, PropertyOptions::default())
        .unwrap();
    line.add_property("price", ValueType::Number, false, false, PropertyOptions::default())
        .unwrap();
    line.add_property("amount", ValueType::Number, false, false, PropertyOptions::default())
        .unwrap();

    Shop {
        model,
        customer,
        order,
        line,
    }
}

fn text(ty: &Type, name: &str) {
    ty.add_property(name, ValueType::Text, false, false, PropertyOptions::default())
        .unwrap();
}

/// Shared log that handlers append to.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}
