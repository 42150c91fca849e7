//! Reactive entity model for Tessera.
//!
//! A [`Model`] owns [`Type`]s. Types declare [`Property`]s and [`Rule`]s and
//! create [`Entity`] instances. Writes publish change events inside
//! transaction scopes; rules react to those events, recompute calculated
//! properties and attach validation [`Condition`]s.
//!
//! - [`Value`] / [`ValueType`]: what a property holds and accepts
//! - [`ObservableList`]: list values with batched, diff-based change events
//! - [`PropertyPath`] / [`PropertyChain`]: dotted paths across entity
//!   references, with change propagation back to the root
//! - [`rule`]: rule registration plus the stock validation and calculation
//!   rules
//! - [`condition`]: condition types, sets and their targets
//!
//! The model is single-threaded. Handles are cheap `Rc` clones and compare
//! by identity.

mod chain;
pub mod condition;
mod config;
mod entity;
mod entity_type;
mod error;
mod events;
mod identity;
mod list;
mod model;
mod path;
mod property;
pub mod rule;
mod value;

pub use chain::{ChainStep, ChainTarget, PropertyChain};
pub use condition::{
    Condition, ConditionCategory, ConditionRegistry, ConditionTarget, ConditionType,
    ConditionTypeSet,
};
pub use config::ModelConfig;
pub use entity::{Entity, ObjectMeta, WeakEntity};
pub use entity_type::{Origin, Type, TypeEvents};
pub use error::{ModelError, Result};
pub use events::{
    ChangeKind, Channel, ConditionsChanged, PathChange, PropertyAccess, PropertyChange,
};
pub use identity::parse_identity;
pub use list::{ListChange, ListChanged, ObservableList};
pub use model::{LoadToken, Model, ModelEvents};
pub use path::PropertyPath;
pub use property::{Property, PropertyOptions};
pub use rule::{
    AllowedValuesRule, AllowedValuesSource, CalculatedPropertyRule, ConditionRule, IntoRule,
    ListLengthRule, RangeRule, RequiredRule, Rule, RuleFn, RuleId, RuleInvocation, RuleOptions,
    StringFormatRule, StringLengthRule, ValidatedPropertyRule,
};
pub use tessera_events::{HandlerId, NestingExceeded};
pub use value::{Value, ValueType};
