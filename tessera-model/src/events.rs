//! Event payloads published by the model.

use crate::chain::PropertyChain;
use crate::condition::Condition;
use crate::entity::Entity;
use crate::error::ModelError;
use crate::list::ListChange;
use crate::property::Property;
use crate::value::Value;
use tessera_events::EventChannel;

/// Channel whose handlers may fail with a [`ModelError`].
pub type Channel<A> = EventChannel<A, ModelError>;

/// What kind of change a [`PropertyChange`] reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// The value was replaced.
    Set,
    /// A calculated value went stale and will be recomputed on next read.
    Invalidated,
    /// A list property's list was edited in place.
    List(Vec<ListChange>),
}

/// Published on the property, then on the entity, after a real change.
#[derive(Debug, Clone)]
pub struct PropertyChange {
    /// `None` for static properties.
    pub entity: Option<Entity>,
    pub property: Property,
    pub old: Value,
    pub new: Value,
    pub kind: ChangeKind,
}

/// Published on every read.
#[derive(Debug, Clone)]
pub struct PropertyAccess {
    /// `None` for static properties.
    pub entity: Option<Entity>,
    pub property: Property,
    pub value: Value,
}

/// A condition was attached to or removed from an entity.
#[derive(Debug, Clone)]
pub struct ConditionsChanged {
    pub entity: Entity,
    pub condition: Condition,
    pub added: bool,
}

/// A property somewhere along a chain changed for `root`.
#[derive(Debug, Clone)]
pub struct PathChange {
    pub root: Entity,
    pub chain: PropertyChain,
    /// The step property that actually fired.
    pub trigger: Property,
    /// The low-level change that caused this event.
    pub change: PropertyChange,
}
