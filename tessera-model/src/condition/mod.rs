//! Validation conditions.
//!
//! A [`ConditionType`] is a coded category (error, warning or permission).
//! A [`Condition`] is one occurrence of it, attached to one or more entities
//! through [`ConditionTarget`]s. An entity carries at most one target per
//! condition type code; attaching a second replaces the first.

mod condition_type;
mod registry;
mod set;

pub use condition_type::ConditionType;
pub use registry::ConditionRegistry;
pub use set::ConditionTypeSet;

use crate::entity::{Entity, WeakEntity};
use crate::error::Result;
use crate::events::ConditionsChanged;
use crate::path::PropertyPath;
use crate::property::Property;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// What a condition type means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionCategory {
    Error,
    Warning,
    /// Grants or denies `permission`.
    Permission { permission: String, is_allowed: bool },
}

/// One entity a condition applies to, with the properties it concerns.
#[derive(Debug, Clone)]
pub struct ConditionTarget {
    pub condition: Condition,
    pub entity: Entity,
    pub properties: Vec<Property>,
}

struct TargetSlot {
    entity: Entity,
    properties: Vec<Property>,
}

struct ConditionInner {
    condition_type: ConditionType,
    /// The entity the target paths were resolved from.
    root: WeakEntity,
    message: String,
    targets: RefCell<Vec<TargetSlot>>,
    destroyed: Cell<bool>,
}

/// An occurrence of a [`ConditionType`].
#[derive(Clone)]
pub struct Condition(Rc<ConditionInner>);

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("code", &self.0.condition_type.code())
            .field("message", &self.0.message)
            .field("targets", &self.0.targets.borrow().len())
            .finish()
    }
}

impl Condition {
    /// Creates a condition and attaches it.
    ///
    /// With no paths the condition targets `root` alone. Each path adds its
    /// last property to the entities that own it: `root` for a plain
    /// property, every leaf for a chain (list steps included). Entities
    /// reached more than once share one target.
    pub fn new(
        condition_type: &ConditionType,
        root: &Entity,
        paths: &[PropertyPath],
        message: impl Into<String>,
    ) -> Result<Self> {
        let slots = resolve_slots(root, paths)?;
        Self::attach(condition_type, root, slots, message.into())
    }

    fn attach(
        condition_type: &ConditionType,
        root: &Entity,
        slots: Vec<TargetSlot>,
        message: String,
    ) -> Result<Self> {
        let condition = Self(Rc::new(ConditionInner {
            condition_type: condition_type.clone(),
            root: root.downgrade(),
            message,
            targets: RefCell::new(slots),
            destroyed: Cell::new(false),
        }));

        for target in condition.targets() {
            let entity = target.entity.clone();
            if let Some(replaced) = entity.attach_target(target) {
                if replaced.condition != condition {
                    replaced.condition.release_target(&entity, false)?;
                }
            }
        }
        condition_type.track(&condition);
        trace!(
            code = %condition_type.code(),
            targets = condition.0.targets.borrow().len(),
            "condition created"
        );

        for target in condition.targets() {
            publish(&target.entity, &condition, true)?;
        }
        Ok(condition)
    }

    #[must_use]
    pub fn condition_type(&self) -> &ConditionType {
        &self.0.condition_type
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// The entity the condition was created for. It need not be a target:
    /// chain paths only target their leaves.
    #[must_use]
    pub fn root(&self) -> Option<Entity> {
        self.0.root.upgrade()
    }

    /// True if the targets are exactly `slots`, properties in any order.
    fn covers(&self, slots: &[TargetSlot]) -> bool {
        let current = self.0.targets.borrow();
        current.len() == slots.len()
            && slots.iter().all(|slot| {
                current.iter().any(|c| {
                    c.entity == slot.entity
                        && c.properties.len() == slot.properties.len()
                        && slot.properties.iter().all(|p| c.properties.contains(p))
                })
            })
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    #[must_use]
    pub fn targets(&self) -> Vec<ConditionTarget> {
        self.0
            .targets
            .borrow()
            .iter()
            .map(|slot| ConditionTarget {
                condition: self.clone(),
                entity: slot.entity.clone(),
                properties: slot.properties.clone(),
            })
            .collect()
    }

    /// Detaches the condition from every target and drops it from its type
    /// and sets.
    pub fn destroy(&self) -> Result<()> {
        if self.0.destroyed.replace(true) {
            return Ok(());
        }
        self.0.condition_type.untrack(self);

        let slots = std::mem::take(&mut *self.0.targets.borrow_mut());
        for slot in &slots {
            slot.entity.detach_condition(self);
        }
        trace!(code = %self.0.condition_type.code(), "condition destroyed");
        for slot in &slots {
            publish(&slot.entity, self, false)?;
        }
        Ok(())
    }

    /// Detaches one entity. The condition is destroyed when no target is
    /// left.
    pub fn remove_target(&self, entity: &Entity) -> Result<()> {
        self.release_target(entity, true)
    }

    fn release_target(&self, entity: &Entity, detach: bool) -> Result<()> {
        let removed = {
            let mut slots = self.0.targets.borrow_mut();
            let before = slots.len();
            slots.retain(|s| &s.entity != entity);
            slots.len() != before
        };
        if !removed {
            return Ok(());
        }
        if detach {
            entity.detach_condition(self);
        }
        publish(entity, self, false)?;
        if self.0.targets.borrow().is_empty() {
            self.destroy()?;
        }
        Ok(())
    }
}

/// Target slots for `paths` resolved from `root`. With no paths the root
/// alone is targeted. A plain property targets the root, a chain every leaf
/// it reaches (list steps included). Entities reached more than once share
/// one slot.
fn resolve_slots(root: &Entity, paths: &[PropertyPath]) -> Result<Vec<TargetSlot>> {
    let mut slots: Vec<TargetSlot> = Vec::new();
    let mut add = |entity: &Entity, property: Option<Property>| {
        let index = match slots.iter().position(|s| &s.entity == entity) {
            Some(index) => index,
            None => {
                slots.push(TargetSlot {
                    entity: entity.clone(),
                    properties: Vec::new(),
                });
                slots.len() - 1
            }
        };
        if let Some(property) = property {
            if !slots[index].properties.contains(&property) {
                slots[index].properties.push(property);
            }
        }
    };

    if paths.is_empty() {
        add(root, None);
    }
    for path in paths {
        match path {
            PropertyPath::Property(property) => add(root, Some(property.clone())),
            PropertyPath::Chain(chain) => {
                for target in chain.targets(root)? {
                    add(&target.entity, Some(target.property));
                }
            }
        }
    }
    Ok(slots)
}

/// Publishes on the entity, then on its type and every ancestor.
fn publish(entity: &Entity, condition: &Condition, added: bool) -> Result<()> {
    let event = ConditionsChanged {
        entity: entity.clone(),
        condition: condition.clone(),
        added,
    };
    let ty = entity.entity_type();
    let lineage = ty.lineage();
    ty.context().scopes.perform(|| {
        entity.conditions_changed().publish(&event)?;
        for t in &lineage {
            t.events().conditions_changed.publish(&event)?;
        }
        Ok(())
    })
}
