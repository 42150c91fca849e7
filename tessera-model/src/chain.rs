//! Multi-step property chains.
//!
//! A chain starts at a root type and follows entity-valued properties. A
//! list-valued step fans out: every entity in the list is followed on its
//! own, and its index is recorded in the target's `indices`. A step's cast
//! filter drops entities that are not of the cast type.
//!
//! Chain-level change events are synthesized. The chain only listens to its
//! step properties while something is subscribed to it; when a step fires,
//! every known root instance whose path reaches the changed entity gets a
//! [`PathChange`].

use crate::entity::Entity;
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::events::{Channel, PathChange, PropertyChange};
use crate::property::Property;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tessera_events::HandlerId;

/// One step of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStep {
    pub property: Property,
    /// Cast applied to the entities this step's property holds.
    pub filter: Option<Type>,
}

/// A leaf reached by [`PropertyChain::each`]: the entity that owns the last
/// property, and the list indices taken on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTarget {
    pub entity: Entity,
    pub property: Property,
    pub indices: Vec<usize>,
}

struct ChainInner {
    root_type: Type,
    steps: Vec<ChainStep>,
    changed: Channel<PathChange>,
    listeners: RefCell<Vec<(Property, HandlerId)>>,
}

impl Drop for ChainInner {
    fn drop(&mut self) {
        for (property, id) in self.listeners.get_mut().drain(..) {
            property.changed().unsubscribe(id);
        }
    }
}

/// An immutable path of properties rooted at a type.
///
/// Equality is structural: two chains over the same steps are equal even
/// though each has its own subscribers.
#[derive(Clone)]
pub struct PropertyChain(Rc<ChainInner>);

impl PartialEq for PropertyChain {
    fn eq(&self, other: &Self) -> bool {
        self.0.root_type == other.0.root_type && self.0.steps == other.0.steps
    }
}

impl fmt::Debug for PropertyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyChain({}: {})", self.0.root_type.name(), self)
    }
}

impl fmt::Display for PropertyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(step.property.name())?;
            if let Some(filter) = &step.filter {
                write!(f, "<{}>", filter.name())?;
            }
        }
        Ok(())
    }
}

impl PropertyChain {
    /// Builds a chain. Empty chains are rejected.
    pub fn new(root_type: &Type, steps: Vec<ChainStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(ModelError::InvalidPath {
                path: String::new(),
                reason: "a chain needs at least one property".into(),
            });
        }
        Ok(Self(Rc::new(ChainInner {
            root_type: root_type.clone(),
            steps,
            changed: Channel::new(),
            listeners: RefCell::new(Vec::new()),
        })))
    }

    #[must_use]
    pub fn root_type(&self) -> &Type {
        &self.0.root_type
    }

    #[must_use]
    pub fn steps(&self) -> &[ChainStep] {
        &self.0.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.steps.len()
    }

    /// Always false; chains have at least one step.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.steps.is_empty()
    }

    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        self.0.steps.iter().map(|s| s.property.clone()).collect()
    }

    #[must_use]
    pub fn last_property(&self) -> Property {
        let last = self.0.steps.len() - 1;
        self.0.steps[last].property.clone()
    }

    // ── Traversal ────────────────────────────────────────────────

    /// Calls `callback` for every leaf reachable from `root`. Intermediate
    /// values are read through their properties, so they initialize and
    /// publish access events like any other read.
    pub fn each(
        &self,
        root: &Entity,
        mut callback: impl FnMut(&ChainTarget) -> Result<()>,
    ) -> Result<()> {
        if !root.is_instance_of(&self.0.root_type) {
            return Ok(());
        }
        let mut indices = Vec::new();
        self.walk(root, 0, &mut indices, &mut callback)
    }

    fn walk(
        &self,
        entity: &Entity,
        depth: usize,
        indices: &mut Vec<usize>,
        callback: &mut dyn FnMut(&ChainTarget) -> Result<()>,
    ) -> Result<()> {
        let step = &self.0.steps[depth];
        if !entity.is_instance_of(step.property.containing_type()) {
            return Ok(());
        }
        if depth + 1 == self.0.steps.len() {
            return callback(&ChainTarget {
                entity: entity.clone(),
                property: step.property.clone(),
                indices: indices.clone(),
            });
        }

        let value = step.property.value(entity)?;
        for (index, child) in children(&value, step.filter.as_ref()) {
            if let Some(index) = index {
                indices.push(index);
            }
            let walked = self.walk(&child, depth + 1, indices, callback);
            if index.is_some() {
                indices.pop();
            }
            walked?;
        }
        Ok(())
    }

    /// Every leaf reachable from `root`.
    pub fn targets(&self, root: &Entity) -> Result<Vec<ChainTarget>> {
        let mut targets = Vec::new();
        self.each(root, |target| {
            targets.push(target.clone());
            Ok(())
        })?;
        Ok(targets)
    }

    /// Value of the last property on the first leaf, or null when the path
    /// stops short.
    pub fn value(&self, root: &Entity) -> Result<Value> {
        match self.targets(root)?.first() {
            Some(target) => target.property.value(&target.entity),
            None => Ok(Value::Null),
        }
    }

    /// Value of the last property on every leaf.
    pub fn values(&self, root: &Entity) -> Result<Vec<Value>> {
        self.targets(root)?
            .iter()
            .map(|t| t.property.value(&t.entity))
            .collect()
    }

    /// True when the properties along the path are initialized.
    ///
    /// A null or empty step ends its branch. With `enforce_all`, every
    /// fanned-out branch must be initialized; otherwise one is enough.
    #[must_use]
    pub fn is_inited(&self, root: &Entity, enforce_all: bool) -> bool {
        self.branch_inited(root, 0, enforce_all)
    }

    fn branch_inited(&self, entity: &Entity, depth: usize, enforce_all: bool) -> bool {
        let step = &self.0.steps[depth];
        if !entity.is_instance_of(step.property.containing_type()) {
            return true;
        }
        let Some(value) = entity.peek(step.property.name()) else {
            return false;
        };
        if depth + 1 == self.0.steps.len() {
            return true;
        }
        let children = children(&value, step.filter.as_ref());
        if children.is_empty() {
            return true;
        }
        let mut branches = children
            .iter()
            .map(|(_, child)| self.branch_inited(child, depth + 1, enforce_all));
        if enforce_all {
            branches.all(|inited| inited)
        } else {
            branches.any(|inited| inited)
        }
    }

    /// True if, reading stored values only, `root` reaches `origin` as the
    /// entity holding step `step`.
    fn connects(&self, root: &Entity, origin: &Entity, step: usize) -> bool {
        self.reaches(root, 0, origin, step)
    }

    fn reaches(&self, entity: &Entity, depth: usize, origin: &Entity, step: usize) -> bool {
        if depth == step {
            return entity == origin;
        }
        let current = &self.0.steps[depth];
        let Some(value) = entity.peek(current.property.name()) else {
            return false;
        };
        children(&value, current.filter.as_ref())
            .iter()
            .any(|(_, child)| self.reaches(child, depth + 1, origin, step))
    }

    // ── Events ───────────────────────────────────────────────────

    /// Subscribes to path changes. The first subscriber makes the chain
    /// start listening to its step properties.
    pub fn subscribe(&self, handler: impl Fn(&PathChange) -> Result<()> + 'static) -> HandlerId {
        let id = self.0.changed.subscribe(handler);
        if self.0.listeners.borrow().is_empty() {
            self.attach();
        }
        id
    }

    /// Removes a subscription. The last one leaving detaches the chain from
    /// its step properties.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let removed = self.0.changed.unsubscribe(id);
        if self.0.changed.is_empty() {
            self.detach();
        }
        removed
    }

    /// True while the chain listens to its step properties.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        !self.0.listeners.borrow().is_empty()
    }

    fn attach(&self) {
        let listeners: Vec<(Property, HandlerId)> = self
            .0
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let chain: Weak<ChainInner> = Rc::downgrade(&self.0);
                let id = step.property.changed().subscribe(move |change| {
                    match chain.upgrade() {
                        Some(inner) => PropertyChain(inner).step_changed(index, change),
                        None => Ok(()),
                    }
                });
                (step.property.clone(), id)
            })
            .collect();
        *self.0.listeners.borrow_mut() = listeners;
    }

    fn detach(&self) {
        let listeners = std::mem::take(&mut *self.0.listeners.borrow_mut());
        for (property, id) in listeners {
            property.changed().unsubscribe(id);
        }
    }

    pub(crate) fn teardown(&self) {
        self.0.changed.clear();
        self.detach();
    }

    fn step_changed(&self, step: usize, change: &PropertyChange) -> Result<()> {
        let Some(origin) = &change.entity else {
            return Ok(());
        };
        let roots = if step == 0 {
            if origin.is_instance_of(&self.0.root_type) {
                vec![origin.clone()]
            } else {
                Vec::new()
            }
        } else {
            self.0
                .root_type
                .known()
                .into_iter()
                .filter(|root| self.connects(root, origin, step))
                .collect()
        };

        let trigger = self.0.steps[step].property.clone();
        for root in roots {
            let event = PathChange {
                root,
                chain: self.clone(),
                trigger: trigger.clone(),
                change: change.clone(),
            };
            self.0.changed.publish(&event)?;
        }
        Ok(())
    }
}

/// Entities held by `value` that pass `filter`, with their list index.
fn children(value: &Value, filter: Option<&Type>) -> Vec<(Option<usize>, Entity)> {
    let passes = |e: &Entity| filter.is_none_or(|ty| e.is_instance_of(ty));
    match value {
        Value::Entity(e) if passes(e) => vec![(None, e.clone())],
        Value::List(list) => list
            .items()
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::Entity(e) if passes(&e) => Some((Some(i), e)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
