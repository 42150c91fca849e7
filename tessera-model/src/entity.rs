//! Entities and their per-instance metadata.

use crate::condition::{Condition, ConditionTarget, ConditionType, ConditionTypeSet};
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::events::{Channel, ConditionsChanged, PropertyAccess, PropertyChange};
use crate::property::Property;
use crate::rule::RuleId;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use tessera_events::HandlerId;
use tracing::trace;

struct MetaState {
    id: String,
    is_new: bool,
    legacy_id: Option<String>,
    /// Condition type code to the target attached for it.
    conditions: BTreeMap<String, ConditionTarget>,
}

pub(crate) struct EntityInner {
    entity_type: Type,
    serial: u64,
    meta: RefCell<MetaState>,
    values: RefCell<HashMap<String, Value>>,
    pending_rules: RefCell<HashSet<RuleId>>,
    /// Calculated properties whose value is current.
    fresh: RefCell<HashSet<String>>,
    watchers: RefCell<Vec<(HandlerId, String)>>,
    destroyed: Cell<bool>,
    changed: Channel<PropertyChange>,
    accessed: Channel<PropertyAccess>,
    conditions_changed: Channel<ConditionsChanged>,
}

/// An identity-bearing instance of a [`Type`].
#[derive(Clone)]
pub struct Entity(Rc<EntityInner>);

/// Non-owning entity handle.
#[derive(Clone)]
pub struct WeakEntity(Weak<EntityInner>);

impl WeakEntity {
    #[must_use]
    pub fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(Entity)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.identity())
    }
}

impl Entity {
    pub(crate) fn new(entity_type: &Type, id: String, is_new: bool, serial: u64) -> Self {
        Self(Rc::new(EntityInner {
            entity_type: entity_type.clone(),
            serial,
            meta: RefCell::new(MetaState {
                id,
                is_new,
                legacy_id: None,
                conditions: BTreeMap::new(),
            }),
            values: RefCell::new(HashMap::new()),
            pending_rules: RefCell::new(HashSet::new()),
            fresh: RefCell::new(HashSet::new()),
            watchers: RefCell::new(Vec::new()),
            destroyed: Cell::new(false),
            changed: Channel::new(),
            accessed: Channel::new(),
            conditions_changed: Channel::new(),
        }))
    }

    #[must_use]
    pub fn entity_type(&self) -> &Type {
        &self.0.entity_type
    }

    #[must_use]
    pub fn meta(&self) -> ObjectMeta {
        ObjectMeta {
            entity: self.clone(),
        }
    }

    /// Shortcut for `meta().id()`.
    #[must_use]
    pub fn id(&self) -> String {
        self.0.meta.borrow().id.clone()
    }

    pub(crate) fn serial(&self) -> u64 {
        self.0.serial
    }

    #[must_use]
    pub fn is_instance_of(&self, ty: &Type) -> bool {
        self.0.entity_type.is_subtype_of(ty)
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakEntity {
        WeakEntity(Rc::downgrade(&self.0))
    }

    fn property(&self, name: &str) -> Result<Property> {
        self.0
            .entity_type
            .property(name)
            .ok_or_else(|| ModelError::UnknownProperty {
                path: format!("{}.{}", self.0.entity_type.name(), name),
                property: name.to_string(),
            })
    }

    /// Reads a property by name.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.property(name)?.value(self)
    }

    /// Writes a property by name.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.property(name)?.set_value(self, value)
    }

    /// Reconciles a list property by name.
    pub fn update_list(&self, name: &str, values: Vec<Value>) -> Result<()> {
        self.property(name)?.update_list(self, values)
    }

    /// The list held by a list property.
    pub fn list(&self, name: &str) -> Result<crate::ObservableList> {
        let property = self.property(name)?;
        match property.value(self)? {
            Value::List(list) => Ok(list),
            other => Err(ModelError::TypeMismatch {
                property: property.qualified_name(),
                expected: "list".into(),
                actual: other.kind_name().into(),
            }),
        }
    }

    // ── Events ───────────────────────────────────────────────────

    /// Changes to any of this entity's properties.
    #[must_use]
    pub fn changed(&self) -> &Channel<PropertyChange> {
        &self.0.changed
    }

    /// Reads of any of this entity's properties.
    #[must_use]
    pub fn accessed(&self) -> &Channel<PropertyAccess> {
        &self.0.accessed
    }

    #[must_use]
    pub fn conditions_changed(&self) -> &Channel<ConditionsChanged> {
        &self.0.conditions_changed
    }

    /// Subscribes to changes of one property on this entity. Calculated
    /// properties with watchers are recomputed as soon as their inputs
    /// change instead of waiting for the next read.
    pub fn watch(
        &self,
        property: &Property,
        handler: impl Fn(&PropertyChange) -> Result<()> + 'static,
    ) -> HandlerId {
        let name = property.name().to_string();
        let filter_name = name.clone();
        let id = self.0.changed.subscribe_filtered(
            move |change| change.property.name() == filter_name,
            handler,
        );
        self.0.watchers.borrow_mut().push((id, name));
        id
    }

    /// Removes a [`watch`](Self::watch) subscription.
    pub fn unwatch(&self, id: HandlerId) -> bool {
        self.0.watchers.borrow_mut().retain(|(w, _)| *w != id);
        self.0.changed.unsubscribe(id)
    }

    #[must_use]
    pub fn has_watchers(&self, property: &Property) -> bool {
        self.0
            .watchers
            .borrow()
            .iter()
            .any(|(_, name)| name == property.name())
    }

    // ── Raw storage ──────────────────────────────────────────────

    /// The stored value, without initializing or publishing anything.
    pub(crate) fn peek(&self, name: &str) -> Option<Value> {
        self.0.values.borrow().get(name).cloned()
    }

    pub(crate) fn has_value(&self, name: &str) -> bool {
        self.0.values.borrow().contains_key(name)
    }

    pub(crate) fn write_raw(&self, name: &str, value: Value) -> Option<Value> {
        self.0.values.borrow_mut().insert(name.to_string(), value)
    }

    pub(crate) fn insert_pending(&self, rule: RuleId) -> bool {
        self.0.pending_rules.borrow_mut().insert(rule)
    }

    pub(crate) fn remove_pending(&self, rule: RuleId) {
        self.0.pending_rules.borrow_mut().remove(&rule);
    }

    pub(crate) fn is_fresh(&self, property: &Property) -> bool {
        self.0.fresh.borrow().contains(property.name())
    }

    pub(crate) fn mark_fresh(&self, property: &Property) {
        self.0.fresh.borrow_mut().insert(property.name().to_string());
    }

    pub(crate) fn mark_stale(&self, property: &Property) {
        self.0.fresh.borrow_mut().remove(property.name());
    }

    pub(crate) fn attached_targets(&self) -> Vec<ConditionTarget> {
        self.0.meta.borrow().conditions.values().cloned().collect()
    }

    /// Stores `target` under its condition type code, returning the target
    /// it replaces.
    pub(crate) fn attach_target(&self, target: ConditionTarget) -> Option<ConditionTarget> {
        let code = target.condition.condition_type().code().to_string();
        self.0.meta.borrow_mut().conditions.insert(code, target)
    }

    /// Removes the target for `condition` if it is the one attached.
    pub(crate) fn detach_condition(&self, condition: &Condition) {
        let code = condition.condition_type().code();
        let mut meta = self.0.meta.borrow_mut();
        if meta
            .conditions
            .get(code)
            .is_some_and(|t| &t.condition == condition)
        {
            meta.conditions.remove(code);
        }
    }

    /// Breaks every reference this entity holds.
    pub(crate) fn teardown(&self) {
        let values = std::mem::take(&mut *self.0.values.borrow_mut());
        for value in values.values() {
            if let Value::List(list) = value {
                list.teardown();
            }
        }
        drop(values);
        let conditions = std::mem::take(&mut self.0.meta.borrow_mut().conditions);
        drop(conditions);
        self.0.pending_rules.borrow_mut().clear();
        self.0.fresh.borrow_mut().clear();
        self.0.watchers.borrow_mut().clear();
        self.0.changed.clear();
        self.0.accessed.clear();
        self.0.conditions_changed.clear();
    }
}

/// Per-instance bookkeeping: identity, newness and attached conditions.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    entity: Entity,
}

impl ObjectMeta {
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    #[must_use]
    pub fn id(&self) -> String {
        self.entity.id()
    }

    /// True for entities created locally and not yet given a permanent id.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.entity.0.meta.borrow().is_new
    }

    /// The id the entity had before its last [`change_id`](Self::change_id).
    #[must_use]
    pub fn legacy_id(&self) -> Option<String> {
        self.entity.0.meta.borrow().legacy_id.clone()
    }

    /// Gives the entity a permanent id. The old id keeps resolving through
    /// the legacy pool.
    pub fn change_id(&self, new_id: &str) -> Result<()> {
        if new_id.is_empty() || new_id.contains('|') {
            return Err(ModelError::InvalidIdentity(new_id.to_string()));
        }
        let old_id = self.id();
        if old_id == new_id {
            return Ok(());
        }
        self.entity.0.entity_type.rekey(&self.entity, &old_id, new_id)?;
        let mut meta = self.entity.0.meta.borrow_mut();
        meta.legacy_id = Some(old_id);
        meta.id = new_id.to_string();
        meta.is_new = false;
        Ok(())
    }

    /// Destroys the entity: conditions only it carried are destroyed, the
    /// rest let go of it, it leaves every pool, and destroy events fire on
    /// its type and each ancestor.
    pub fn destroy(&self) -> Result<()> {
        let entity = &self.entity;
        if entity.0.destroyed.replace(true) {
            return Ok(());
        }

        for target in entity.attached_targets() {
            if target.condition.targets().len() <= 1 {
                target.condition.destroy()?;
            } else {
                target.condition.remove_target(entity)?;
            }
        }

        let ty = entity.0.entity_type.clone();
        ty.unregister(entity);
        let ctx = ty.context();
        let lineage = ty.lineage();
        let published = ctx.scopes.perform(|| {
            for t in &lineage {
                t.events().destroy.publish(entity)?;
            }
            ctx.events.entity_unregistered.publish(entity)
        });
        trace!(identity = %entity.identity(), "entity destroyed");

        let values = std::mem::take(&mut *entity.0.values.borrow_mut());
        drop(values);
        entity.0.pending_rules.borrow_mut().clear();
        published
    }

    /// Every condition attached to the entity.
    #[must_use]
    pub fn conditions(&self) -> Vec<Condition> {
        self.entity
            .attached_targets()
            .into_iter()
            .map(|t| t.condition)
            .collect()
    }

    /// Attached conditions whose type belongs to `set`.
    #[must_use]
    pub fn conditions_in(&self, set: &ConditionTypeSet) -> Vec<Condition> {
        self.conditions()
            .into_iter()
            .filter(|c| set.contains(c.condition_type()))
            .collect()
    }

    /// Attached conditions that name `property` on this entity.
    #[must_use]
    pub fn property_conditions(&self, property: &Property) -> Vec<Condition> {
        self.entity
            .attached_targets()
            .into_iter()
            .filter(|t| t.properties.contains(property))
            .map(|t| t.condition)
            .collect()
    }

    /// The target attached for `condition_type`, if any.
    #[must_use]
    pub fn condition_target(&self, condition_type: &ConditionType) -> Option<ConditionTarget> {
        self.entity
            .0
            .meta
            .borrow()
            .conditions
            .get(condition_type.code())
            .cloned()
    }
}
