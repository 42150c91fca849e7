//! Type descriptors and instance pools.

use crate::entity::Entity;
use crate::error::{ModelError, Result};
use crate::events::{Channel, ConditionsChanged};
use crate::model::ModelContext;
use crate::path::{self, PropertyPath};
use crate::property::{Property, PropertyOptions};
use crate::rule::{IntoRule, Rule};
use crate::value::ValueType;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Where a type definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Origin {
    /// Declared by the hosting application.
    #[default]
    Client,
    /// Declared by a remote schema.
    Server,
}

/// Lifecycle events of a type's instances. Events for an entity are
/// published on its own type and then on every ancestor.
#[derive(Default)]
pub struct TypeEvents {
    pub init_new: Channel<Entity>,
    pub init_existing: Channel<Entity>,
    pub destroy: Channel<Entity>,
    pub conditions_changed: Channel<ConditionsChanged>,
}

impl TypeEvents {
    fn clear(&self) {
        self.init_new.clear();
        self.init_existing.clear();
        self.destroy.clear();
        self.conditions_changed.clear();
    }
}

pub(crate) struct TypeInner {
    name: String,
    base: Option<Type>,
    origin: Origin,
    context: Rc<ModelContext>,
    derived: RefCell<Vec<Weak<TypeInner>>>,
    properties: RefCell<Vec<Property>>,
    /// Lower-cased id to entity. Holds instances of derived types too.
    pool: RefCell<HashMap<String, Entity>>,
    legacy_pool: RefCell<HashMap<String, Entity>>,
    rules: RefCell<Vec<Rule>>,
    events: TypeEvents,
}

/// Class-level metadata for entities.
#[derive(Clone)]
pub struct Type(Rc<TypeInner>);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.0.name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl Type {
    pub(crate) fn new(
        context: Rc<ModelContext>,
        name: &str,
        base: Option<Type>,
        origin: Origin,
    ) -> Self {
        Self(Rc::new(TypeInner {
            name: name.to_string(),
            base,
            origin,
            context,
            derived: RefCell::new(Vec::new()),
            properties: RefCell::new(Vec::new()),
            pool: RefCell::new(HashMap::new()),
            legacy_pool: RefCell::new(HashMap::new()),
            rules: RefCell::new(Vec::new()),
            events: TypeEvents::default(),
        }))
    }

    pub(crate) fn context(&self) -> &Rc<ModelContext> {
        &self.0.context
    }

    pub(crate) fn add_derived(&self, derived: &Type) {
        self.0.derived.borrow_mut().push(Rc::downgrade(&derived.0));
    }

    /// Full type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn base_type(&self) -> Option<&Type> {
        self.0.base.as_ref()
    }

    /// Directly derived types.
    #[must_use]
    pub fn derived_types(&self) -> Vec<Type> {
        self.0
            .derived
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(Type)
            .collect()
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.0.origin
    }

    #[must_use]
    pub fn events(&self) -> &TypeEvents {
        &self.0.events
    }

    /// This type followed by its base chain.
    #[must_use]
    pub fn lineage(&self) -> Vec<Type> {
        let mut chain = vec![self.clone()];
        let mut next = self.0.base.clone();
        while let Some(ty) = next {
            next = ty.0.base.clone();
            chain.push(ty);
        }
        chain
    }

    /// True if `self` is `other` or derives from it.
    #[must_use]
    pub fn is_subtype_of(&self, other: &Type) -> bool {
        self.lineage().iter().any(|t| t == other)
    }

    /// Name-based variant of [`is_subtype_of`](Self::is_subtype_of).
    #[must_use]
    pub fn is_subtype_of_name(&self, name: &str) -> bool {
        self.lineage().iter().any(|t| t.name() == name)
    }

    // ── Properties ───────────────────────────────────────────────

    /// Declares a property. Names must be unique across the type's base
    /// chain and its derived types.
    pub fn add_property(
        &self,
        name: &str,
        value_type: ValueType,
        is_list: bool,
        is_static: bool,
        options: PropertyOptions,
    ) -> Result<Property> {
        if name.is_empty() || name.contains(['.', '<', '>', '{', '}', ',', '|']) {
            return Err(ModelError::InvalidPath {
                path: name.to_string(),
                reason: "not a valid property name".into(),
            });
        }
        if self.property(name).is_some() || self.derived_declares(name) {
            return Err(ModelError::DuplicateProperty {
                type_name: self.0.name.clone(),
                property: name.to_string(),
            });
        }

        let property = Property::new(self, name, value_type, is_list, is_static, options)?;
        self.0.properties.borrow_mut().push(property.clone());
        debug!(
            type_name = %self.0.name,
            property = %name,
            value_type = %property.value_type(),
            is_list,
            is_static,
            "property added"
        );
        self.0.context.events.property_added.publish(&property)?;
        Ok(property)
    }

    fn derived_declares(&self, name: &str) -> bool {
        self.derived_types().iter().any(|d| {
            d.0.properties.borrow().iter().any(|p| p.name() == name) || d.derived_declares(name)
        })
    }

    /// Looks a property up on this type, then along the base chain.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Property> {
        self.lineage().into_iter().find_map(|ty| {
            ty.0.properties
                .borrow()
                .iter()
                .find(|p| p.name() == name)
                .cloned()
        })
    }

    /// Properties declared on this type only.
    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        self.0.properties.borrow().clone()
    }

    /// Inherited properties first, then this type's own.
    #[must_use]
    pub fn all_properties(&self) -> Vec<Property> {
        let mut lineage = self.lineage();
        lineage.reverse();
        lineage.iter().flat_map(Type::properties).collect()
    }

    /// Resolves a path rooted at this type.
    pub fn property_path(&self, path: &str) -> Result<PropertyPath> {
        path::resolve(self, path)
    }

    // ── Rules ────────────────────────────────────────────────────

    /// Builds and registers a rule on this type. While the model is loading
    /// the registration is queued.
    pub fn add_rule(&self, rule: impl IntoRule) -> Result<Rule> {
        let rule = rule.into_rule(self)?;
        rule.register()?;
        Ok(rule)
    }

    /// Registered rules rooted at this type.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule> {
        self.0.rules.borrow().clone()
    }

    pub(crate) fn push_rule(&self, rule: Rule) {
        self.0.rules.borrow_mut().push(rule);
    }

    // ── Instances ────────────────────────────────────────────────

    /// Creates a new entity with a generated id. Instance properties are
    /// initialized to their defaults, then init-new fires on this type and
    /// each ancestor inside one scope.
    pub fn create_entity(&self) -> Result<Entity> {
        let ctx = &self.0.context;
        let id = ctx.new_entity_id();
        let entity = Entity::new(self, id, true, ctx.next_serial());
        self.register(&entity)?;

        for property in self.all_properties() {
            if !property.is_static() && !property.is_calculated() {
                property.ensure_inited(&entity)?;
            }
        }

        let lineage = self.lineage();
        ctx.scopes.perform(|| {
            for ty in &lineage {
                ty.0.events.init_new.publish(&entity)?;
            }
            Ok(())
        })?;
        Ok(entity)
    }

    /// Materializes an entity that already exists elsewhere. Properties
    /// initialize lazily on first read or through
    /// [`Property::init_value`].
    pub fn create_existing(&self, id: &str) -> Result<Entity> {
        if id.is_empty() || id.contains('|') {
            return Err(ModelError::InvalidIdentity(id.to_string()));
        }
        let ctx = &self.0.context;
        let entity = Entity::new(self, id.to_string(), false, ctx.next_serial());
        self.register(&entity)?;

        let lineage = self.lineage();
        ctx.scopes.perform(|| {
            for ty in &lineage {
                ty.0.events.init_existing.publish(&entity)?;
            }
            Ok(())
        })?;
        Ok(entity)
    }

    /// Returns the pooled entity with this id, creating an existing one if
    /// there is none.
    pub fn get_or_create(&self, id: &str) -> Result<Entity> {
        match self.get(id, false) {
            Some(entity) => Ok(entity),
            None => self.create_existing(id),
        }
    }

    /// Case-insensitive pool lookup, falling back to ids entities had before
    /// [`change_id`](crate::ObjectMeta::change_id). Instances of derived
    /// types are found unless `exact_type_only`.
    #[must_use]
    pub fn get(&self, id: &str, exact_type_only: bool) -> Option<Entity> {
        let key = id.to_lowercase();
        let found = self
            .0
            .pool
            .borrow()
            .get(&key)
            .cloned()
            .or_else(|| self.0.legacy_pool.borrow().get(&key).cloned());
        found.filter(|e| !exact_type_only || e.entity_type() == self)
    }

    /// Every pooled instance of this type and its derived types, in
    /// creation order.
    #[must_use]
    pub fn known(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.0.pool.borrow().values().cloned().collect();
        entities.sort_by_key(Entity::serial);
        entities
    }

    fn register(&self, entity: &Entity) -> Result<()> {
        let key = entity.id().to_lowercase();
        let lineage = self.lineage();
        if let Some(owner) = lineage.iter().find(|t| t.0.pool.borrow().contains_key(&key)) {
            return Err(ModelError::DuplicateId {
                type_name: owner.0.name.clone(),
                id: entity.id(),
            });
        }
        for ty in &lineage {
            ty.0.pool.borrow_mut().insert(key.clone(), entity.clone());
        }
        trace!(type_name = %self.0.name, id = %entity.id(), "entity registered");
        self.0.context.events.entity_registered.publish(entity)
    }

    pub(crate) fn rekey(&self, entity: &Entity, old_id: &str, new_id: &str) -> Result<()> {
        let old_key = old_id.to_lowercase();
        let new_key = new_id.to_lowercase();
        let lineage = self.lineage();
        if old_key != new_key {
            let taken = lineage.iter().find(|t| {
                t.0.pool
                    .borrow()
                    .get(&new_key)
                    .is_some_and(|other| other != entity)
            });
            if let Some(owner) = taken {
                return Err(ModelError::DuplicateId {
                    type_name: owner.0.name.clone(),
                    id: new_id.to_string(),
                });
            }
        }
        for ty in &lineage {
            let mut pool = ty.0.pool.borrow_mut();
            pool.remove(&old_key);
            pool.insert(new_key.clone(), entity.clone());
            ty.0.legacy_pool
                .borrow_mut()
                .insert(old_key.clone(), entity.clone());
        }
        trace!(type_name = %self.0.name, old_id, new_id, "entity id changed");
        Ok(())
    }

    pub(crate) fn unregister(&self, entity: &Entity) {
        let key = entity.id().to_lowercase();
        let legacy = entity.meta().legacy_id().map(|id| id.to_lowercase());
        for ty in self.lineage() {
            ty.0.pool.borrow_mut().remove(&key);
            if let Some(legacy) = &legacy {
                ty.0.legacy_pool.borrow_mut().remove(legacy);
            }
        }
        trace!(type_name = %self.0.name, id = %entity.id(), "entity unregistered");
    }

    pub(crate) fn teardown(&self) {
        let pooled: Vec<Entity> = self.0.pool.borrow_mut().drain().map(|(_, e)| e).collect();
        for entity in &pooled {
            entity.teardown();
        }
        self.0.legacy_pool.borrow_mut().clear();
        let properties = std::mem::take(&mut *self.0.properties.borrow_mut());
        for property in &properties {
            property.teardown();
        }
        let rules = std::mem::take(&mut *self.0.rules.borrow_mut());
        for rule in &rules {
            rule.teardown();
        }
        self.0.derived.borrow_mut().clear();
        self.0.events.clear();
    }
}
