//! Property descriptors and value interception.
//!
//! Reads and writes go through the [`Property`], never straight to the
//! entity's storage:
//! - a read initializes the stored value to the default the first time,
//!   publishes an access event, then returns the (possibly recomputed) value
//! - a write type-checks, ignores no-op assignments and publishes a change on
//!   the property and then on the entity, inside a transaction scope
//! - a write to a property that was never initialized only initializes it

use crate::entity::Entity;
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::events::{ChangeKind, Channel, PropertyAccess, PropertyChange};
use crate::list::ObservableList;
use crate::rule::Rule;
use crate::value::{Value, ValueType};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// Optional property settings.
#[derive(Debug, Clone)]
pub struct PropertyOptions {
    /// Display label. Derived from the name when absent.
    pub label: Option<String>,
    pub helptext: Option<String>,
    /// Display format hint, passed through untouched.
    pub format: Option<String>,
    pub is_persisted: bool,
    pub is_calculated: bool,
    /// Default for new values. List defaults are copied into each entity's
    /// own list.
    pub default_value: Option<Value>,
}

impl Default for PropertyOptions {
    fn default() -> Self {
        Self {
            label: None,
            helptext: None,
            format: None,
            is_persisted: true,
            is_calculated: false,
            default_value: None,
        }
    }
}

impl PropertyOptions {
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn helptext(mut self, helptext: impl Into<String>) -> Self {
        self.helptext = Some(helptext.into());
        self
    }

    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    #[must_use]
    pub fn persisted(mut self, is_persisted: bool) -> Self {
        self.is_persisted = is_persisted;
        self
    }

    #[must_use]
    pub fn calculated(mut self) -> Self {
        self.is_calculated = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

struct PropertyInner {
    name: String,
    containing_type: Type,
    value_type: ValueType,
    is_list: bool,
    is_static: bool,
    label: String,
    helptext: Option<String>,
    format: Option<String>,
    is_persisted: bool,
    is_calculated: Cell<bool>,
    default_value: Option<Value>,
    static_value: RefCell<Option<Value>>,
    changed: Channel<PropertyChange>,
    accessed: Channel<PropertyAccess>,
    rules: RefCell<Vec<Rule>>,
}

/// A typed, observable field of a [`Type`].
#[derive(Clone)]
pub struct Property(Rc<PropertyInner>);

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Property {}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Property({})", self.qualified_name())
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl Property {
    pub(crate) fn new(
        containing_type: &Type,
        name: &str,
        value_type: ValueType,
        is_list: bool,
        is_static: bool,
        options: PropertyOptions,
    ) -> Result<Self> {
        if let Some(default) = &options.default_value {
            let accepted = if is_list {
                default
                    .items()
                    .iter()
                    .all(|item| value_type.accepts(item))
            } else {
                !matches!(default, Value::List(_)) && value_type.accepts(default)
            };
            if !accepted {
                return Err(ModelError::TypeMismatch {
                    property: format!("{}.{}", containing_type.name(), name),
                    expected: value_type.to_string(),
                    actual: default.kind_name().into(),
                });
            }
        }

        Ok(Self(Rc::new(PropertyInner {
            name: name.to_string(),
            containing_type: containing_type.clone(),
            value_type,
            is_list,
            is_static,
            label: options.label.unwrap_or_else(|| derive_label(name)),
            helptext: options.helptext,
            format: options.format,
            is_persisted: options.is_persisted,
            is_calculated: Cell::new(options.is_calculated),
            default_value: options.default_value,
            static_value: RefCell::new(None),
            changed: Channel::new(),
            accessed: Channel::new(),
            rules: RefCell::new(Vec::new()),
        })))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// `"<Type>.<name>"`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.0.containing_type.name(), self.0.name)
    }

    #[must_use]
    pub fn containing_type(&self) -> &Type {
        &self.0.containing_type
    }

    /// Declared type of the value, or of the items for list properties.
    #[must_use]
    pub fn value_type(&self) -> &ValueType {
        &self.0.value_type
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.0.is_list
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.0.is_static
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.0.label
    }

    #[must_use]
    pub fn helptext(&self) -> Option<&str> {
        self.0.helptext.as_deref()
    }

    #[must_use]
    pub fn format(&self) -> Option<&str> {
        self.0.format.as_deref()
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.0.is_persisted
    }

    /// True if declared calculated or returned by a registered rule.
    #[must_use]
    pub fn is_calculated(&self) -> bool {
        self.0.is_calculated.get()
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.0.default_value.as_ref()
    }

    /// Rules that depend on or compute this property.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule> {
        self.0.rules.borrow().clone()
    }

    #[must_use]
    pub fn changed(&self) -> &Channel<PropertyChange> {
        &self.0.changed
    }

    #[must_use]
    pub fn accessed(&self) -> &Channel<PropertyAccess> {
        &self.0.accessed
    }

    pub(crate) fn mark_calculated(&self) {
        self.0.is_calculated.set(true);
    }

    pub(crate) fn add_rule(&self, rule: &Rule) {
        let mut rules = self.0.rules.borrow_mut();
        if !rules.contains(rule) {
            rules.push(rule.clone());
        }
    }

    // ── Instance values ──────────────────────────────────────────

    /// True once the entity's value has been initialized.
    #[must_use]
    pub fn is_inited(&self, entity: &Entity) -> bool {
        entity.has_value(&self.0.name)
    }

    /// Reads the value, initializing it and publishing an access event.
    pub fn value(&self, entity: &Entity) -> Result<Value> {
        self.check_instance(entity)?;
        self.ensure_inited(entity)?;

        let access = PropertyAccess {
            entity: Some(entity.clone()),
            property: self.clone(),
            value: entity.peek(&self.0.name).unwrap_or_default(),
        };
        self.0.accessed.publish(&access)?;
        entity.accessed().publish(&access)?;

        Ok(entity.peek(&self.0.name).unwrap_or_default())
    }

    /// Writes the value.
    ///
    /// Fails with `ListReassignment` for list properties and `TypeMismatch`
    /// for values the declared type rejects. Writing a value equal to the
    /// current one does nothing.
    pub fn set_value(&self, entity: &Entity, value: impl Into<Value>) -> Result<()> {
        self.check_instance(entity)?;
        let value = value.into();
        self.check_assignable(&value)?;

        match entity.peek(&self.0.name) {
            None => {
                entity.write_raw(&self.0.name, value);
                Ok(())
            }
            Some(old) if old.same_as(&value) => Ok(()),
            Some(old) => {
                entity.write_raw(&self.0.name, value.clone());
                self.publish_change(Some(entity), old, value, ChangeKind::Set)
            }
        }
    }

    /// Sets the value without publishing anything. List properties take the
    /// items of a list (or nothing for null).
    pub fn init_value(&self, entity: &Entity, value: impl Into<Value>) -> Result<()> {
        self.check_instance(entity)?;
        let value = value.into();
        if self.0.is_list {
            let items = value.items();
            let list = self.new_list(Some(entity), items)?;
            if let Some(Value::List(previous)) = entity.write_raw(&self.0.name, Value::List(list)) {
                previous.teardown();
            }
            return Ok(());
        }
        self.check_assignable(&value)?;
        entity.write_raw(&self.0.name, value);
        Ok(())
    }

    /// Edits a list property's list in place until it holds `values`.
    pub fn update_list(&self, entity: &Entity, values: Vec<Value>) -> Result<()> {
        self.check_instance(entity)?;
        if !self.0.is_list {
            return Err(ModelError::TypeMismatch {
                property: self.qualified_name(),
                expected: self.0.value_type.to_string(),
                actual: "list".into(),
            });
        }
        self.ensure_inited(entity)?;
        match entity.peek(&self.0.name) {
            Some(Value::List(list)) => list.reconcile(&values),
            _ => Err(ModelError::ListReassignment(self.qualified_name())),
        }
    }

    pub(crate) fn ensure_inited(&self, entity: &Entity) -> Result<()> {
        if !entity.has_value(&self.0.name) {
            let value = self.default_for(Some(entity))?;
            entity.write_raw(&self.0.name, value);
        }
        Ok(())
    }

    pub(crate) fn publish_change(
        &self,
        entity: Option<&Entity>,
        old: Value,
        new: Value,
        kind: ChangeKind,
    ) -> Result<()> {
        let change = PropertyChange {
            entity: entity.cloned(),
            property: self.clone(),
            old,
            new,
            kind,
        };
        trace!(
            property = %self.qualified_name(),
            entity = ?entity.map(Entity::identity),
            kind = ?change.kind,
            "property changed"
        );
        self.0.containing_type.context().scopes.perform(|| {
            self.0.changed.publish(&change)?;
            match entity {
                Some(entity) => entity.changed().publish(&change),
                None => Ok(()),
            }
        })
    }

    fn check_instance(&self, entity: &Entity) -> Result<()> {
        if self.0.is_static {
            return Err(ModelError::StaticProperty(self.qualified_name()));
        }
        if entity.is_destroyed() {
            return Err(ModelError::EntityDestroyed(entity.identity()));
        }
        if !entity.is_instance_of(&self.0.containing_type) {
            return Err(ModelError::UnknownProperty {
                path: format!("{}.{}", entity.entity_type().name(), self.0.name),
                property: self.0.name.clone(),
            });
        }
        Ok(())
    }

    fn check_assignable(&self, value: &Value) -> Result<()> {
        if self.0.is_list {
            return Err(ModelError::ListReassignment(self.qualified_name()));
        }
        if matches!(value, Value::List(_)) || !self.0.value_type.accepts(value) {
            return Err(ModelError::TypeMismatch {
                property: self.qualified_name(),
                expected: self.0.value_type.to_string(),
                actual: value.kind_name().into(),
            });
        }
        Ok(())
    }

    fn default_for(&self, owner: Option<&Entity>) -> Result<Value> {
        if self.0.is_list {
            let items = self
                .0
                .default_value
                .as_ref()
                .map(Value::items)
                .unwrap_or_default();
            return Ok(Value::List(self.new_list(owner, items)?));
        }
        Ok(match &self.0.default_value {
            Some(value) => value.clone(),
            None => self.0.value_type.default_value(),
        })
    }

    /// A list bound to this property: its changes are republished as
    /// property changes of `owner`.
    fn new_list(&self, owner: Option<&Entity>, items: Vec<Value>) -> Result<ObservableList> {
        let item_type = match &self.0.value_type {
            ValueType::Any => None,
            other => Some(other.clone()),
        };
        let list = ObservableList::from_values(item_type, items)?;

        let property: Weak<PropertyInner> = Rc::downgrade(&self.0);
        let owner = owner.map(Entity::downgrade);
        list.changed().subscribe(move |event| {
            let Some(inner) = property.upgrade() else {
                return Ok(());
            };
            let entity = match &owner {
                Some(weak) => match weak.upgrade() {
                    Some(entity) => Some(entity),
                    None => return Ok(()),
                },
                None => None,
            };
            let value = Value::List(event.list.clone());
            Property(inner).publish_change(
                entity.as_ref(),
                value.clone(),
                value,
                ChangeKind::List(event.changes.clone()),
            )
        });
        Ok(list)
    }

    // ── Static values ────────────────────────────────────────────

    /// Reads a static property.
    pub fn static_value(&self) -> Result<Value> {
        if !self.0.is_static {
            return Err(ModelError::StaticProperty(self.qualified_name()));
        }
        let current = self.static_slot()?;
        let access = PropertyAccess {
            entity: None,
            property: self.clone(),
            value: current,
        };
        self.0.accessed.publish(&access)?;
        self.static_slot()
    }

    /// Writes a static property, with the same checks and events as
    /// [`set_value`](Self::set_value) minus the entity.
    pub fn set_static_value(&self, value: impl Into<Value>) -> Result<()> {
        if !self.0.is_static {
            return Err(ModelError::StaticProperty(self.qualified_name()));
        }
        let value = value.into();
        self.check_assignable(&value)?;

        let previous = self.0.static_value.borrow().clone();
        match previous {
            None => {
                *self.0.static_value.borrow_mut() = Some(value);
                Ok(())
            }
            Some(old) if old.same_as(&value) => Ok(()),
            Some(old) => {
                *self.0.static_value.borrow_mut() = Some(value.clone());
                self.publish_change(None, old, value, ChangeKind::Set)
            }
        }
    }

    fn static_slot(&self) -> Result<Value> {
        let current = self.0.static_value.borrow().clone();
        match current {
            Some(value) => Ok(value),
            None => {
                let value = self.default_for(None)?;
                *self.0.static_value.borrow_mut() = Some(value.clone());
                Ok(value)
            }
        }
    }

    pub(crate) fn teardown(&self) {
        self.0.changed.clear();
        self.0.accessed.clear();
        self.0.rules.borrow_mut().clear();
        let value = self.0.static_value.borrow_mut().take();
        if let Some(Value::List(list)) = value {
            list.teardown();
        }
    }
}

/// `firstName` → `First Name`, `order_total` → `Order Total`.
pub(crate) fn derive_label(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut label = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' {
            if !label.ends_with(' ') && !label.is_empty() {
                label.push(' ');
            }
            continue;
        }
        if i > 0 && c.is_uppercase() && !label.ends_with(' ') {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                label.push(' ');
            }
        }
        if label.is_empty() || label.ends_with(' ') {
            label.extend(c.to_uppercase());
        } else {
            label.push(c);
        }
    }
    label
}
