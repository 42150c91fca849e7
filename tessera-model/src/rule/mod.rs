//! Rules: computations triggered by entity lifecycle and property events.
//!
//! A rule is configured while unregistered and frozen by
//! [`Rule::register`]. Registration resolves predicate paths and wires the
//! rule to the events its [`RuleInvocation`] flags name:
//! - `INIT_NEW` / `INIT_EXISTING`: the root type's init events
//! - `PROPERTY_CHANGED`: every predicate path
//! - `PROPERTY_GET`: reads of the returned (calculated) properties, plus
//!   invalidation when a predicate changes
//!
//! Triggered rules do not run inline. They are marked pending on the entity
//! and run when the enclosing scope exits, once per scope however often they
//! were triggered.

mod allowed_values;
mod calculated;
mod condition;
mod list_length;
mod range;
mod required;
mod string_format;
mod string_length;
mod validated;

pub use allowed_values::{AllowedValuesRule, AllowedValuesSource};
pub use calculated::CalculatedPropertyRule;
pub use condition::ConditionRule;
pub use list_length::ListLengthRule;
pub use range::RangeRule;
pub use required::RequiredRule;
pub use string_format::StringFormatRule;
pub use string_length::StringLengthRule;
pub use validated::ValidatedPropertyRule;

use crate::entity::Entity;
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::events::ChangeKind;
use crate::path::{self, PropertyPath};
use crate::property::Property;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Identifies a rule within its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub(crate) u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// Events that trigger a rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuleInvocation(pub u8);

impl RuleInvocation {
    pub const NONE: RuleInvocation = RuleInvocation(0);

    pub const INIT_NEW: u8 = 0b0001;
    pub const INIT_EXISTING: u8 = 0b0010;
    pub const PROPERTY_CHANGED: u8 = 0b0100;
    pub const PROPERTY_GET: u8 = 0b1000;

    #[inline]
    pub fn new(bits: u8) -> Self {
        RuleInvocation(bits)
    }

    #[inline]
    pub fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn on_init_new(self) -> bool {
        self.contains(Self::INIT_NEW)
    }

    #[inline]
    pub fn on_init_existing(self) -> bool {
        self.contains(Self::INIT_EXISTING)
    }

    #[inline]
    pub fn on_property_changed(self) -> bool {
        self.contains(Self::PROPERTY_CHANGED)
    }

    #[inline]
    pub fn on_property_get(self) -> bool {
        self.contains(Self::PROPERTY_GET)
    }
}

impl BitOr<u8> for RuleInvocation {
    type Output = RuleInvocation;

    fn bitor(self, bits: u8) -> RuleInvocation {
        RuleInvocation(self.0 | bits)
    }
}

impl BitOrAssign<u8> for RuleInvocation {
    fn bitor_assign(&mut self, bits: u8) {
        self.0 |= bits;
    }
}

/// Rule body.
pub type RuleFn = Rc<dyn Fn(&Entity) -> Result<()>>;

/// Rule configuration with fluent setters.
///
/// ```ignore
/// order.add_rule(
///     RuleOptions::new()
///         .name("Order.total")
///         .on_change_of(["lines.amount"])
///         .returns(["total"])
///         .execute(|order| { /* ... */ Ok(()) }),
/// )?;
/// ```
#[derive(Clone, Default)]
pub struct RuleOptions {
    name: Option<String>,
    execute: Option<RuleFn>,
    invocation: RuleInvocation,
    on_change_of: Vec<String>,
    returns: Vec<String>,
    validation: bool,
}

impl fmt::Debug for RuleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleOptions")
            .field("name", &self.name)
            .field("invocation", &self.invocation)
            .field("on_change_of", &self.on_change_of)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

impl RuleOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn execute(mut self, execute: impl Fn(&Entity) -> Result<()> + 'static) -> Self {
        self.execute = Some(Rc::new(execute));
        self
    }

    /// Runs for new and existing entities.
    #[must_use]
    pub fn on_init(mut self) -> Self {
        self.invocation |= RuleInvocation::INIT_NEW | RuleInvocation::INIT_EXISTING;
        self
    }

    #[must_use]
    pub fn on_init_new(mut self) -> Self {
        self.invocation |= RuleInvocation::INIT_NEW;
        self
    }

    #[must_use]
    pub fn on_init_existing(mut self) -> Self {
        self.invocation |= RuleInvocation::INIT_EXISTING;
        self
    }

    /// Predicate paths; braces expand.
    #[must_use]
    pub fn on_change_of<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_change_of.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Properties of the root type this rule computes.
    #[must_use]
    pub fn returns<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returns.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Validation rules honour `validate_on_init_existing`.
    #[must_use]
    pub(crate) fn validation(mut self) -> Self {
        self.validation = true;
        self
    }
}

/// Anything [`Type::add_rule`] can turn into a rule.
pub trait IntoRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule>;
}

impl IntoRule for RuleOptions {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        Rule::new(root_type, self)
    }
}

impl IntoRule for Rule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        if self.root_type() != root_type {
            return Err(ModelError::InvalidRule {
                rule: self.name().to_string(),
                reason: format!("rule belongs to type '{}'", self.root_type().name()),
            });
        }
        Ok(self)
    }
}

/// A bare function runs when entities initialize.
impl<F> IntoRule for F
where
    F: Fn(&Entity) -> Result<()> + 'static,
{
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        Rule::new(root_type, RuleOptions::new().on_init().execute(self))
    }
}

#[derive(Debug, Clone)]
enum Predicate {
    Path(String),
    Resolved(PropertyPath),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleState {
    Configuring,
    Queued,
    Registered,
}

struct RuleInner {
    id: RuleId,
    name: String,
    root_type: Type,
    invocation: Cell<RuleInvocation>,
    predicates: RefCell<Vec<Predicate>>,
    returns: RefCell<Vec<String>>,
    resolved_predicates: RefCell<Vec<PropertyPath>>,
    resolved_returns: RefCell<Vec<Property>>,
    state: Cell<RuleState>,
    validation: bool,
    execute: RuleFn,
}

/// A named computation bound to a root type.
#[derive(Clone)]
pub struct Rule(Rc<RuleInner>);

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("root_type", &self.0.root_type.name())
            .field("invocation", &self.0.invocation.get())
            .field("state", &self.0.state.get())
            .finish()
    }
}

impl Rule {
    /// Builds an unregistered rule.
    pub fn new(root_type: &Type, options: RuleOptions) -> Result<Self> {
        let id = root_type.context().next_rule_id();
        let name = options
            .name
            .unwrap_or_else(|| format!("{}.rule{}", root_type.name(), id.0));
        let Some(execute) = options.execute else {
            return Err(ModelError::InvalidRule {
                rule: name,
                reason: "no execute function".into(),
            });
        };

        let mut invocation = options.invocation;
        if !options.returns.is_empty() {
            invocation |= RuleInvocation::PROPERTY_GET;
        } else if !options.on_change_of.is_empty() {
            invocation |= RuleInvocation::PROPERTY_CHANGED;
        }

        Ok(Self(Rc::new(RuleInner {
            id,
            name,
            root_type: root_type.clone(),
            invocation: Cell::new(invocation),
            predicates: RefCell::new(
                options.on_change_of.into_iter().map(Predicate::Path).collect(),
            ),
            returns: RefCell::new(options.returns),
            resolved_predicates: RefCell::new(Vec::new()),
            resolved_returns: RefCell::new(Vec::new()),
            state: Cell::new(RuleState::Configuring),
            validation: options.validation,
            execute,
        })))
    }

    #[must_use]
    pub fn id(&self) -> RuleId {
        self.0.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn root_type(&self) -> &Type {
        &self.0.root_type
    }

    #[must_use]
    pub fn invocation(&self) -> RuleInvocation {
        self.0.invocation.get()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.0.state.get() == RuleState::Registered
    }

    /// Resolved predicates. Empty until registered.
    #[must_use]
    pub fn predicates(&self) -> Vec<PropertyPath> {
        self.0.resolved_predicates.borrow().clone()
    }

    /// Properties this rule computes. Empty until registered.
    #[must_use]
    pub fn returns(&self) -> Vec<Property> {
        self.0.resolved_returns.borrow().clone()
    }

    fn ensure_configuring(&self) -> Result<()> {
        match self.0.state.get() {
            RuleState::Configuring => Ok(()),
            RuleState::Queued | RuleState::Registered => {
                Err(ModelError::RuleRegistered(self.0.name.clone()))
            }
        }
    }

    /// Adds a predicate path.
    pub fn on_change_of(&self, path: impl Into<String>) -> Result<()> {
        self.ensure_configuring()?;
        self.0.predicates.borrow_mut().push(Predicate::Path(path.into()));
        if !self.invocation().on_property_get() {
            self.add_flags(RuleInvocation::PROPERTY_CHANGED);
        }
        Ok(())
    }

    /// Adds an already resolved predicate.
    pub fn depends_on(&self, path: PropertyPath) -> Result<()> {
        self.ensure_configuring()?;
        self.0.predicates.borrow_mut().push(Predicate::Resolved(path));
        if !self.invocation().on_property_get() {
            self.add_flags(RuleInvocation::PROPERTY_CHANGED);
        }
        Ok(())
    }

    /// Adds a computed property of the root type.
    pub fn add_return(&self, property: impl Into<String>) -> Result<()> {
        self.ensure_configuring()?;
        self.0.returns.borrow_mut().push(property.into());
        let bits = self.invocation().0 & !RuleInvocation::PROPERTY_CHANGED;
        self.0
            .invocation
            .set(RuleInvocation(bits | RuleInvocation::PROPERTY_GET));
        Ok(())
    }

    /// Adds trigger flags.
    pub fn add_invocation(&self, bits: u8) -> Result<()> {
        self.ensure_configuring()?;
        self.add_flags(bits);
        Ok(())
    }

    fn add_flags(&self, bits: u8) {
        self.0.invocation.set(self.invocation() | bits);
    }

    // ── Registration ─────────────────────────────────────────────

    /// Freezes the rule and wires it to its triggers. While the model is
    /// loading, registration is queued until loading finishes; failures then
    /// surface from [`LoadToken::finish`](crate::LoadToken::finish).
    pub fn register(&self) -> Result<()> {
        self.ensure_configuring()?;
        let ctx = self.0.root_type.context();
        if ctx.loading.is_active() {
            self.0.state.set(RuleState::Queued);
            let rule = self.clone();
            let context = Rc::downgrade(ctx);
            ctx.loading.wait_for_all(move || {
                if let Err(error) = rule.wire() {
                    if let Some(ctx) = Weak::upgrade(&context) {
                        ctx.deferred_errors.borrow_mut().push(error);
                    }
                }
            });
            debug!(rule = %self.0.name, "rule registration queued until loading finishes");
            return Ok(());
        }
        self.wire()
    }

    fn wire(&self) -> Result<()> {
        let root = &self.0.root_type;

        let mut predicates = Vec::new();
        for predicate in self.0.predicates.borrow().iter() {
            match predicate {
                Predicate::Path(p) => predicates.extend(path::resolve_all(root, p)?),
                Predicate::Resolved(p) => predicates.push(p.clone()),
            }
        }

        let mut returns = Vec::new();
        for name in self.0.returns.borrow().iter() {
            for resolved in path::resolve_all(root, name)? {
                match resolved {
                    PropertyPath::Property(p) if !p.is_static() => returns.push(p),
                    other => {
                        return Err(ModelError::InvalidRule {
                            rule: self.0.name.clone(),
                            reason: format!("'{other}' is not an instance property of the root type"),
                        });
                    }
                }
            }
        }

        let invocation = self.invocation();
        if invocation.is_empty() {
            return Err(ModelError::InvalidRule {
                rule: self.0.name.clone(),
                reason: "nothing triggers the rule".into(),
            });
        }
        if invocation.on_property_get() && returns.is_empty() {
            return Err(ModelError::InvalidRule {
                rule: self.0.name.clone(),
                reason: "property-get rules must return a property".into(),
            });
        }

        for property in &returns {
            property.mark_calculated();
            property.add_rule(self);
        }
        for predicate in &predicates {
            for property in predicate.properties() {
                property.add_rule(self);
            }
        }
        *self.0.resolved_predicates.borrow_mut() = predicates.clone();
        *self.0.resolved_returns.borrow_mut() = returns.clone();
        self.0.state.set(RuleState::Registered);
        root.push_rule(self.clone());

        let events = root.events();
        if invocation.on_init_new() {
            let rule = self.clone();
            events.init_new.subscribe(move |entity| rule.schedule(entity));
        }
        let validate_existing = !self.0.validation || root.context().config.validate_on_init_existing;
        if invocation.on_init_existing() && validate_existing {
            let rule = self.clone();
            events.init_existing.subscribe(move |entity| rule.schedule(entity));
        }

        if invocation.on_property_get() {
            for property in &returns {
                let rule = self.clone();
                property.accessed().subscribe(move |access| match &access.entity {
                    Some(entity) => rule.on_access(entity),
                    None => Ok(()),
                });
            }
            for predicate in &predicates {
                let rule = self.clone();
                predicate.subscribe_changes(move |entity| rule.invalidate(entity));
            }
        } else if invocation.on_property_changed() {
            for predicate in &predicates {
                let rule = self.clone();
                predicate.subscribe_changes(move |entity| rule.schedule(entity));
            }
        }

        debug!(
            rule = %self.0.name,
            type_name = %root.name(),
            invocation = invocation.0,
            predicates = predicates.len(),
            returns = returns.len(),
            "rule registered"
        );
        Ok(())
    }

    /// Drops resolved paths so chain subscriptions stop holding the rule.
    pub(crate) fn teardown(&self) {
        let predicates = std::mem::take(&mut *self.0.resolved_predicates.borrow_mut());
        for predicate in &predicates {
            if let PropertyPath::Chain(chain) = predicate {
                chain.teardown();
            }
        }
        self.0.resolved_returns.borrow_mut().clear();
    }

    // ── Execution ────────────────────────────────────────────────

    /// Runs the rule for `entity` now. Calculated properties it returns
    /// count as current afterwards.
    pub fn execute(&self, entity: &Entity) -> Result<()> {
        if entity.is_destroyed() {
            return Ok(());
        }
        let returns = self.returns();
        for property in &returns {
            entity.mark_fresh(property);
        }
        trace!(rule = %self.0.name, entity = %entity.identity(), "executing rule");
        let result = (self.0.execute)(entity);
        if result.is_err() {
            for property in &returns {
                entity.mark_stale(property);
            }
        }
        result
    }

    /// Queues the rule for `entity` at the exit of the current scope, unless
    /// it is queued already.
    pub(crate) fn schedule(&self, entity: &Entity) -> Result<()> {
        if !entity.is_instance_of(&self.0.root_type) || entity.is_destroyed() {
            return Ok(());
        }
        if !entity.insert_pending(self.0.id) {
            return Ok(());
        }

        let scopes = &self.0.root_type.context().scopes;
        let id = self.0.id;
        let released = entity.clone();
        scopes.on_abort(move |_| released.remove_pending(id));

        let rule = self.clone();
        let entity = entity.clone();
        scopes.on_exit(move || {
            entity.remove_pending(rule.0.id);
            rule.execute(&entity)
        })
    }

    /// A returned property was read: recompute if it went stale.
    fn on_access(&self, entity: &Entity) -> Result<()> {
        if !entity.is_instance_of(&self.0.root_type) {
            return Ok(());
        }
        let stale = self
            .0
            .resolved_returns
            .borrow()
            .iter()
            .any(|p| !entity.is_fresh(p));
        if stale {
            self.execute(entity)?;
        }
        Ok(())
    }

    /// A predicate changed. Watched results are recomputed at scope exit;
    /// unwatched ones are marked stale and announce the invalidation.
    fn invalidate(&self, entity: &Entity) -> Result<()> {
        if !entity.is_instance_of(&self.0.root_type) || entity.is_destroyed() {
            return Ok(());
        }
        let returns = self.returns();
        if returns.iter().any(|p| entity.has_watchers(p)) {
            return self.schedule(entity);
        }

        for property in &returns {
            entity.mark_stale(property);
        }
        if !entity.insert_pending(self.0.id) {
            return Ok(());
        }

        let scopes = &self.0.root_type.context().scopes;
        let id = self.0.id;
        let released = entity.clone();
        scopes.on_abort(move |_| released.remove_pending(id));

        let entity = entity.clone();
        scopes.on_exit(move || {
            entity.remove_pending(id);
            for property in &returns {
                if property.is_inited(&entity) && !entity.is_fresh(property) {
                    let current = entity.peek(property.name()).unwrap_or_default();
                    property.publish_change(
                        Some(&entity),
                        current.clone(),
                        current,
                        ChangeKind::Invalidated,
                    )?;
                }
            }
            Ok(())
        })
    }
}

/// Property `name` of the entity's type.
pub(crate) fn property_of(entity: &Entity, name: &str) -> Result<Property> {
    entity
        .entity_type()
        .property(name)
        .ok_or_else(|| ModelError::UnknownProperty {
            path: format!("{}.{}", entity.entity_type().name(), name),
            property: name.to_string(),
        })
}

/// `"{label}"` in `template` replaced by the property label.
pub(crate) fn render_message(template: &str, property: &Property) -> String {
    template.replace("{label}", property.label())
}
