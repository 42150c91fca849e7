//! The model: type registry, shared context and lifecycle.

use crate::condition::ConditionRegistry;
use crate::config::ModelConfig;
use crate::entity::Entity;
use crate::entity_type::{Origin, Type};
use crate::error::{ModelError, Result};
use crate::events::Channel;
use crate::path::{self, PropertyPath};
use crate::property::Property;
use crate::rule::RuleId;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tessera_events::{HandlerId, NestingExceeded, PendingCallback, ScopeContext, Signal};
use tracing::{debug, warn};

/// Registry-level events.
#[derive(Default)]
pub struct ModelEvents {
    pub type_added: Channel<Type>,
    pub entity_registered: Channel<Entity>,
    pub entity_unregistered: Channel<Entity>,
    pub property_added: Channel<Property>,
}

impl ModelEvents {
    fn clear(&self) {
        self.type_added.clear();
        self.entity_registered.clear();
        self.entity_unregistered.clear();
        self.property_added.clear();
    }
}

/// State shared by every handle that belongs to one model.
pub(crate) struct ModelContext {
    pub(crate) config: ModelConfig,
    pub(crate) scopes: ScopeContext<ModelError>,
    pub(crate) conditions: ConditionRegistry,
    pub(crate) events: ModelEvents,
    pub(crate) loading: Signal,
    pub(crate) deferred_errors: RefCell<Vec<ModelError>>,
    types: RefCell<Vec<Type>>,
    next_id: Cell<u64>,
    next_serial: Cell<u64>,
    next_rule: Cell<u64>,
}

impl ModelContext {
    fn new(config: ModelConfig) -> Self {
        Self {
            scopes: ScopeContext::new(config.max_scope_nesting),
            config,
            conditions: ConditionRegistry::default(),
            events: ModelEvents::default(),
            loading: Signal::new("model loading"),
            deferred_errors: RefCell::new(Vec::new()),
            types: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            next_serial: Cell::new(1),
            next_rule: Cell::new(1),
        }
    }

    pub(crate) fn type_by_name(&self, name: &str) -> Option<Type> {
        self.types
            .borrow()
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    pub(crate) fn new_entity_id(&self) -> String {
        let n = self.next_id.get();
        self.next_id.set(n + 1);
        format!("{}{}", self.config.new_id_prefix, n)
    }

    pub(crate) fn next_serial(&self) -> u64 {
        let n = self.next_serial.get();
        self.next_serial.set(n + 1);
        n
    }

    pub(crate) fn next_rule_id(&self) -> RuleId {
        let n = self.next_rule.get();
        self.next_rule.set(n + 1);
        RuleId(n)
    }

    /// Releases every handle the registry owns so reference cycles between
    /// types, entities, rules and conditions fall apart.
    fn teardown(&self) {
        let types = std::mem::take(&mut *self.types.borrow_mut());
        for ty in &types {
            ty.teardown();
        }
        self.conditions.teardown();
        self.events.clear();
        debug!(types = types.len(), "model torn down");
    }
}

struct ModelInner {
    context: Rc<ModelContext>,
}

impl Drop for ModelInner {
    fn drop(&mut self) {
        self.context.teardown();
    }
}

/// Top-level registry of types.
///
/// Cloning shares the model. When the last clone drops, every type, entity,
/// rule and condition it created is torn down; handles held past that point
/// stay valid memory but are detached from each other.
#[derive(Clone)]
pub struct Model(Rc<ModelInner>);

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("types", &self.ctx().types.borrow().len())
            .field("loading", &self.is_loading())
            .finish()
    }
}

impl Model {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ModelConfig) -> Self {
        Self(Rc::new(ModelInner {
            context: Rc::new(ModelContext::new(config)),
        }))
    }

    fn ctx(&self) -> &Rc<ModelContext> {
        &self.0.context
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.ctx().config
    }

    /// Registers a type. Names are unique; `base` must belong to this model.
    pub fn add_type(&self, name: &str, base: Option<&Type>, origin: Origin) -> Result<Type> {
        let ctx = self.ctx();
        if name.is_empty() || name.contains(['|', '<', '>', '{', '}', ',']) {
            return Err(ModelError::InvalidPath {
                path: name.to_string(),
                reason: "not a valid type name".into(),
            });
        }
        if ctx.type_by_name(name).is_some() {
            return Err(ModelError::DuplicateType(name.to_string()));
        }
        if let Some(base) = base {
            if !Rc::ptr_eq(base.context(), ctx) {
                return Err(ModelError::UnknownType(base.name().to_string()));
            }
        }

        let ty = Type::new(Rc::clone(ctx), name, base.cloned(), origin);
        if let Some(base) = base {
            base.add_derived(&ty);
        }
        ctx.types.borrow_mut().push(ty.clone());
        debug!(type_name = %name, base = ?base.map(Type::name), "type added");
        ctx.events.type_added.publish(&ty)?;
        Ok(ty)
    }

    #[must_use]
    pub fn type_by_name(&self, name: &str) -> Option<Type> {
        self.ctx().type_by_name(name)
    }

    /// Like [`type_by_name`](Self::type_by_name), failing with `UnknownType`.
    pub fn require_type(&self, name: &str) -> Result<Type> {
        self.type_by_name(name)
            .ok_or_else(|| ModelError::UnknownType(name.to_string()))
    }

    /// Types in registration order.
    #[must_use]
    pub fn types(&self) -> Vec<Type> {
        self.ctx().types.borrow().clone()
    }

    /// Resolves a single path (no braces) rooted at `root`.
    pub fn property_path(&self, root: &Type, path: &str) -> Result<PropertyPath> {
        path::resolve(root, path)
    }

    /// Expands braces in `path`, then resolves each expansion.
    pub fn property_paths(&self, root: &Type, path: &str) -> Result<Vec<PropertyPath>> {
        path::resolve_all(root, path)
    }

    #[must_use]
    pub fn events(&self) -> &ModelEvents {
        &self.ctx().events
    }

    #[must_use]
    pub fn conditions(&self) -> &ConditionRegistry {
        &self.ctx().conditions
    }

    #[must_use]
    pub fn scopes(&self) -> &ScopeContext<ModelError> {
        &self.ctx().scopes
    }

    /// Runs `work` in a transaction scope; rules it triggers run before this
    /// returns.
    pub fn perform<T>(&self, work: impl FnOnce() -> Result<T>) -> Result<T> {
        self.ctx().scopes.perform(work)
    }

    /// Subscribes to cascade overrun diagnostics.
    pub fn on_nesting_exceeded(
        &self,
        callback: impl Fn(&NestingExceeded) + 'static,
    ) -> HandlerId {
        self.ctx().scopes.on_nesting_exceeded(callback)
    }

    /// Marks the model as loading until the returned token finishes. Rules
    /// registered meanwhile are wired once every token has finished.
    #[must_use]
    pub fn begin_loading(&self) -> LoadToken {
        LoadToken {
            context: Rc::clone(self.ctx()),
            hold: self.ctx().loading.hold(),
            finished: Cell::new(false),
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.ctx().loading.is_active()
    }
}

/// Outstanding load step. See [`Model::begin_loading`].
#[must_use = "loading lasts until the token finishes or drops"]
pub struct LoadToken {
    context: Rc<ModelContext>,
    hold: PendingCallback<()>,
    finished: Cell<bool>,
}

impl fmt::Debug for LoadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadToken")
            .field("finished", &self.finished.get())
            .finish()
    }
}

impl LoadToken {
    /// Ends this load step. When it was the last one, queued rule
    /// registrations run and the first failure among them is returned.
    pub fn finish(self) -> Result<()> {
        self.release();
        if self.context.loading.is_active() {
            return Ok(());
        }
        let mut errors = std::mem::take(&mut *self.context.deferred_errors.borrow_mut());
        if errors.is_empty() {
            return Ok(());
        }
        let first = errors.remove(0);
        for error in &errors {
            warn!(%error, "additional deferred rule registration failure");
        }
        Err(first)
    }

    /// Returns false when the token had already been released.
    fn release(&self) -> bool {
        if self.finished.replace(true) {
            return false;
        }
        self.hold.call(());
        true
    }
}

impl Drop for LoadToken {
    fn drop(&mut self) {
        if !self.release() || self.context.loading.is_active() {
            return;
        }
        // Nobody is left to return these to.
        for error in self.context.deferred_errors.take() {
            warn!(%error, "deferred rule registration failed");
        }
    }
}
