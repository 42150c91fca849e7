use super::{Condition, ConditionCategory, ConditionTypeSet, resolve_slots};
use crate::entity::Entity;
use crate::error::Result;
use crate::path::PropertyPath;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct ConditionTypeInner {
    code: String,
    category: ConditionCategory,
    message: String,
    sets: RefCell<Vec<ConditionTypeSet>>,
    conditions: RefCell<Vec<Condition>>,
}

/// A uniquely coded condition category. Create through
/// [`ConditionRegistry::add_type`](super::ConditionRegistry::add_type).
#[derive(Clone)]
pub struct ConditionType(Rc<ConditionTypeInner>);

impl PartialEq for ConditionType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionType")
            .field("code", &self.0.code)
            .field("category", &self.0.category)
            .finish()
    }
}

impl ConditionType {
    pub(crate) fn new(code: &str, category: ConditionCategory, message: &str) -> Self {
        Self(Rc::new(ConditionTypeInner {
            code: code.to_string(),
            category,
            message: message.to_string(),
            sets: RefCell::new(Vec::new()),
            conditions: RefCell::new(Vec::new()),
        }))
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.0.code
    }

    #[must_use]
    pub fn category(&self) -> &ConditionCategory {
        &self.0.category
    }

    /// Default message for conditions of this type.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0.message
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.0.category == ConditionCategory::Error
    }

    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.0.category == ConditionCategory::Warning
    }

    #[must_use]
    pub fn is_permission(&self) -> bool {
        matches!(self.0.category, ConditionCategory::Permission { .. })
    }

    #[must_use]
    pub fn sets(&self) -> Vec<ConditionTypeSet> {
        self.0.sets.borrow().clone()
    }

    /// Live conditions of this type.
    #[must_use]
    pub fn conditions(&self) -> Vec<Condition> {
        self.0.conditions.borrow().clone()
    }

    /// Makes the condition of this type created for `target` agree with
    /// `assert`.
    ///
    /// - asserted, none exists: a condition is created
    /// - asserted, one exists with the same message and targets: left alone
    /// - asserted, one exists with another message or other targets: replaced
    /// - not asserted: any existing condition is destroyed
    ///
    /// Conditions are matched by the entity they were created for, so chain
    /// paths that only target leaf entities are found again. Returns the
    /// condition that exists afterwards, if any. `message` falls back to the
    /// type's default message.
    pub fn when(
        &self,
        assert: bool,
        target: &Entity,
        paths: &[PropertyPath],
        message: Option<&str>,
    ) -> Result<Option<Condition>> {
        let existing = self.created_for(target, paths);
        if !assert {
            if let Some(condition) = existing {
                condition.destroy()?;
            }
            return Ok(None);
        }

        let message = message.unwrap_or(&self.0.message);
        let slots = resolve_slots(target, paths)?;
        if let Some(condition) = existing {
            if condition.message() == message && condition.covers(&slots) {
                return Ok(Some(condition));
            }
            condition.destroy()?;
        }
        Condition::attach(self, target, slots, message.to_string()).map(Some)
    }

    /// The live condition of this type whose root is `root`.
    fn created_for(&self, root: &Entity, paths: &[PropertyPath]) -> Option<Condition> {
        let attached = root
            .meta()
            .condition_target(self)
            .map(|t| t.condition)
            .filter(|c| c.root().as_ref() == Some(root));
        // Without chains a condition for `root` always targets `root`.
        if attached.is_some() || !paths.iter().any(|p| matches!(p, PropertyPath::Chain(_))) {
            return attached;
        }
        self.0
            .conditions
            .borrow()
            .iter()
            .find(|c| c.root().as_ref() == Some(root))
            .cloned()
    }

    pub(crate) fn add_set(&self, set: &ConditionTypeSet) {
        let mut sets = self.0.sets.borrow_mut();
        if !sets.contains(set) {
            sets.push(set.clone());
        }
    }

    pub(crate) fn track(&self, condition: &Condition) {
        self.0.conditions.borrow_mut().push(condition.clone());
        for set in self.sets() {
            set.track(condition);
        }
    }

    pub(crate) fn untrack(&self, condition: &Condition) {
        self.0.conditions.borrow_mut().retain(|c| c != condition);
        for set in self.sets() {
            set.untrack(condition);
        }
    }

    pub(crate) fn teardown(&self) {
        let conditions = std::mem::take(&mut *self.0.conditions.borrow_mut());
        for condition in &conditions {
            condition.0.targets.borrow_mut().clear();
        }
        self.0.sets.borrow_mut().clear();
    }
}
