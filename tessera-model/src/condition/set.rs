use super::{Condition, ConditionType};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct SetInner {
    name: String,
    types: RefCell<Vec<ConditionType>>,
    conditions: RefCell<Vec<Condition>>,
}

/// A named group of condition types, e.g. everything that blocks saving.
#[derive(Clone)]
pub struct ConditionTypeSet(Rc<SetInner>);

impl PartialEq for ConditionTypeSet {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ConditionTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionTypeSet")
            .field("name", &self.0.name)
            .field("types", &self.0.types.borrow().len())
            .finish()
    }
}

impl ConditionTypeSet {
    pub(crate) fn new(name: &str) -> Self {
        Self(Rc::new(SetInner {
            name: name.to_string(),
            types: RefCell::new(Vec::new()),
            conditions: RefCell::new(Vec::new()),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Adds a condition type. Its live conditions join the set.
    pub fn add_type(&self, condition_type: &ConditionType) {
        if self.contains(condition_type) {
            return;
        }
        self.0.types.borrow_mut().push(condition_type.clone());
        condition_type.add_set(self);
        for condition in condition_type.conditions() {
            self.track(&condition);
        }
    }

    #[must_use]
    pub fn contains(&self, condition_type: &ConditionType) -> bool {
        self.0.types.borrow().contains(condition_type)
    }

    #[must_use]
    pub fn types(&self) -> Vec<ConditionType> {
        self.0.types.borrow().clone()
    }

    /// Live conditions whose type is in the set.
    #[must_use]
    pub fn conditions(&self) -> Vec<Condition> {
        self.0.conditions.borrow().clone()
    }

    pub(crate) fn track(&self, condition: &Condition) {
        let mut conditions = self.0.conditions.borrow_mut();
        if !conditions.contains(condition) {
            conditions.push(condition.clone());
        }
    }

    pub(crate) fn untrack(&self, condition: &Condition) {
        self.0.conditions.borrow_mut().retain(|c| c != condition);
    }

    pub(crate) fn teardown(&self) {
        self.0.types.borrow_mut().clear();
        self.0.conditions.borrow_mut().clear();
    }
}
