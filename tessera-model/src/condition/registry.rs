use super::{ConditionCategory, ConditionType, ConditionTypeSet};
use crate::error::{ModelError, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::debug;

/// Model-owned registry of condition types and sets, keyed by code and
/// name.
#[derive(Default)]
pub struct ConditionRegistry {
    types: RefCell<BTreeMap<String, ConditionType>>,
    sets: RefCell<BTreeMap<String, ConditionTypeSet>>,
}

impl ConditionRegistry {
    /// Registers a condition type. Codes are unique.
    pub fn add_type(
        &self,
        code: &str,
        category: ConditionCategory,
        message: &str,
    ) -> Result<ConditionType> {
        let mut types = self.types.borrow_mut();
        if types.contains_key(code) {
            return Err(ModelError::DuplicateConditionType(code.to_string()));
        }
        let condition_type = ConditionType::new(code, category, message);
        types.insert(code.to_string(), condition_type.clone());
        debug!(code, "condition type registered");
        Ok(condition_type)
    }

    /// Shorthand for an error type.
    pub fn add_error(&self, code: &str, message: &str) -> Result<ConditionType> {
        self.add_type(code, ConditionCategory::Error, message)
    }

    /// Shorthand for a warning type.
    pub fn add_warning(&self, code: &str, message: &str) -> Result<ConditionType> {
        self.add_type(code, ConditionCategory::Warning, message)
    }

    /// The type registered under `code`, or a new one.
    pub(crate) fn get_or_add(
        &self,
        code: &str,
        category: ConditionCategory,
        message: &str,
    ) -> Result<ConditionType> {
        match self.condition_type(code) {
            Some(existing) => Ok(existing),
            None => self.add_type(code, category, message),
        }
    }

    #[must_use]
    pub fn condition_type(&self, code: &str) -> Option<ConditionType> {
        self.types.borrow().get(code).cloned()
    }

    /// Types ordered by code.
    #[must_use]
    pub fn condition_types(&self) -> Vec<ConditionType> {
        self.types.borrow().values().cloned().collect()
    }

    /// Registers an empty set. Names are unique.
    pub fn add_set(&self, name: &str) -> Result<ConditionTypeSet> {
        let mut sets = self.sets.borrow_mut();
        if sets.contains_key(name) {
            return Err(ModelError::DuplicateConditionTypeSet(name.to_string()));
        }
        let set = ConditionTypeSet::new(name);
        sets.insert(name.to_string(), set.clone());
        debug!(set = name, "condition type set registered");
        Ok(set)
    }

    #[must_use]
    pub fn set(&self, name: &str) -> Option<ConditionTypeSet> {
        self.sets.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn sets(&self) -> Vec<ConditionTypeSet> {
        self.sets.borrow().values().cloned().collect()
    }

    pub(crate) fn teardown(&self) {
        let types = std::mem::take(&mut *self.types.borrow_mut());
        for condition_type in types.values() {
            condition_type.teardown();
        }
        let sets = std::mem::take(&mut *self.sets.borrow_mut());
        for set in sets.values() {
            set.teardown();
        }
    }
}
