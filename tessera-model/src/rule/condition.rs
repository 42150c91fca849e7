use super::{IntoRule, Rule, RuleOptions};
use crate::condition::ConditionType;
use crate::entity::Entity;
use crate::entity_type::Type;
use crate::error::Result;
use crate::path::{self, PropertyPath};
use std::cell::RefCell;
use std::rc::Rc;

type Assertion = Rc<dyn Fn(&Entity) -> Result<bool>>;

/// Attaches a condition of a given type while `assert` holds.
///
/// By default the rule runs when entities initialize and whenever one of
/// its `properties` changes.
#[derive(Clone)]
pub struct ConditionRule {
    name: Option<String>,
    condition_type: ConditionType,
    assert: Assertion,
    message: Option<String>,
    properties: Vec<String>,
    on_change_of: Vec<String>,
}

impl ConditionRule {
    pub fn new(
        condition_type: &ConditionType,
        assert: impl Fn(&Entity) -> Result<bool> + 'static,
    ) -> Self {
        Self {
            name: None,
            condition_type: condition_type.clone(),
            assert: Rc::new(assert),
            message: None,
            properties: Vec::new(),
            on_change_of: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Overrides the condition type's message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Paths the condition is attached to; braces expand.
    #[must_use]
    pub fn properties<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Extra predicates beyond `properties`.
    #[must_use]
    pub fn on_change_of<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_change_of.extend(paths.into_iter().map(Into::into));
        self
    }
}

impl IntoRule for ConditionRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        let name = self.name.unwrap_or_else(|| {
            format!("{}.{}", root_type.name(), self.condition_type.code())
        });
        let condition_type = self.condition_type;
        let assert = self.assert;
        let message = self.message;
        let paths = self.properties.clone();
        let resolved: RefCell<Option<Vec<PropertyPath>>> = RefCell::new(None);
        let root = root_type.clone();

        let options = RuleOptions::new()
            .name(name)
            .on_init()
            .on_change_of(self.properties.into_iter().chain(self.on_change_of))
            .execute(move |entity| {
                let cached = resolved.borrow().clone();
                let targets = match cached {
                    Some(targets) => targets,
                    None => {
                        let mut targets = Vec::new();
                        for p in &paths {
                            targets.extend(path::resolve_all(&root, p)?);
                        }
                        *resolved.borrow_mut() = Some(targets.clone());
                        targets
                    }
                };
                let asserted = assert(entity)?;
                condition_type
                    .when(asserted, entity, &targets, message.as_deref())
                    .map(drop)
            })
            .validation();
        Rule::new(root_type, options)
    }
}
