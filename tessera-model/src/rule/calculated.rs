use super::{IntoRule, Rule, RuleOptions, property_of};
use crate::entity::Entity;
use crate::entity_type::Type;
use crate::error::Result;
use crate::value::Value;
use std::rc::Rc;

type Calculation = Rc<dyn Fn(&Entity) -> Result<Value>>;

/// Computes a property of the root type from other values.
///
/// The property is recomputed on the first read after one of the
/// `on_change_of` paths changes, or right away if someone watches it.
#[derive(Clone)]
pub struct CalculatedPropertyRule {
    name: Option<String>,
    property: String,
    calculate: Calculation,
    on_change_of: Vec<String>,
    on_init: bool,
}

impl CalculatedPropertyRule {
    pub fn new(
        property: impl Into<String>,
        calculate: impl Fn(&Entity) -> Result<Value> + 'static,
    ) -> Self {
        Self {
            name: None,
            property: property.into(),
            calculate: Rc::new(calculate),
            on_change_of: Vec::new(),
            on_init: false,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn on_change_of<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_change_of.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Also compute eagerly when entities initialize.
    #[must_use]
    pub fn on_init(mut self) -> Self {
        self.on_init = true;
        self
    }
}

impl IntoRule for CalculatedPropertyRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        let name = self
            .name
            .unwrap_or_else(|| format!("{}.{}", root_type.name(), self.property));
        let property = self.property.clone();
        let calculate = self.calculate;

        let mut options = RuleOptions::new()
            .name(name)
            .returns([self.property])
            .on_change_of(self.on_change_of)
            .execute(move |entity| {
                let target = property_of(entity, &property)?;
                let value = calculate(entity)?;
                if target.is_list() {
                    target.update_list(entity, value.items())
                } else {
                    target.set_value(entity, value)
                }
            });
        if self.on_init {
            options = options.on_init();
        }
        Rule::new(root_type, options)
    }
}
