use super::validated::{ValidatedPropertyRule, ValidationSettings, validation_setters, validity};
use super::{IntoRule, Rule};
use crate::entity_type::Type;
use crate::error::Result;
use crate::value::Value;

/// The property must hold something: not null, not blank text, not an
/// empty list.
#[derive(Clone)]
pub struct RequiredRule {
    property: String,
    settings: ValidationSettings,
}

impl RequiredRule {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            settings: ValidationSettings::default(),
        }
    }

    validation_setters!();
}

pub(crate) fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Text(text) => !text.trim().is_empty(),
        Value::List(list) => !list.is_empty(),
        _ => true,
    }
}

impl IntoRule for RequiredRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        ValidatedPropertyRule::build(
            self.property,
            "Required",
            validity(|_, value| Ok(has_value(value))),
            "{label} is required.".into(),
            self.settings,
        )
        .into_rule(root_type)
    }
}
