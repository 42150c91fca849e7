use super::validated::{ValidatedPropertyRule, ValidationSettings, validation_setters, validity};
use super::{IntoRule, Rule};
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::value::Value;

/// Text length, in characters, within inclusive bounds. Null and empty text
/// pass; pair with [`RequiredRule`](super::RequiredRule) to reject them.
#[derive(Clone)]
pub struct StringLengthRule {
    property: String,
    min: Option<usize>,
    max: Option<usize>,
    settings: ValidationSettings,
}

impl StringLengthRule {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            min: None,
            max: None,
            settings: ValidationSettings::default(),
        }
    }

    #[must_use]
    pub fn min(mut self, min: usize) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    validation_setters!();
}

impl IntoRule for StringLengthRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        let message = match (self.min, self.max) {
            (Some(min), Some(max)) => {
                format!("{{label}} must be between {min} and {max} characters.")
            }
            (Some(min), None) => format!("{{label}} must be at least {min} characters."),
            (None, Some(max)) => format!("{{label}} must be at most {max} characters."),
            (None, None) => {
                return Err(ModelError::InvalidRule {
                    rule: format!("{}.{}.StringLength", root_type.name(), self.property),
                    reason: "a length rule needs a minimum or a maximum".into(),
                });
            }
        };
        let (min, max) = (self.min, self.max);
        ValidatedPropertyRule::build(
            self.property,
            "StringLength",
            validity(move |_, value| {
                let len = match value {
                    Value::Text(text) if !text.is_empty() => text.chars().count(),
                    _ => return Ok(true),
                };
                Ok(min.is_none_or(|min| len >= min) && max.is_none_or(|max| len <= max))
            }),
            message,
            self.settings,
        )
        .into_rule(root_type)
    }
}
