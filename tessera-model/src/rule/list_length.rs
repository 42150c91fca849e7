use super::validated::{ValidatedPropertyRule, ValidationSettings, validation_setters, validity};
use super::{IntoRule, Rule};
use crate::entity_type::Type;
use crate::error::{ModelError, Result};

/// Number of items in a list property within inclusive bounds.
#[derive(Clone)]
pub struct ListLengthRule {
    property: String,
    min: Option<usize>,
    max: Option<usize>,
    settings: ValidationSettings,
}

impl ListLengthRule {
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

impl IntoRule for ListLengthRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        let message = match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{{label}} must have between {min} and {max} items."),
            (Some(min), None) => format!("{{label}} must have at least {min} items."),
            (None, Some(max)) => format!("{{label}} must have at most {max} items."),
            (None, None) => {
                return Err(ModelError::InvalidRule {
                    rule: format!("{}.{}.ListLength", root_type.name(), self.property),
                    reason: "a length rule needs a minimum or a maximum".into(),
                });
            }
        };
        let (min, max) = (self.min, self.max);
        ValidatedPropertyRule::build(
            self.property,
            "ListLength",
            validity(move |_, value| {
                let len = value.items().len();
                Ok(min.is_none_or(|min| len >= min) && max.is_none_or(|max| len <= max))
            }),
            message,
            self.settings,
        )
        .into_rule(root_type)
    }
}
