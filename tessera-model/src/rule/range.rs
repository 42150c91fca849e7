use super::validated::{ValidatedPropertyRule, ValidationSettings, validation_setters, validity};
use super::{IntoRule, Rule};
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::value::Value;
use std::cmp::Ordering;

/// Numbers, dates or text within inclusive bounds. Null is in range.
#[derive(Clone)]
pub struct RangeRule {
    property: String,
    min: Option<Value>,
    max: Option<Value>,
    settings: ValidationSettings,
}

impl RangeRule {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            min: None,
            max: None,
            settings: ValidationSettings::default(),
        }
    }

    #[must_use]
    pub fn min(mut self, min: impl Into<Value>) -> Self {
        self.min = Some(min.into());
        self
    }

    #[must_use]
    pub fn max(mut self, max: impl Into<Value>) -> Self {
        self.max = Some(max.into());
        self
    }

    validation_setters!();
}

fn in_range(value: &Value, min: Option<&Value>, max: Option<&Value>) -> bool {
    if value.is_null() {
        return true;
    }
    let above_min = min.is_none_or(|min| {
        matches!(value.compare(min), Some(Ordering::Greater | Ordering::Equal))
    });
    let below_max = max.is_none_or(|max| {
        matches!(value.compare(max), Some(Ordering::Less | Ordering::Equal))
    });
    above_min && below_max
}

impl IntoRule for RangeRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        let message = match (&self.min, &self.max) {
            (Some(min), Some(max)) => format!("{{label}} must be between {min} and {max}."),
            (Some(min), None) => format!("{{label}} must be at least {min}."),
            (None, Some(max)) => format!("{{label}} must be at most {max}."),
            (None, None) => {
                return Err(ModelError::InvalidRule {
                    rule: format!("{}.{}.Range", root_type.name(), self.property),
                    reason: "a range needs a minimum or a maximum".into(),
                });
            }
        };
        let (min, max) = (self.min, self.max);
        ValidatedPropertyRule::build(
            self.property,
            "Range",
            validity(move |_, value| Ok(in_range(value, min.as_ref(), max.as_ref()))),
            message,
            self.settings,
        )
        .into_rule(root_type)
    }
}
