use super::validated::{ValidatedPropertyRule, ValidationSettings, validation_setters, validity};
use super::{IntoRule, Rule};
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::value::Value;
use regex_lite::Regex;
use std::rc::Rc;

/// Text must match a regular expression (anchored at both ends).
///
/// With a reformat template, valid text is rewritten through it, e.g. the
/// expression `(\d{3})-?(\d{4})` with template `$1-$2` turns `5551234` into
/// `555-1234`. Null and empty text pass.
#[derive(Clone)]
pub struct StringFormatRule {
    property: String,
    description: String,
    expression: Rc<Regex>,
    reformat: Option<String>,
    settings: ValidationSettings,
}

impl StringFormatRule {
    /// `description` names the format in the message ("a phone number").
    pub fn new(
        property: impl Into<String>,
        description: impl Into<String>,
        expression: &str,
    ) -> Result<Self> {
        let property = property.into();
        let anchored = format!("^(?:{expression})$");
        let expression = Regex::new(&anchored).map_err(|e| ModelError::InvalidRule {
            rule: format!("{property}.StringFormat"),
            reason: e.to_string(),
        })?;
        Ok(Self {
            property,
            description: description.into(),
            expression: Rc::new(expression),
            reformat: None,
            settings: ValidationSettings::default(),
        })
    }

    /// Replacement template applied to valid text (`$1`, `${name}`).
    #[must_use]
    pub fn reformat(mut self, template: impl Into<String>) -> Self {
        self.reformat = Some(template.into());
        self
    }

    validation_setters!();
}

impl IntoRule for StringFormatRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        let message = format!("{{label}} must be formatted as {}.", self.description);
        let expression = Rc::clone(&self.expression);
        let mut rule = ValidatedPropertyRule::build(
            self.property,
            "StringFormat",
            validity(move |_, value| {
                Ok(match value {
                    Value::Text(text) if !text.is_empty() => expression.is_match(text),
                    _ => true,
                })
            }),
            message,
            self.settings,
        );

        if let Some(template) = self.reformat {
            let expression = self.expression;
            rule = rule.after_valid(move |entity, property, value| {
                let Value::Text(text) = value else {
                    return Ok(());
                };
                if text.is_empty() {
                    return Ok(());
                }
                let formatted = expression.replace(text, template.as_str()).into_owned();
                if &formatted != text {
                    property.set_value(entity, formatted)?;
                }
                Ok(())
            });
        }
        rule.into_rule(root_type)
    }
}
