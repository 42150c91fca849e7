use super::{IntoRule, Rule, RuleOptions, render_message};
use crate::condition::{ConditionCategory, ConditionType};
use crate::entity::Entity;
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::path::PropertyPath;
use crate::property::Property;
use crate::value::Value;
use std::rc::Rc;

pub(crate) type Validity = Rc<dyn Fn(&Entity, &Value) -> Result<bool>>;
type AfterValid = Rc<dyn Fn(&Entity, &Property, &Value) -> Result<()>>;

pub(crate) fn validity(f: impl Fn(&Entity, &Value) -> Result<bool> + 'static) -> Validity {
    Rc::new(f)
}

/// Settings every property validation rule accepts.
#[derive(Clone, Default)]
pub(crate) struct ValidationSettings {
    pub(crate) name: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) condition_type: Option<ConditionType>,
    pub(crate) on_change_of: Vec<String>,
}

/// Builder methods backed by a `settings: ValidationSettings` field.
macro_rules! validation_setters {
    () => {
        #[must_use]
        pub fn name(mut self, name: impl Into<String>) -> Self {
            self.settings.name = Some(name.into());
            self
        }

        /// Message template; `{label}` becomes the property label.
        #[must_use]
        pub fn message(mut self, template: impl Into<String>) -> Self {
            self.settings.message = Some(template.into());
            self
        }

        /// Uses `condition_type` instead of the rule's default error type.
        #[must_use]
        pub fn condition_type(mut self, condition_type: &$crate::ConditionType) -> Self {
            self.settings.condition_type = Some(condition_type.clone());
            self
        }

        /// Revalidates when these paths change too.
        #[must_use]
        pub fn on_change_of<I, S>(mut self, paths: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.settings
                .on_change_of
                .extend(paths.into_iter().map(Into::into));
            self
        }
    };
}

pub(crate) use validation_setters;

/// Validates one property of the root type.
///
/// When `is_valid` fails for the current value, an error condition is
/// attached to the entity for that property; when it passes again the
/// condition is removed. Unless a condition type is supplied, the rule
/// creates (or reuses) one coded `"<Type>.<Property>.<Kind>"`.
#[derive(Clone)]
pub struct ValidatedPropertyRule {
    property: String,
    kind: String,
    is_valid: Validity,
    default_message: String,
    after_valid: Option<AfterValid>,
    settings: ValidationSettings,
}

impl ValidatedPropertyRule {
    pub fn new(
        property: impl Into<String>,
        is_valid: impl Fn(&Entity, &Value) -> Result<bool> + 'static,
    ) -> Self {
        Self::build(
            property.into(),
            "Validated",
            validity(is_valid),
            "{label} is invalid.".into(),
            ValidationSettings::default(),
        )
    }

    pub(crate) fn build(
        property: String,
        kind: &str,
        is_valid: Validity,
        default_message: String,
        settings: ValidationSettings,
    ) -> Self {
        Self {
            property,
            kind: kind.to_string(),
            is_valid,
            default_message,
            after_valid: None,
            settings,
        }
    }

    /// Runs `after` whenever the value validates.
    pub(crate) fn after_valid(
        mut self,
        after: impl Fn(&Entity, &Property, &Value) -> Result<()> + 'static,
    ) -> Self {
        self.after_valid = Some(Rc::new(after));
        self
    }

    validation_setters!();
}

impl IntoRule for ValidatedPropertyRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        let property = root_type
            .property(&self.property)
            .ok_or_else(|| ModelError::UnknownProperty {
                path: format!("{}.{}", root_type.name(), self.property),
                property: self.property.clone(),
            })?;
        let code = format!("{}.{}.{}", root_type.name(), property.name(), self.kind);
        let template = self.settings.message.unwrap_or(self.default_message);
        let message = render_message(&template, &property);
        let condition_type = match self.settings.condition_type {
            Some(ct) => ct,
            None => root_type.context().conditions.get_or_add(
                &code,
                ConditionCategory::Error,
                &message,
            )?,
        };

        let paths = vec![PropertyPath::Property(property.clone())];
        let is_valid = self.is_valid;
        let after_valid = self.after_valid;
        let target = property.clone();
        let predicates = std::iter::once(property.name().to_string()).chain(self.settings.on_change_of);

        let options = RuleOptions::new()
            .name(self.settings.name.unwrap_or(code))
            .on_init()
            .on_change_of(predicates)
            .execute(move |entity| {
                let value = target.value(entity)?;
                let valid = is_valid(entity, &value)?;
                condition_type.when(!valid, entity, &paths, Some(&message))?;
                if let (true, Some(after)) = (valid, &after_valid) {
                    after(entity, &target, &value)?;
                }
                Ok(())
            })
            .validation();
        Rule::new(root_type, options)
    }
}
