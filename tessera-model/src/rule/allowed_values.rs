use super::validated::{ValidatedPropertyRule, ValidationSettings, validation_setters, validity};
use super::{IntoRule, Rule};
use crate::entity::Entity;
use crate::entity_type::Type;
use crate::error::Result;
use crate::path;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

/// Where the allowed values come from.
#[derive(Clone)]
pub enum AllowedValuesSource {
    /// A fixed list.
    Values(Vec<Value>),
    /// A path rooted at the validated entity; list values contribute their
    /// items.
    Path(String),
    /// Computed per entity.
    Function(Rc<dyn Fn(&Entity) -> Result<Vec<Value>>>),
}

impl fmt::Debug for AllowedValuesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedValuesSource::Values(values) => f.debug_tuple("Values").field(values).finish(),
            AllowedValuesSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            AllowedValuesSource::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// The property's value (or every item, for list properties) must be one
/// of the allowed values. No selection is always valid.
///
/// Keep a clone to feed option lists through [`values`](Self::values).
#[derive(Clone)]
pub struct AllowedValuesRule {
    property: String,
    source: AllowedValuesSource,
    settings: ValidationSettings,
}

impl fmt::Debug for AllowedValuesRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllowedValuesRule")
            .field("property", &self.property)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl AllowedValuesRule {
    pub fn new(property: impl Into<String>, source: AllowedValuesSource) -> Self {
        Self {
            property: property.into(),
            source,
            settings: ValidationSettings::default(),
        }
    }

    /// Fixed-list shorthand.
    pub fn values_of<I, V>(property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(
            property,
            AllowedValuesSource::Values(values.into_iter().map(Into::into).collect()),
        )
    }

    /// The values currently allowed for `entity`.
    pub fn values(&self, entity: &Entity) -> Result<Vec<Value>> {
        allowed_values(&self.source, entity)
    }

    validation_setters!();
}

fn allowed_values(source: &AllowedValuesSource, entity: &Entity) -> Result<Vec<Value>> {
    match source {
        AllowedValuesSource::Values(values) => Ok(values.clone()),
        AllowedValuesSource::Function(f) => f(entity),
        AllowedValuesSource::Path(p) => {
            let mut values = Vec::new();
            for resolved in path::resolve_all(entity.entity_type(), p)? {
                for value in resolved.values(entity)? {
                    values.extend(value.items());
                }
            }
            Ok(values)
        }
    }
}

impl IntoRule for AllowedValuesRule {
    fn into_rule(self, root_type: &Type) -> Result<Rule> {
        let mut settings = self.settings;
        if let AllowedValuesSource::Path(p) = &self.source {
            settings.on_change_of.push(p.clone());
        }
        let source = self.source;
        ValidatedPropertyRule::build(
            self.property,
            "AllowedValues",
            validity(move |entity, value| {
                let selected = value.items();
                if selected.is_empty() {
                    return Ok(true);
                }
                let allowed = allowed_values(&source, entity)?;
                Ok(selected
                    .iter()
                    .all(|item| allowed.iter().any(|a| a.same_as(item))))
            }),
            "{label} is not in the list of allowed values.".into(),
            settings,
        )
        .into_rule(root_type)
    }
}
