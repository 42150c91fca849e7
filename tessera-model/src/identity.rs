//! `"<Type>|<id>"` identity strings.

use crate::entity::Entity;
use crate::error::{ModelError, Result};
use crate::model::Model;

const SEPARATOR: char = '|';

impl Entity {
    /// `"<Type>|<id>"`, e.g. `"Customer|42"`.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}{SEPARATOR}{}", self.entity_type().name(), self.id())
    }
}

/// Splits an identity into type name and id.
pub fn parse_identity(identity: &str) -> Result<(&str, &str)> {
    match identity.split_once(SEPARATOR) {
        Some((ty, id)) if !ty.is_empty() && !id.is_empty() && !id.contains(SEPARATOR) => {
            Ok((ty, id))
        }
        _ => Err(ModelError::InvalidIdentity(identity.to_string())),
    }
}

impl Model {
    /// The pooled entity an identity names, if it has been materialized.
    pub fn resolve_identity(&self, identity: &str) -> Result<Option<Entity>> {
        let (ty, id) = parse_identity(identity)?;
        Ok(self.require_type(ty)?.get(id, false))
    }

    /// The entity an identity names, materializing an existing one when it
    /// is not pooled yet.
    pub fn from_identity(&self, identity: &str) -> Result<Entity> {
        let (ty, id) = parse_identity(identity)?;
        self.require_type(ty)?.get_or_create(id)
    }
}
