//! Error types for the entity model.

use thiserror::Error;

/// Errors raised by model registration, property access and rule execution.
///
/// Validation outcomes are never errors: they surface as conditions attached
/// to entities. Cascade overruns are never errors either; the scope aborts and
/// a diagnostic is published instead.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A type with this name is already registered.
    #[error("type '{0}' is already registered")]
    DuplicateType(String),

    /// The type or one of its ancestors already declares the property.
    #[error("property '{property}' already exists on type '{type_name}'")]
    DuplicateProperty { type_name: String, property: String },

    /// An entity with this id already exists in the type hierarchy.
    #[error("an entity of type '{type_name}' with id '{id}' already exists")]
    DuplicateId { type_name: String, id: String },

    /// A condition type with this code is already registered.
    #[error("condition type '{0}' is already registered")]
    DuplicateConditionType(String),

    /// A condition type set with this name is already registered.
    #[error("condition type set '{0}' is already registered")]
    DuplicateConditionTypeSet(String),

    /// The rule was registered (or queued for registration) already.
    #[error("rule '{0}' is already registered and cannot be changed")]
    RuleRegistered(String),

    /// The rule's configuration cannot be wired.
    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    /// A value does not match the property's declared type.
    #[error("cannot set '{property}' to {actual}: expected {expected}")]
    TypeMismatch {
        property: String,
        expected: String,
        actual: String,
    },

    /// List properties keep their list object; use list operations instead.
    #[error("list property '{0}' cannot be reassigned")]
    ListReassignment(String),

    /// Instance access on a static property, or static access on an instance one.
    #[error("property '{0}' is used with the wrong storage (static vs instance)")]
    StaticProperty(String),

    /// No type with this name is registered.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// A path segment names a property the type does not have.
    #[error("unknown property '{property}' in path '{path}'")]
    UnknownProperty { path: String, property: String },

    /// The path string is malformed or cannot be traversed.
    #[error("invalid property path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The string is not a `"<Type>|<id>"` identity.
    #[error("invalid identity '{0}'")]
    InvalidIdentity(String),

    /// The entity was destroyed.
    #[error("entity '{0}' has been destroyed")]
    EntityDestroyed(String),

    /// A list index was outside the list.
    #[error("index {index} is out of range for a list of {len} items")]
    IndexOutOfRange { index: usize, len: usize },

    /// A rule body failed.
    #[error("rule '{rule}' failed: {message}")]
    Rule { rule: String, message: String },

    /// Configuration values are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// TOML configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON configuration could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    /// Convenience constructor for failures inside rule bodies.
    pub fn rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rule {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
