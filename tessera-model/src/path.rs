//! Property path strings.
//!
//! Grammar: segments separated by `.`, each `name` or `name<Type.Name>`
//! where the cast narrows the entities the step reaches. Braces expand to
//! several paths: `parent.{a,b}` is `parent.a` and `parent.b`, and braces
//! nest.

use crate::chain::{ChainStep, PropertyChain};
use crate::entity::Entity;
use crate::entity_type::Type;
use crate::error::{ModelError, Result};
use crate::property::Property;
use crate::value::Value;
use std::fmt;
use tessera_events::HandlerId;

/// A resolved path: a single property or a multi-step chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyPath {
    Property(Property),
    Chain(PropertyChain),
}

impl PropertyPath {
    /// Properties along the path, in order.
    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        match self {
            PropertyPath::Property(p) => vec![p.clone()],
            PropertyPath::Chain(c) => c.properties(),
        }
    }

    #[must_use]
    pub fn last_property(&self) -> Property {
        match self {
            PropertyPath::Property(p) => p.clone(),
            PropertyPath::Chain(c) => c.last_property(),
        }
    }

    /// Value at the end of the path for `root` (the first one when the path
    /// fans out).
    pub fn value(&self, root: &Entity) -> Result<Value> {
        match self {
            PropertyPath::Property(p) => p.value(root),
            PropertyPath::Chain(c) => c.value(root),
        }
    }

    /// Every value at the end of the path for `root`.
    pub fn values(&self, root: &Entity) -> Result<Vec<Value>> {
        match self {
            PropertyPath::Property(p) => Ok(vec![p.value(root)?]),
            PropertyPath::Chain(c) => c.values(root),
        }
    }

    #[must_use]
    pub fn is_inited(&self, root: &Entity) -> bool {
        match self {
            PropertyPath::Property(p) => p.is_inited(root),
            PropertyPath::Chain(c) => c.is_inited(root, true),
        }
    }

    /// Calls `handler` with the root entity whenever a change anywhere on
    /// the path affects it.
    pub(crate) fn subscribe_changes(
        &self,
        handler: impl Fn(&Entity) -> Result<()> + 'static,
    ) -> HandlerId {
        match self {
            PropertyPath::Property(p) => p.changed().subscribe(move |change| match &change.entity {
                Some(entity) => handler(entity),
                None => Ok(()),
            }),
            PropertyPath::Chain(c) => c.subscribe(move |change| handler(&change.root)),
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyPath::Property(p) => f.write_str(p.name()),
            PropertyPath::Chain(c) => write!(f, "{c}"),
        }
    }
}

/// Resolves a brace-free path rooted at `root`.
pub(crate) fn resolve(root: &Type, path: &str) -> Result<PropertyPath> {
    if path.contains(['{', '}']) {
        return Err(invalid(path, "braces need expansion; use property_paths"));
    }
    let segments = split_segments(path)?;
    let ctx = root.context();
    let last = segments.len() - 1;

    let mut current = root.clone();
    let mut steps = Vec::with_capacity(segments.len());
    for (index, segment) in segments.into_iter().enumerate() {
        let property = current
            .property(&segment.name)
            .ok_or_else(|| ModelError::UnknownProperty {
                path: path.to_string(),
                property: segment.name.clone(),
            })?;
        let filter = match &segment.cast {
            Some(name) => Some(
                ctx.type_by_name(name)
                    .ok_or_else(|| ModelError::UnknownType(name.clone()))?,
            ),
            None => None,
        };

        if index < last {
            current = match &filter {
                Some(ty) => ty.clone(),
                None => {
                    let name = property.value_type().entity_type_name().ok_or_else(|| {
                        invalid(path, &format!("'{}' does not hold entities", segment.name))
                    })?;
                    ctx.type_by_name(name)
                        .ok_or_else(|| ModelError::UnknownType(name.to_string()))?
                }
            };
        }
        steps.push(ChainStep { property, filter });
    }

    if steps.len() == 1 && steps[0].filter.is_none() {
        let step = steps.remove(0);
        return Ok(PropertyPath::Property(step.property));
    }
    Ok(PropertyPath::Chain(PropertyChain::new(root, steps)?))
}

/// Expands braces, then resolves every expansion.
pub(crate) fn resolve_all(root: &Type, path: &str) -> Result<Vec<PropertyPath>> {
    expand_braces(path)?
        .iter()
        .map(|p| resolve(root, p))
        .collect()
}

fn invalid(path: &str, reason: &str) -> ModelError {
    ModelError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// `a.{b,c{d,e}}` → `a.b`, `a.cd`, `a.ce`.
pub(crate) fn expand_braces(path: &str) -> Result<Vec<String>> {
    let Some(open) = path.find('{') else {
        if path.contains('}') {
            return Err(invalid(path, "unbalanced '}'"));
        }
        return Ok(vec![path.trim().to_string()]);
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (offset, c) in path[open..].char_indices() {
        let at = open + offset;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(at);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(at),
            _ => {}
        }
    }
    let close = close.ok_or_else(|| invalid(path, "unbalanced '{'"))?;

    let prefix = &path[..open];
    let suffix = &path[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut expanded = Vec::new();
    for pair in bounds.windows(2) {
        let alternative = path[pair[0] + 1..pair[1]].trim();
        expanded.extend(expand_braces(&format!("{prefix}{alternative}{suffix}"))?);
    }
    Ok(expanded)
}

#[derive(Debug, PartialEq)]
struct Segment {
    name: String,
    cast: Option<String>,
}

fn split_segments(path: &str) -> Result<Vec<Segment>> {
    let mut raw = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(path, "unbalanced '>'"))?;
            }
            '.' if depth == 0 => {
                raw.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(path, "unbalanced '<'"));
    }
    raw.push(&path[start..]);

    raw.into_iter()
        .map(|segment| {
            let segment = segment.trim();
            let (name, cast) = match segment.split_once('<') {
                Some((name, rest)) => {
                    let cast = rest
                        .strip_suffix('>')
                        .ok_or_else(|| invalid(path, "cast must end the segment"))?;
                    (name.trim(), Some(cast.trim().to_string()))
                }
                None => (segment, None),
            };
            if name.is_empty() || cast.as_deref() == Some("") {
                return Err(invalid(path, "empty segment"));
            }
            Ok(Segment {
                name: name.to_string(),
                cast,
            })
        })
        .collect()
}
