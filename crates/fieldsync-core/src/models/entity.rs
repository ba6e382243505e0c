//! Entity identity model

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Entity types synchronized by default, in pass order
pub const DEFAULT_ENTITY_TYPES: [&str; 5] = ["users", "projects", "samples", "captures", "annotations"];

fn entity_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("Invalid regex"))
}

/// Discriminator for a class of synchronized records (e.g. `projects`)
///
/// Values are lowercase identifiers. Instances used by the engine are obtained
/// through an [`EntityRegistry`], which rejects names it does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    /// Validate and wrap an entity type name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if !entity_type_pattern().is_match(trimmed) {
            return Err(Error::InvalidInput(format!(
                "Invalid entity type '{trimmed}': expected a lowercase identifier"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the raw name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-facing name used in aggregated error messages (`projects` -> `Projects`)
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut chars = self.0.chars();
        chars.next().map_or_else(String::new, |first| {
            first.to_uppercase().chain(chars).collect()
        })
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.0
    }
}

/// Ordered set of entity types the engine is allowed to synchronize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRegistry {
    types: Vec<EntityType>,
}

impl EntityRegistry {
    /// Build a registry from names, preserving order and dropping duplicates
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut types: Vec<EntityType> = Vec::new();
        for name in names {
            let entity_type = EntityType::new(name)?;
            if !types.contains(&entity_type) {
                types.push(entity_type);
            }
        }
        if types.is_empty() {
            return Err(Error::InvalidInput(
                "Entity registry must contain at least one type".into(),
            ));
        }
        Ok(Self { types })
    }

    /// Resolve a raw name against the registry
    pub fn resolve(&self, name: &str) -> Result<EntityType> {
        let candidate = EntityType::new(name)?;
        if self.types.contains(&candidate) {
            Ok(candidate)
        } else {
            Err(Error::InvalidInput(format!(
                "Unknown entity type '{candidate}'"
            )))
        }
    }

    /// Check whether a type is registered
    #[must_use]
    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.types.contains(entity_type)
    }

    /// Registered types in sync order
    #[must_use]
    pub fn types(&self) -> &[EntityType] {
        &self.types
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self {
            types: DEFAULT_ENTITY_TYPES
                .iter()
                .map(|name| EntityType((*name).to_string()))
                .collect(),
        }
    }
}

/// Identifier of a single record within an entity type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Wrap a non-empty identifier
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Entity ID cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

/// `(entity_type, entity_id)` pair identifying one tracked record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl EntityKey {
    #[must_use]
    pub const fn new(entity_type: EntityType, entity_id: EntityId) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Versioned payload of one entity, as held locally or remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub key: EntityKey,
    /// Opaque JSON payload owned by the domain layer
    pub payload: serde_json::Value,
    /// Version counter of this copy
    pub version: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}
