//! Logical-to-physical schema mapping.
//!
//! Table and column names are not fixed: callers describe their physical
//! schema in a configuration document, optionally merged over built-in
//! defaults. The document is validated once, at construction; everything
//! above this layer works with logical names only.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::CartError;

/// Logical entities the cart subsystem touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Users,
    Brands,
    Products,
    ProductProperty,
    Carts,
    CartItem,
}

impl Entity {
    pub const ALL: [Entity; 6] = [
        Entity::Users,
        Entity::Brands,
        Entity::Products,
        Entity::ProductProperty,
        Entity::Carts,
        Entity::CartItem,
    ];

    /// Key of this entity in the configuration document.
    pub fn key(self) -> &'static str {
        match self {
            Entity::Users => "users",
            Entity::Brands => "brands",
            Entity::Products => "products",
            Entity::ProductProperty => "product_property",
            Entity::Carts => "carts",
            Entity::CartItem => "cart_item",
        }
    }

    pub fn from_key(key: &str) -> Option<Entity> {
        Entity::ALL.into_iter().find(|entity| entity.key() == key)
    }

    /// Logical columns that must be mapped for this entity.
    fn required_columns(self) -> &'static [&'static str] {
        match self {
            Entity::Users => &["id"],
            Entity::Brands => &["id", "publish"],
            Entity::Products => &["id"],
            Entity::ProductProperty => &[
                "id",
                "product_id",
                "brand_id",
                "code",
                "price",
                "discounted_price",
                "discount_until",
                "tax_rate",
                "stock_count",
                "max_cart_count",
                "is_available",
            ],
            Entity::Carts => &["id", "name", "user_id", "created_at", "expire_at"],
            Entity::CartItem => &["cart_id", "product_property_id", "qnt"],
        }
    }

    fn default_table(self) -> &'static str {
        self.key()
    }
}

/// One entity in the configuration document: a physical table name plus a
/// logical-to-physical column mapping. Both may be partial when the document
/// is merged over the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityConfig {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

/// The raw configuration document, keyed by entity name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaConfig {
    #[serde(flatten)]
    pub entities: BTreeMap<String, EntityConfig>,
}

impl SchemaConfig {
    /// The built-in default document: conventional table names and identity
    /// column mappings for every required column.
    pub fn builtin() -> Self {
        let mut entities = BTreeMap::new();
        for entity in Entity::ALL {
            let columns = entity
                .required_columns()
                .iter()
                .map(|column| ((*column).to_string(), (*column).to_string()))
                .collect();
            entities.insert(
                entity.key().to_string(),
                EntityConfig {
                    table: Some(entity.default_table().to_string()),
                    columns,
                },
            );
        }
        Self { entities }
    }

    /// Recursively merge this (possibly partial) document over the built-in
    /// defaults. Values from `self` win per table name and per column.
    pub fn merged_over_builtin(&self) -> SchemaConfig {
        let mut merged = SchemaConfig::builtin();
        for (entity, overrides) in &self.entities {
            let slot = merged.entities.entry(entity.clone()).or_default();
            if let Some(table) = &overrides.table {
                slot.table = Some(table.clone());
            }
            for (logical, physical) in &overrides.columns {
                slot.columns.insert(logical.clone(), physical.clone());
            }
        }
        merged
    }
}

/// Resolved mapping for one entity. Immutable after construction.
#[derive(Debug, Clone)]
pub struct EntityMap {
    table: String,
    columns: BTreeMap<String, String>,
    reverse: BTreeMap<String, String>,
}

impl EntityMap {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Physical column name for a logical one.
    pub fn physical(&self, logical: &str) -> Result<&str, CartError> {
        self.columns.get(logical).map(String::as_str).ok_or_else(|| {
            CartError::Config(format!("no column mapping for `{logical}` in `{}`", self.table))
        })
    }

    /// Reverse lookup: logical name for a physical column, if mapped.
    pub fn logical_for(&self, physical: &str) -> Option<&str> {
        self.reverse.get(physical).map(String::as_str)
    }

    /// All `(logical, physical)` column pairs.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(l, p)| (l.as_str(), p.as_str()))
    }
}

/// Validated, immutable schema mapping for every entity.
#[derive(Debug, Clone)]
pub struct SchemaMap {
    entities: [EntityMap; 6],
}

impl SchemaMap {
    /// Mapping built from the default document alone.
    pub fn builtin() -> Self {
        match Self::from_config(&SchemaConfig::builtin()) {
            Ok(map) => map,
            Err(_) => unreachable!("builtin schema configuration is complete"),
        }
    }

    /// Build from a full document. Every required entity and column must be
    /// present; a missing key fails construction with [`CartError::Config`].
    pub fn from_config(config: &SchemaConfig) -> Result<Self, CartError> {
        Ok(Self {
            entities: [
                Self::build_entity(Entity::Users, config)?,
                Self::build_entity(Entity::Brands, config)?,
                Self::build_entity(Entity::Products, config)?,
                Self::build_entity(Entity::ProductProperty, config)?,
                Self::build_entity(Entity::Carts, config)?,
                Self::build_entity(Entity::CartItem, config)?,
            ],
        })
    }

    /// Build from a partial document merged over the built-in defaults.
    pub fn from_config_merged(config: &SchemaConfig) -> Result<Self, CartError> {
        Self::from_config(&config.merged_over_builtin())
    }

    /// Build from a raw configuration value, e.g. parsed JSON or TOML.
    pub fn from_value(document: serde_json::Value, merge_over_builtin: bool) -> Result<Self, CartError> {
        let config: SchemaConfig = serde_json::from_value(document)
            .map_err(|err| CartError::Config(format!("malformed schema configuration: {err}")))?;
        if merge_over_builtin {
            Self::from_config_merged(&config)
        } else {
            Self::from_config(&config)
        }
    }

    /// Resolved mapping for a typed entity. Infallible: construction already
    /// validated every entity.
    pub fn entity(&self, entity: Entity) -> &EntityMap {
        &self.entities[entity as usize]
    }

    /// Resolved mapping for an entity named by its configuration key.
    pub fn resolve(&self, key: &str) -> Result<&EntityMap, CartError> {
        Entity::from_key(key)
            .map(|entity| self.entity(entity))
            .ok_or_else(|| CartError::Config(format!("unknown entity `{key}`")))
    }

    fn build_entity(entity: Entity, config: &SchemaConfig) -> Result<EntityMap, CartError> {
        let key = entity.key();
        let entry = config
            .entities
            .get(key)
            .ok_or_else(|| CartError::Config(format!("missing entity `{key}`")))?;
        let table = entry
            .table
            .clone()
            .ok_or_else(|| CartError::Config(format!("missing table name for `{key}`")))?;
        for required in entity.required_columns() {
            if !entry.columns.contains_key(*required) {
                return Err(CartError::Config(format!(
                    "missing column mapping `{required}` for `{key}`"
                )));
            }
        }
        let columns = entry.columns.clone();
        let reverse = columns
            .iter()
            .map(|(logical, physical)| (physical.clone(), logical.clone()))
            .collect();
        Ok(EntityMap { table, columns, reverse })
    }
}
