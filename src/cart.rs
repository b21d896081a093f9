//! The in-memory, request-scoped cart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::client_store::ClientPersistence;
use crate::errors::CartError;
use crate::item::{coerce_quantity, deep_merge, ItemRecord, LineItem};
use crate::pricing;

/// Cart name used when the caller never sets one.
pub const DEFAULT_CART_NAME: &str = "default";
/// Default client-storage lifetime: one year.
pub const DEFAULT_EXPIRATION_SECS: i64 = 31_536_000;

/// Resolves a product code to its current purchasable attributes.
///
/// An empty record means "not purchasable right now" (unknown code,
/// out-of-catalog, unpublished brand, …) and is not a failure.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn lookup_item(
        &self,
        code: &str,
        columns: Option<&[String]>,
    ) -> Result<ItemRecord, CartError>;
}

/// The authoritative in-memory item set for one named cart.
///
/// A `CartStore` lives for one logical request or session and is mutated
/// sequentially; it carries no locking. Relational persistence pushes and
/// pulls its state explicitly, client persistence is reached through
/// [`store`](CartStore::store) / [`restore`](CartStore::restore) /
/// [`destroy`](CartStore::destroy).
pub struct CartStore {
    name: String,
    owner_id: Option<i64>,
    expiration_secs: i64,
    items: HashMap<String, LineItem>,
    catalog: Arc<dyn CatalogSource>,
    client: ClientPersistence,
}

impl CartStore {
    pub fn new(catalog: Arc<dyn CatalogSource>, client: ClientPersistence) -> Self {
        Self {
            name: DEFAULT_CART_NAME.to_string(),
            owner_id: None,
            expiration_secs: DEFAULT_EXPIRATION_SECS,
            items: HashMap::new(),
            catalog,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the cart instance; an empty name is ignored.
    pub fn set_name(&mut self, name: &str) -> &mut Self {
        if !name.is_empty() {
            self.name = name.to_string();
        }
        self
    }

    /// `None` is an anonymous visitor.
    pub fn owner_id(&self) -> Option<i64> {
        self.owner_id
    }

    pub fn set_owner(&mut self, owner_id: Option<i64>) -> &mut Self {
        self.owner_id = owner_id;
        self
    }

    /// Client-storage lifetime in seconds.
    pub fn expiration(&self) -> i64 {
        self.expiration_secs
    }

    /// A non-positive lifetime is ignored.
    pub fn set_expiration(&mut self, seconds: i64) -> &mut Self {
        if seconds > 0 {
            self.expiration_secs = seconds;
        }
        self
    }

    pub fn items(&self) -> &HashMap<String, LineItem> {
        &self.items
    }

    pub fn has_item(&self, code: &str) -> bool {
        self.items.contains_key(code)
    }

    pub fn clear(&mut self) -> &mut Self {
        self.items.clear();
        self
    }

    pub(crate) fn insert_raw(&mut self, code: String, item: LineItem) {
        self.items.insert(code, item);
    }

    /// Adds `code` to the cart from a fresh catalog lookup, merged with the
    /// caller's overrides. Catalog fields win on conflicts; the caller's
    /// quantity (normalized against stock and cart ceilings) and extra keys
    /// are preserved. A code the catalog does not currently offer is a
    /// silent no-op; a normalized quantity of zero or less removes the code.
    pub async fn add(&mut self, code: &str, overrides: Option<ItemRecord>) -> Result<(), CartError> {
        let fetched = self.catalog.lookup_item(code, None).await?;
        if fetched.is_empty() {
            debug!(%code, "item not purchasable, nothing to add");
            return Ok(());
        }
        self.upsert(code, fetched, overrides);
        Ok(())
    }

    /// Same merge path as [`add`](CartStore::add), but starting from the
    /// cart's current record for `code` (auto-adding it first if absent)
    /// instead of a fresh catalog fetch.
    pub async fn update(&mut self, code: &str, overrides: ItemRecord) -> Result<(), CartError> {
        let current = self.get(code).await?.to_record();
        self.upsert(code, current, Some(overrides));
        Ok(())
    }

    /// Unconditional removal; reports whether the code was present.
    pub fn remove(&mut self, code: &str) -> bool {
        self.items.remove(code).is_some()
    }

    /// Returns the stored item, auto-adding it first when absent. Still
    /// absent after the implicit add (unknown or unpurchasable code) is
    /// [`CartError::ItemNotFound`].
    pub async fn get(&mut self, code: &str) -> Result<&LineItem, CartError> {
        if !self.items.contains_key(code) {
            self.add(code, None).await?;
        }
        self.items
            .get(code)
            .ok_or_else(|| CartError::ItemNotFound(code.to_string()))
    }

    fn upsert(&mut self, code: &str, mut catalog: ItemRecord, overrides: Option<ItemRecord>) {
        let mut info = overrides.unwrap_or_default();
        let quantity = normalize_quantity(&catalog, &info);
        if quantity <= 0 {
            self.items.remove(code);
            return;
        }
        info.insert("qnt".to_string(), quantity.into());
        catalog.insert("qnt".to_string(), quantity.into());

        let mut merged = info;
        deep_merge(&mut merged, &catalog);
        match LineItem::from_record(merged) {
            Ok(item) => {
                self.items.insert(code.to_string(), item);
            }
            Err(err) => {
                warn!(%code, error = %err, "discarding malformed item record");
                self.items.remove(code);
            }
        }
    }

    // ---- client persistence ------------------------------------------------

    /// Persists the item map to the client tiers (cookie and session).
    pub fn store(&self) -> Result<(), CartError> {
        let client = self.client.clone();
        client.save(self)
    }

    /// Repopulates the cart from the client tiers; see
    /// [`ClientPersistence::restore`] for the session/cookie precedence and
    /// the meaning of `validate`.
    pub async fn restore(&mut self, validate: bool) -> Result<(), CartError> {
        let client = self.client.clone();
        client.restore(self, validate).await
    }

    /// Drops the client copies and clears the in-memory items.
    pub fn destroy(&mut self) {
        let client = self.client.clone();
        client.destroy(self);
    }

    // ---- totals ------------------------------------------------------------

    pub fn total_price(&self) -> Decimal {
        pricing::total(self.items.values(), pricing::PRICE, false, Utc::now())
    }

    pub fn total_price_with_tax(&self) -> Decimal {
        pricing::total(self.items.values(), pricing::PRICE, true, Utc::now())
    }

    pub fn total_discounted_price(&self) -> Decimal {
        pricing::total(self.items.values(), pricing::DISCOUNTED_PRICE, false, Utc::now())
    }

    pub fn total_discounted_price_with_tax(&self) -> Decimal {
        pricing::total(self.items.values(), pricing::DISCOUNTED_PRICE, true, Utc::now())
    }

    /// Sum of `quantity * attribute` for an arbitrary item attribute; an
    /// empty key yields zero.
    pub fn total_attribute(&self, key: &str) -> Decimal {
        if key.is_empty() {
            return Decimal::ZERO;
        }
        pricing::total(self.items.values(), key, false, Utc::now())
    }

    /// Discount percentage of one stored item; zero when the code is absent
    /// or its price is numerically zero.
    pub fn discounted_percentage(&self, code: &str, decimals: u32, round: bool) -> Decimal {
        match self.items.get(code) {
            Some(item) => pricing::discounted_percentage(item, decimals, round, Utc::now()),
            None => Decimal::ZERO,
        }
    }

    /// Aggregate discount percentage computed from the price totals, not an
    /// average of per-item percentages.
    pub fn total_discounted_percentage(&self, decimals: u32, round: bool) -> Decimal {
        pricing::percentage(self.total_price(), self.total_discounted_price(), decimals, round)
    }

    pub fn total_discounted_percentage_with_tax(&self, decimals: u32, round: bool) -> Decimal {
        pricing::percentage(
            self.total_price_with_tax(),
            self.total_discounted_price_with_tax(),
            decimals,
            round,
        )
    }
}

/// Quantity normalization: absent means 1; anything else is coerced to an
/// integer and, when it exceeds the stock or the per-cart ceiling, clamped
/// to the smaller of the violated limits.
fn normalize_quantity(catalog: &ItemRecord, info: &ItemRecord) -> i64 {
    let Some(mut quantity) = coerce_quantity(info.get("qnt")) else {
        return 1;
    };
    let stock = coerce_quantity(catalog.get("stock_count")).unwrap_or(0);
    let cap = coerce_quantity(catalog.get("max_cart_count")).unwrap_or(0);
    if quantity > stock || quantity > cap {
        quantity = quantity.min(cap).min(stock);
    }
    quantity
}
