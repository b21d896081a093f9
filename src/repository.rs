//! Relational cart persistence and catalog lookups.
//!
//! All statements are built against the logical schema and resolved to
//! physical identifiers through [`SchemaMap`]; nothing here names a table
//! or column directly. Save and fetch run inside a transaction and sweep
//! expired carts for the owner before touching anything else.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Alias, Asterisk, Condition, Expr, JoinType, Query};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{debug, info, instrument, warn};

use crate::cart::{CartStore, CatalogSource};
use crate::db::{bind_value, QueryGateway, Row};
use crate::errors::CartError;
use crate::item::{deep_merge, ItemRecord};
use crate::schema::{Entity, SchemaMap};

/// Fetch aliases carrying the typed line-item attributes.
const ITEM_ALIASES: [&str; 6] = [
    "qnt",
    "code",
    "stock_count",
    "max_cart_count",
    "price",
    "discounted_price",
];

/// Relational persistence for carts plus the catalog side of item lookups.
#[derive(Clone)]
pub struct CartRepository {
    db: Arc<DatabaseConnection>,
    schema: Arc<SchemaMap>,
    gateway: QueryGateway,
}

impl CartRepository {
    pub fn new(db: Arc<DatabaseConnection>, schema: Arc<SchemaMap>) -> Self {
        let gateway = QueryGateway::for_connection(&db);
        Self { db, schema, gateway }
    }

    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    /// Persists the cart's current items for `owner_id`, replacing whatever
    /// the database holds for this cart name.
    ///
    /// Anonymous carts are not persisted and report `false`. A cart that
    /// would exceed `max_carts` open carts for the owner fails with
    /// [`CartError::CartLimitExceeded`]. When any in-memory item no longer
    /// resolves to exactly its stored catalog attributes the whole save is
    /// rolled back and reports `false`, so the caller can refresh and retry.
    ///
    /// `extra_fields` are physical cart columns written alongside the
    /// defaults; `extra_where` narrows which cart row counts as "this cart".
    #[instrument(skip_all, fields(cart = cart.name()))]
    pub async fn save(
        &self,
        cart: &CartStore,
        owner_id: Option<i64>,
        max_carts: u64,
        extra_fields: Option<Row>,
        extra_where: Option<Condition>,
    ) -> Result<bool, CartError> {
        let Some(owner) = owner_id else {
            debug!("anonymous cart, skipping relational save");
            return Ok(false);
        };

        let carts = self.schema.entity(Entity::Carts);
        let items = self.schema.entity(Entity::CartItem);
        let name_col = carts.physical("name")?.to_string();
        let user_col = carts.physical("user_id")?.to_string();
        let created_col = carts.physical("created_at")?.to_string();
        let expire_col = carts.physical("expire_at")?.to_string();
        let id_col = carts.physical("id")?.to_string();

        let base_selector = Condition::all()
            .add(Expr::col(Alias::new(&name_col)).eq(cart.name()))
            .add(Expr::col(Alias::new(&user_col)).eq(owner));
        let mut selector = base_selector.clone();
        if let Some(extra) = extra_where {
            selector = selector.add(extra);
        }

        let extras: Vec<(String, sea_orm::Value)> = extra_fields
            .unwrap_or_default()
            .iter()
            .filter(|(column, _)| {
                column.as_str() != name_col && column.as_str() != user_col && column.as_str() != created_col
            })
            .filter_map(|(column, value)| bind_value(value).map(|v| (column.clone(), v)))
            .collect();

        let txn = self.db.begin().await?;
        self.sweep_expired(&txn, owner).await?;

        let existing = self
            .gateway
            .count(&txn, carts.table(), selector.clone())
            .await?;
        if existing > 0 {
            if !extras.is_empty() {
                self.gateway
                    .update(&txn, carts.table(), extras, selector.clone())
                    .await?;
            }
        } else {
            let open_carts = self
                .gateway
                .count(
                    &txn,
                    carts.table(),
                    Condition::all().add(Expr::col(Alias::new(&user_col)).eq(owner)),
                )
                .await?;
            if open_carts as u64 >= max_carts {
                return Err(CartError::CartLimitExceeded(max_carts));
            }

            let now = Utc::now().timestamp();
            let mut fields: Vec<(String, sea_orm::Value)> = vec![
                (name_col.clone(), cart.name().into()),
                (user_col.clone(), owner.into()),
                (created_col.clone(), now.into()),
                (expire_col.clone(), (now + cart.expiration()).into()),
            ];
            fields.extend(extras);
            self.gateway.insert(&txn, carts.table(), fields).await?;
        }

        // updated extras may have changed columns the narrowed predicate
        // names, so the id lookup goes by name and owner alone
        let rows = self
            .gateway
            .select(&txn, carts.table(), base_selector, &[id_col.as_str()])
            .await?;
        let Some(cart_id) = rows.first().and_then(|row| row.get(&id_col)).and_then(|v| v.as_i64())
        else {
            txn.rollback().await?;
            return Ok(false);
        };

        let cart_id_col = items.physical("cart_id")?.to_string();
        self.gateway
            .delete(
                &txn,
                items.table(),
                Condition::all().add(Expr::col(Alias::new(&cart_id_col)).eq(cart_id)),
            )
            .await?;

        let prop_id_col = items.physical("product_property_id")?.to_string();
        let qnt_col = items.physical("qnt")?.to_string();
        for (code, item) in cart.items() {
            let Some(prop_id) = self.resolve_property_id(&txn, &item.to_record()).await? else {
                debug!(%code, "stored item no longer matches the catalog, aborting save");
                txn.rollback().await?;
                return Ok(false);
            };
            self.gateway
                .insert(
                    &txn,
                    items.table(),
                    vec![
                        (cart_id_col.clone(), cart_id.into()),
                        (prop_id_col.clone(), prop_id.into()),
                        (qnt_col.clone(), item.quantity.into()),
                    ],
                )
                .await?;
        }

        txn.commit().await?;
        info!(cart = cart.name(), owner, items = cart.items().len(), "cart saved");
        Ok(true)
    }

    /// Loads the stored cart for `owner_id` into `cart`, re-validating every
    /// item against the live catalog on the way in. With `append`, fetched
    /// records are merged over items already in memory (fetched attributes
    /// win); otherwise the in-memory items are replaced. Anonymous owners
    /// are a no-op.
    #[instrument(skip_all, fields(cart = cart.name()))]
    pub async fn fetch(
        &self,
        cart: &mut CartStore,
        owner_id: Option<i64>,
        append: bool,
    ) -> Result<(), CartError> {
        let Some(owner) = owner_id else {
            debug!("anonymous cart, nothing to fetch");
            return Ok(());
        };

        let carts = self.schema.entity(Entity::Carts);
        let items = self.schema.entity(Entity::CartItem);
        let props = self.schema.entity(Entity::ProductProperty);

        let ci = Alias::new("ci");
        let c = Alias::new("c");
        let pp = Alias::new("pp");

        let mut query = Query::select();
        query
            .expr_as(
                Expr::col((ci.clone(), Alias::new(items.physical("qnt")?))),
                Alias::new("qnt"),
            )
            .expr_as(
                Expr::col((pp.clone(), Alias::new(props.physical("code")?))),
                Alias::new("code"),
            )
            .expr_as(
                Expr::col((pp.clone(), Alias::new(props.physical("stock_count")?))),
                Alias::new("stock_count"),
            )
            .expr_as(
                Expr::col((pp.clone(), Alias::new(props.physical("max_cart_count")?))),
                Alias::new("max_cart_count"),
            )
            .expr_as(
                Expr::col((pp.clone(), Alias::new(props.physical("price")?))),
                Alias::new("price"),
            )
            .expr_as(
                Expr::col((pp.clone(), Alias::new(props.physical("discounted_price")?))),
                Alias::new("discounted_price"),
            )
            .column((pp.clone(), Asterisk))
            .from_as(Alias::new(items.table()), ci.clone())
            .join_as(
                JoinType::InnerJoin,
                Alias::new(carts.table()),
                c.clone(),
                Expr::col((ci.clone(), Alias::new(items.physical("cart_id")?)))
                    .equals((c.clone(), Alias::new(carts.physical("id")?))),
            )
            .join_as(
                JoinType::InnerJoin,
                Alias::new(props.table()),
                pp.clone(),
                Expr::col((ci.clone(), Alias::new(items.physical("product_property_id")?)))
                    .equals((pp.clone(), Alias::new(props.physical("id")?))),
            )
            .and_where(Expr::col((c.clone(), Alias::new(carts.physical("name")?))).eq(cart.name()))
            .and_where(Expr::col((c, Alias::new(carts.physical("user_id")?))).eq(owner));

        let txn = self.db.begin().await?;
        self.sweep_expired(&txn, owner).await?;
        let rows = self.gateway.fetch_all(&txn, &query).await?;
        // item re-validation below goes through the pool, so release it now
        txn.commit().await?;

        if !append {
            cart.clear();
        }
        for row in rows {
            let Some(code) = row.get("code").and_then(|v| v.as_str()).map(str::to_string) else {
                continue;
            };
            let mut record = ItemRecord::new();
            for (column, value) in &row {
                if ITEM_ALIASES.contains(&column.as_str()) {
                    record.insert(column.clone(), value.clone());
                    continue;
                }
                match props.logical_for(column) {
                    Some("id") | None => {}
                    Some(logical) => {
                        if !record.contains_key(logical) {
                            record.insert(logical.to_string(), value.clone());
                        }
                    }
                }
            }
            let merged = match cart.items().get(&code) {
                Some(existing) if append => {
                    let mut base = existing.to_record();
                    deep_merge(&mut base, &record);
                    base
                }
                _ => record,
            };
            cart.add(&code, Some(merged)).await?;
        }
        Ok(())
    }

    /// Deletes the named cart and its item rows; reports whether a cart row
    /// existed. Anonymous owners report `false`.
    #[instrument(skip_all, fields(cart = cart_name))]
    pub async fn delete(&self, cart_name: &str, owner_id: Option<i64>) -> Result<bool, CartError> {
        let Some(owner) = owner_id else {
            return Ok(false);
        };
        let carts = self.schema.entity(Entity::Carts);
        let items = self.schema.entity(Entity::CartItem);
        let id_col = carts.physical("id")?.to_string();
        let selector = Condition::all()
            .add(Expr::col(Alias::new(carts.physical("name")?)).eq(cart_name))
            .add(Expr::col(Alias::new(carts.physical("user_id")?)).eq(owner));

        let txn = self.db.begin().await?;
        let ids: Vec<i64> = self
            .gateway
            .select(&txn, carts.table(), selector.clone(), &[id_col.as_str()])
            .await?
            .iter()
            .filter_map(|row| row.get(&id_col).and_then(|v| v.as_i64()))
            .collect();
        if !ids.is_empty() {
            self.gateway
                .delete(
                    &txn,
                    items.table(),
                    Condition::all()
                        .add(Expr::col(Alias::new(items.physical("cart_id")?)).is_in(ids)),
                )
                .await?;
        }
        let deleted = self.gateway.delete(&txn, carts.table(), selector).await?;
        txn.commit().await?;
        Ok(deleted)
    }

    /// Removes every expired cart row for the owner; reports whether any
    /// row went away.
    pub async fn delete_expired_carts(&self, owner_id: Option<i64>) -> Result<bool, CartError> {
        let Some(owner) = owner_id else {
            return Ok(false);
        };
        self.sweep_expired(self.db.as_ref(), owner).await
    }

    /// Renames a stored cart; an empty new name is rejected. Reports
    /// whether a row changed.
    pub async fn change_name(
        &self,
        owner_id: Option<i64>,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, CartError> {
        let Some(owner) = owner_id else {
            return Ok(false);
        };
        if new_name.is_empty() {
            return Ok(false);
        }
        let carts = self.schema.entity(Entity::Carts);
        let name_col = carts.physical("name")?.to_string();
        self.gateway
            .update(
                self.db.as_ref(),
                carts.table(),
                vec![(name_col.clone(), new_name.into())],
                Condition::all()
                    .add(Expr::col(Alias::new(&name_col)).eq(old_name))
                    .add(Expr::col(Alias::new(carts.physical("user_id")?)).eq(owner)),
            )
            .await
    }

    /// Catalog lookup for one product code: the item must be available and
    /// its brand published. Returns the logical attribute record, empty when
    /// nothing purchasable matches. `columns` narrows the selected logical
    /// columns; `None` selects everything.
    #[instrument(skip_all, fields(%code))]
    pub async fn lookup_catalog_item(
        &self,
        code: &str,
        columns: Option<&[String]>,
    ) -> Result<ItemRecord, CartError> {
        let props = self.schema.entity(Entity::ProductProperty);
        let products = self.schema.entity(Entity::Products);
        let brands = self.schema.entity(Entity::Brands);

        let pp = Alias::new("pp");
        let p = Alias::new("p");
        let b = Alias::new("b");

        let mut query = Query::select();
        match columns {
            Some(wanted) if !wanted.is_empty() => {
                for logical in wanted {
                    query.column((pp.clone(), Alias::new(props.physical(logical)?)));
                }
            }
            _ => {
                query.column((pp.clone(), Asterisk));
            }
        }
        query
            .from_as(Alias::new(props.table()), pp.clone())
            .join_as(
                JoinType::InnerJoin,
                Alias::new(products.table()),
                p.clone(),
                Expr::col((pp.clone(), Alias::new(props.physical("product_id")?)))
                    .equals((p.clone(), Alias::new(products.physical("id")?))),
            )
            .join_as(
                JoinType::InnerJoin,
                Alias::new(brands.table()),
                b.clone(),
                Expr::col((pp.clone(), Alias::new(props.physical("brand_id")?)))
                    .equals((b.clone(), Alias::new(brands.physical("id")?))),
            )
            .and_where(Expr::col((pp.clone(), Alias::new(props.physical("code")?))).eq(code))
            .and_where(Expr::col((pp, Alias::new(props.physical("is_available")?))).eq(1))
            .and_where(Expr::col((b, Alias::new(brands.physical("publish")?))).eq(1));

        let rows = self.gateway.fetch_all(self.db.as_ref(), &query).await?;
        let Some(row) = rows.into_iter().next() else {
            debug!("no purchasable catalog row");
            return Ok(ItemRecord::new());
        };

        let mut record = ItemRecord::new();
        for (column, value) in row {
            match props.logical_for(&column) {
                Some("id") => {}
                Some(logical) => {
                    record.insert(logical.to_string(), value);
                }
                None => {
                    record.insert(column, value);
                }
            }
        }
        Ok(record)
    }

    /// Current stock for a purchasable product code, zero when the code is
    /// unknown, unavailable, or its brand is unpublished.
    pub async fn stock_count(&self, code: &str) -> Result<i64, CartError> {
        self.catalog_limit(code, "stock_count").await
    }

    /// Per-cart quantity ceiling for a purchasable product code, zero when
    /// the code is unknown, unavailable, or its brand is unpublished.
    pub async fn max_cart_count(&self, code: &str) -> Result<i64, CartError> {
        self.catalog_limit(code, "max_cart_count").await
    }

    async fn catalog_limit(&self, code: &str, logical: &str) -> Result<i64, CartError> {
        let record = self
            .lookup_catalog_item(code, Some(&[logical.to_string()]))
            .await?;
        Ok(record.get(logical).and_then(|v| v.as_i64()).unwrap_or(0))
    }

    /// Finds the product-property row matching every mapped attribute the
    /// record carries. Used by save to refuse carts whose cached attributes
    /// drifted from the catalog.
    async fn resolve_property_id<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        record: &ItemRecord,
    ) -> Result<Option<i64>, CartError> {
        let props = self.schema.entity(Entity::ProductProperty);
        let id_col = props.physical("id")?.to_string();
        let mut matcher = Condition::all();
        for (logical, physical) in props.columns() {
            if logical == "id" {
                continue;
            }
            let Some(value) = record.get(logical) else {
                continue;
            };
            let Some(bound) = bind_value(value) else {
                continue;
            };
            matcher = matcher.add(Expr::col(Alias::new(physical)).eq(bound));
        }
        let rows = self
            .gateway
            .select(conn, props.table(), matcher, &[id_col.as_str()])
            .await?;
        if rows.len() > 1 {
            warn!("item record matches more than one catalog row");
        }
        Ok(rows.first().and_then(|row| row.get(&id_col)).and_then(|v| v.as_i64()))
    }

    async fn sweep_expired<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        owner: i64,
    ) -> Result<bool, CartError> {
        let carts = self.schema.entity(Entity::Carts);
        let items = self.schema.entity(Entity::CartItem);
        let id_col = carts.physical("id")?.to_string();
        let selector = Condition::all()
            .add(Expr::col(Alias::new(carts.physical("user_id")?)).eq(owner))
            .add(
                Expr::col(Alias::new(carts.physical("expire_at")?)).lt(Utc::now().timestamp()),
            );

        let ids: Vec<i64> = self
            .gateway
            .select(conn, carts.table(), selector.clone(), &[id_col.as_str()])
            .await?
            .iter()
            .filter_map(|row| row.get(&id_col).and_then(|v| v.as_i64()))
            .collect();
        if !ids.is_empty() {
            self.gateway
                .delete(
                    conn,
                    items.table(),
                    Condition::all()
                        .add(Expr::col(Alias::new(items.physical("cart_id")?)).is_in(ids)),
                )
                .await?;
        }
        self.gateway.delete(conn, carts.table(), selector).await
    }
}

#[async_trait]
impl CatalogSource for CartRepository {
    async fn lookup_item(
        &self,
        code: &str,
        columns: Option<&[String]>,
    ) -> Result<ItemRecord, CartError> {
        self.lookup_catalog_item(code, columns).await
    }
}
