//! Shared harness: in-memory SQLite with a renamed physical schema, plus
//! in-memory cookie and session doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};

use cartage::{
    CartRepository, CartStore, ClientPersistence, CookieStore, DbConfig, SchemaMap, SessionScope,
};

/// The physical schema is deliberately renamed everywhere the mapping layer
/// allows, so every query in the suite exercises the translation.
pub fn schema_doc() -> serde_json::Value {
    serde_json::json!({
        "carts": {
            "table": "shop_carts",
            "columns": { "name": "label" }
        },
        "cart_item": {
            "table": "shop_cart_items",
            "columns": { "product_property_id": "prop_id", "qnt": "quantity" }
        },
        "product_property": {
            "table": "product_props",
            "columns": {
                "code": "sku",
                "price": "unit_price",
                "discounted_price": "sale_price",
                "discount_until": "sale_until",
                "stock_count": "stock",
                "max_cart_count": "cart_cap",
                "is_available": "available"
            }
        }
    })
}

const DDL: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY)",
    "CREATE TABLE brands (id INTEGER PRIMARY KEY, publish INTEGER NOT NULL)",
    "CREATE TABLE products (id INTEGER PRIMARY KEY)",
    "CREATE TABLE product_props (
        id INTEGER PRIMARY KEY,
        product_id INTEGER NOT NULL,
        brand_id INTEGER NOT NULL,
        sku TEXT NOT NULL,
        unit_price REAL NOT NULL,
        sale_price REAL NOT NULL,
        sale_until INTEGER,
        tax_rate REAL NOT NULL,
        stock INTEGER NOT NULL,
        cart_cap INTEGER NOT NULL,
        available INTEGER NOT NULL
    )",
    "CREATE TABLE shop_carts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        expire_at INTEGER NOT NULL,
        note TEXT
    )",
    "CREATE TABLE shop_cart_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cart_id INTEGER NOT NULL,
        prop_id INTEGER NOT NULL,
        quantity INTEGER NOT NULL
    )",
];

const SEED: &[&str] = &[
    "INSERT INTO users (id) VALUES (7), (42)",
    "INSERT INTO brands (id, publish) VALUES (1, 1), (2, 0)",
    "INSERT INTO products (id) VALUES (1), (2), (3), (4)",
    // available, published
    "INSERT INTO product_props VALUES (1, 1, 1, 'TEA-001', 10.0, 8.0, NULL, 10.0, 5, 3, 1)",
    "INSERT INTO product_props VALUES (2, 2, 1, 'MUG-002', 5.0, 5.0, NULL, 10.0, 10, 10, 1)",
    // flagged unavailable
    "INSERT INTO product_props VALUES (3, 3, 1, 'GONE-003', 4.0, 4.0, NULL, 0.0, 5, 5, 0)",
    // brand unpublished
    "INSERT INTO product_props VALUES (4, 4, 2, 'HIDDEN-004', 6.0, 6.0, NULL, 0.0, 5, 5, 1)",
];

#[derive(Default)]
pub struct MemoryCookies {
    jar: Mutex<HashMap<String, String>>,
}

impl MemoryCookies {
    pub fn keys(&self) -> Vec<String> {
        self.jar.lock().unwrap().keys().cloned().collect()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.jar.lock().unwrap().insert(key.to_string(), value.to_string());
    }
}

impl CookieStore for MemoryCookies {
    fn set(&self, key: &str, value: &str, _expires_at: DateTime<Utc>, _path: &str, _http_only: bool) {
        self.jar.lock().unwrap().insert(key.to_string(), value.to_string());
    }

    fn get(&self, key: &str) -> Option<String> {
        self.jar.lock().unwrap().get(key).cloned()
    }

    fn remove(&self, key: &str) {
        self.jar.lock().unwrap().remove(key);
    }
}

#[derive(Default)]
pub struct MemorySession {
    scope: Mutex<HashMap<String, serde_json::Value>>,
}

impl SessionScope for MemorySession {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.scope.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) {
        self.scope.lock().unwrap().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.scope.lock().unwrap().remove(key);
    }
}

pub struct TestHarness {
    pub db: Arc<DatabaseConnection>,
    pub repo: Arc<CartRepository>,
    pub cookies: Arc<MemoryCookies>,
    pub session: Arc<MemorySession>,
}

impl TestHarness {
    pub async fn new() -> Self {
        // a single connection keeps every statement on the same in-memory db
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let db = Arc::new(cartage::connect_with(&config).await.unwrap());
        for ddl in DDL.iter().chain(SEED) {
            db.execute(Statement::from_string(DbBackend::Sqlite, (*ddl).to_string()))
                .await
                .unwrap();
        }

        let schema = SchemaMap::from_value(schema_doc(), true).unwrap();
        let repo = Arc::new(CartRepository::new(db.clone(), Arc::new(schema)));
        Self {
            db,
            repo,
            cookies: Arc::new(MemoryCookies::default()),
            session: Arc::new(MemorySession::default()),
        }
    }

    pub fn client(&self) -> ClientPersistence {
        ClientPersistence::new(self.cookies.clone(), self.session.clone())
    }

    pub fn cart(&self) -> CartStore {
        CartStore::new(self.repo.clone(), self.client())
    }

    pub async fn execute(&self, sql: &str) {
        self.db
            .execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
            .await
            .unwrap();
    }

    pub async fn scalar_i64(&self, sql: &str) -> i64 {
        let row = self
            .db
            .query_one(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
            .await
            .unwrap()
            .unwrap();
        row.try_get_by::<i64, _>(0).unwrap()
    }
}
