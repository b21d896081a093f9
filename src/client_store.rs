//! Client-side cart persistence over cookies and a session scope.
//!
//! Both backends are injected traits, so the crate never touches a real
//! HTTP layer. The session keeps the full item records; the cookie keeps a
//! slim `{ code: { "qnt": n } }` map that survives without a server-side
//! session and is re-validated against the catalog on restore.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cart::CartStore;
use crate::errors::CartError;
use crate::item::LineItem;

/// Session key under which all carts are filed.
pub const DEFAULT_SESSION_KEY: &str = "__cart_items__";

/// Cookie jar abstraction; implementations adapt whatever HTTP framework is
/// in front of the crate.
pub trait CookieStore: Send + Sync {
    fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
        path: &str,
        http_only: bool,
    );
    fn get(&self, key: &str) -> Option<String>;
    fn remove(&self, key: &str);
}

/// Server-side session scope keyed by string, holding JSON values.
pub trait SessionScope: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value);
    fn remove(&self, key: &str);
}

/// The two client tiers bundled together, plus the session key they share.
#[derive(Clone)]
pub struct ClientPersistence {
    cookies: std::sync::Arc<dyn CookieStore>,
    session: std::sync::Arc<dyn SessionScope>,
    session_key: String,
}

impl ClientPersistence {
    pub fn new(
        cookies: std::sync::Arc<dyn CookieStore>,
        session: std::sync::Arc<dyn SessionScope>,
    ) -> Self {
        Self::with_session_key(cookies, session, DEFAULT_SESSION_KEY)
    }

    pub fn with_session_key(
        cookies: std::sync::Arc<dyn CookieStore>,
        session: std::sync::Arc<dyn SessionScope>,
        session_key: &str,
    ) -> Self {
        Self {
            cookies,
            session,
            session_key: session_key.to_string(),
        }
    }

    /// Stable per-cart storage key, derived from the cart name and owner.
    /// Anonymous carts hash as owner zero.
    pub fn storage_key(cart_name: &str, owner_id: Option<i64>) -> String {
        let seed = format!("{}-{}", cart_name, owner_id.unwrap_or(0));
        hex::encode(Sha256::digest(seed.as_bytes()))
    }

    /// Writes both tiers: the slim quantity map to the cookie, the full item
    /// records to the session.
    pub fn save(&self, cart: &CartStore) -> Result<(), CartError> {
        let key = Self::storage_key(cart.name(), cart.owner_id());

        let mut slim = serde_json::Map::new();
        let mut full = serde_json::Map::new();
        for (code, item) in cart.items() {
            slim.insert(
                code.clone(),
                serde_json::json!({ "qnt": item.quantity }),
            );
            full.insert(code.clone(), serde_json::Value::Object(item.to_record()));
        }

        let payload = serde_json::to_string(&serde_json::Value::Object(slim))?;
        let expires_at = Utc::now() + Duration::seconds(cart.expiration());
        self.cookies.set(&key, &payload, expires_at, "/", true);

        let mut scope = self
            .session
            .get(&self.session_key)
            .and_then(|value| value.as_object().cloned())
            .unwrap_or_default();
        scope.insert(key, serde_json::Value::Object(full));
        self.session.set(&self.session_key, serde_json::Value::Object(scope));
        Ok(())
    }

    /// Repopulates `cart` from the client tiers. The session copy wins when
    /// present; otherwise the cookie's quantity map is replayed through the
    /// catalog. With `validate`, session records are also replayed through
    /// the catalog instead of being trusted as stored.
    pub async fn restore(&self, cart: &mut CartStore, validate: bool) -> Result<(), CartError> {
        let key = Self::storage_key(cart.name(), cart.owner_id());

        let session_items = self
            .session
            .get(&self.session_key)
            .and_then(|scope| scope.get(&key).cloned());
        if let Some(serde_json::Value::Object(records)) = session_items {
            if !records.is_empty() {
                if validate {
                    for (code, record) in records {
                        let overrides = record.as_object().cloned();
                        cart.add(&code, overrides).await?;
                    }
                } else {
                    cart.clear();
                    for (code, record) in records {
                        let Some(record) = record.as_object().cloned() else {
                            continue;
                        };
                        match LineItem::from_record(record) {
                            Ok(item) => cart.insert_raw(code, item),
                            Err(err) => {
                                warn!(%code, error = %err, "skipping malformed session item");
                            }
                        }
                    }
                }
                return Ok(());
            }
        }

        let Some(raw) = self.cookies.get(&key) else {
            debug!(cart = cart.name(), "no client copy to restore");
            return Ok(());
        };
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Object(slim)) => {
                for (code, overrides) in slim {
                    cart.add(&code, overrides.as_object().cloned()).await?;
                }
            }
            _ => {
                warn!(cart = cart.name(), "discarding unreadable cart cookie");
                self.cookies.remove(&key);
            }
        }
        Ok(())
    }

    /// Removes both client copies and clears the in-memory items.
    pub fn destroy(&self, cart: &mut CartStore) {
        let key = Self::storage_key(cart.name(), cart.owner_id());
        self.cookies.remove(&key);
        if let Some(mut scope) = self
            .session
            .get(&self.session_key)
            .and_then(|value| value.as_object().cloned())
        {
            scope.remove(&key);
            self.session.set(&self.session_key, serde_json::Value::Object(scope));
        }
        cart.clear();
    }
}
