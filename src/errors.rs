use sea_orm::DbErr;
use thiserror::Error;

/// Error taxonomy for the cart subsystem.
///
/// Unknown or unavailable catalog codes are deliberately *not* errors: lookups
/// return an empty record and cart mutations treat that as "nothing to add".
#[derive(Debug, Error)]
pub enum CartError {
    /// The schema configuration document is missing a required entity or
    /// column, or has the wrong shape. Raised at construction time only;
    /// a built [`SchemaMap`](crate::schema::SchemaMap) can be trusted.
    #[error("schema configuration error: {0}")]
    Config(String),

    /// Execution failure from the relational driver. Always propagated,
    /// never swallowed.
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    /// The owner already holds the maximum number of non-expired carts and
    /// a new one was about to be inserted.
    #[error("cart limit of {0} reached for owner")]
    CartLimitExceeded(u64),

    /// A `get` on a code that is still absent after the implicit add.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// A client-tier payload could not be encoded.
    #[error("client payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}
