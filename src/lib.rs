//! Shopping-cart line-item state over a configurable relational schema.
//!
//! The crate keeps one named cart per owner in memory ([`CartStore`]),
//! prices it ([`pricing`]), and persists it two ways: client-side through
//! injected cookie/session backends ([`ClientPersistence`]) and
//! relationally through dynamically built statements ([`CartRepository`]).
//! Physical table and column names come from a [`SchemaMap`] document, so
//! the crate drops onto an existing commerce schema without migrations.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cart;
pub mod client_store;
pub mod db;
pub mod errors;
pub mod item;
pub mod pricing;
pub mod repository;
pub mod schema;

pub use cart::{CartStore, CatalogSource, DEFAULT_CART_NAME, DEFAULT_EXPIRATION_SECS};
pub use client_store::{ClientPersistence, CookieStore, SessionScope, DEFAULT_SESSION_KEY};
pub use db::{connect, connect_with, DbConfig, QueryGateway, Row};
pub use errors::CartError;
pub use item::{ItemRecord, LineItem};
pub use repository::CartRepository;
pub use schema::{Entity, EntityConfig, EntityMap, SchemaConfig, SchemaMap};
