//! Lightweight durable document store for Dingo.
//!
//! Named collections of key → JSON documents, held in memory and written
//! through to a single JSON file on every mutation. Intended for small
//! amounts of application state with a single writing process.
//!
//! The file is one JSON object mapping collection name to an object of
//! key → document. There is no schema versioning.

mod config;
mod error;
mod store;

pub use config::StoreConfig;
pub use error::StoreError;
pub use store::{
    ANALYTICS, CAMPAIGNS, CONTENT, Collection, DocumentStore, SYSTEM, USERS,
    WELL_KNOWN_COLLECTIONS,
};
