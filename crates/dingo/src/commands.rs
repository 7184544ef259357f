//! Operator access to the store file.
//!
//! These open the store with `strict_load` so an unreadable file is
//! reported instead of being replaced by an empty store on the next write.

use dingo_store::{DocumentStore, StoreConfig};
use miette::Result;
use serde_json::Value;

use crate::health::HealthReport;

async fn open(config: &StoreConfig) -> Result<DocumentStore> {
    let config = StoreConfig {
        strict_load: true,
        ..config.clone()
    };
    DocumentStore::open(&config)
        .await
        .map_err(|e| miette::miette!("failed to open document store: {}", e))
}

/// One document, or the whole collection when `key` is absent.
pub async fn get(config: &StoreConfig, collection: &str, key: Option<&str>) -> Result<Value> {
    let store = open(config).await?;
    Ok(store.get_data(collection, key).await)
}

/// Store a document given as JSON text.
pub async fn set(config: &StoreConfig, collection: &str, key: &str, raw: &str) -> Result<()> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| miette::miette!("value is not valid JSON: {}", e))?;

    let store = open(config).await?;
    store
        .set(collection, key, value)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    store.close().await.map_err(|e| miette::miette!("{}", e))
}

/// Delete one document, or clear the collection when `key` is absent.
pub async fn delete(config: &StoreConfig, collection: &str, key: Option<&str>) -> Result<()> {
    let store = open(config).await?;
    store
        .delete_data(collection, key)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    store.close().await.map_err(|e| miette::miette!("{}", e))
}

/// Run the store health probe once.
pub async fn health(config: &StoreConfig) -> Result<HealthReport> {
    let store = open(config).await?;
    let report = HealthReport::collect(&store, None).await;
    store.close().await.map_err(|e| miette::miette!("{}", e))?;
    Ok(report)
}
