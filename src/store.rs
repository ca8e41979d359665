//! Order persistence.
//!
//! Two backends share the [`OrderStore`] contract: a process-memory map, and a JSON file
//! holding `{ "orders": { "<orderCode>": Order } }` that is rewritten wholesale on every
//! mutation. Lookups are full scans; a single shop never holds many orders.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::StoreError;
use crate::order::{Order, OrderStatus};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order; fails with [`StoreError::DuplicateCode`] if the code is taken.
    async fn create(&self, order: &Order) -> StoreResult<()>;

    async fn get(&self, order_code: &str) -> StoreResult<Option<Order>>;

    /// Most recently created order of a buyer, optionally restricted to one status.
    async fn find_latest_by_buyer(
        &self,
        buyer_id: i64,
        status: Option<OrderStatus>,
    ) -> StoreResult<Option<Order>>;

    /// Overwrites an existing order under its code.
    async fn update(&self, order: &Order) -> StoreResult<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    orders: HashMap<String, Order>,
}

impl StoreFile {
    fn latest_by_buyer(&self, buyer_id: i64, status: Option<OrderStatus>) -> Option<Order> {
        self.orders
            .values()
            .filter(|order| order.buyer_id == buyer_id)
            .filter(|order| status.map_or(true, |wanted| order.status == wanted))
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.order_code.cmp(&b.order_code))
            })
            .cloned()
    }

    fn insert_new(&mut self, order: &Order) -> StoreResult<()> {
        if self.orders.contains_key(&order.order_code) {
            return Err(StoreError::DuplicateCode(order.order_code.clone()));
        }
        self.orders.insert(order.order_code.clone(), order.clone());
        Ok(())
    }

    fn replace(&mut self, order: &Order) -> StoreResult<()> {
        match self.orders.get_mut(&order.order_code) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(order.order_code.clone())),
        }
    }
}

/// Keeps orders in process memory only; everything is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreFile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create(&self, order: &Order) -> StoreResult<()> {
        self.inner.write().await.insert_new(order)
    }

    async fn get(&self, order_code: &str) -> StoreResult<Option<Order>> {
        Ok(self.inner.read().await.orders.get(order_code).cloned())
    }

    async fn find_latest_by_buyer(
        &self,
        buyer_id: i64,
        status: Option<OrderStatus>,
    ) -> StoreResult<Option<Order>> {
        Ok(self.inner.read().await.latest_by_buyer(buyer_id, status))
    }

    async fn update(&self, order: &Order) -> StoreResult<()> {
        self.inner.write().await.replace(order)
    }
}

/// JSON file backend. The in-memory copy only changes after the file write succeeded.
pub struct JsonFileStore {
    path: PathBuf,
    inner: RwLock<StoreFile>,
}

impl JsonFileStore {
    /// Loads the store file, starting empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreFile>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => return Err(e.into()),
        };

        info!("Loaded {} order(s) from {}", state.orders.len(), path.display());

        Ok(Self {
            path,
            inner: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreFile) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for JsonFileStore {
    async fn create(&self, order: &Order) -> StoreResult<()> {
        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        next.insert_new(order)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }

    async fn get(&self, order_code: &str) -> StoreResult<Option<Order>> {
        Ok(self.inner.read().await.orders.get(order_code).cloned())
    }

    async fn find_latest_by_buyer(
        &self,
        buyer_id: i64,
        status: Option<OrderStatus>,
    ) -> StoreResult<Option<Order>> {
        Ok(self.inner.read().await.latest_by_buyer(buyer_id, status))
    }

    async fn update(&self, order: &Order) -> StoreResult<()> {
        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        next.replace(order)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }
}
