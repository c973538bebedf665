use async_trait::async_trait;

use crate::{db::DatabaseAccess, errors::ServiceError};

pub mod latest_status;

pub use latest_status::{
    explain, fetch, fetch_ids, EffectiveStatusQuery, OrdersInStatusQuery, Strategy,
};

/// Trait representing a generic asynchronous query.
#[async_trait]
pub trait Query: Send + Sync {
    type Result: Send + Sync;

    /// Executes the query using the provided database connection
    async fn execute(&self, db: &DatabaseAccess) -> Result<Self::Result, ServiceError>;
}
