//! Keeps a copy of the latest status on `orders.status`.
//!
//! [`DenormalizeOrderStatus`] overwrites the column every time a status event
//! is inserted through [`super::OrderService`]. There is no conflict
//! resolution: concurrent appends for one order leave whichever write
//! committed last. Rows written before the receiver was connected, or by bulk
//! inserts, are fixed with [`backfill_order_status`].

use async_trait::async_trait;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbBackend, EntityTrait,
    QueryFilter, Statement,
};
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::{
    entities::{order, order_status},
    errors::ServiceError,
    events::StatusReceiver,
    queries::latest_status::LATEST_STATUS_SUBQUERY,
};

pub const RECEIVER_NAME: &str = "denormalize_order_status";

#[derive(Debug, Clone, Copy, Default)]
pub struct DenormalizeOrderStatus;

#[async_trait]
impl StatusReceiver for DenormalizeOrderStatus {
    fn name(&self) -> &'static str {
        RECEIVER_NAME
    }

    async fn on_status_created(
        &self,
        txn: &DatabaseTransaction,
        event: &order_status::Model,
    ) -> Result<(), ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(event.status))
            .filter(order::Column::Id.eq(event.order_id))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                event.order_id
            )));
        }

        debug!(
            "Denormalized status of order {} set to '{}'",
            event.order_id, event.status
        );
        Ok(())
    }
}

/// Writes every order's latest status onto `orders.status` with one
/// correlated UPDATE. Orders without events get NULL. Returns rows touched.
#[instrument(skip(db))]
pub async fn backfill_order_status<C>(db: &C) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let start = Instant::now();
    let sql = format!(
        r#"UPDATE "orders" SET "status" = (
    {latest}
)"#,
        latest = LATEST_STATUS_SUBQUERY
    );

    let result = db
        .execute(Statement::from_string(db.get_database_backend(), sql))
        .await?;

    info!(
        "Backfilled denormalized status on {} orders in {:?}",
        result.rows_affected(),
        start.elapsed()
    );
    Ok(result.rows_affected())
}

/// Number of orders whose stored status differs from their latest event
/// (NULL-safe on both sides).
#[instrument(skip(db))]
pub async fn count_drift<C>(db: &C) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let backend = db.get_database_backend();
    let distinct_from = match backend {
        DbBackend::Sqlite => "IS NOT",
        _ => "IS DISTINCT FROM",
    };
    let sql = format!(
        r#"SELECT COUNT(*) AS "drift"
FROM "orders"
WHERE "orders"."status" {distinct_from} (
    {latest}
)"#,
        distinct_from = distinct_from,
        latest = LATEST_STATUS_SUBQUERY
    );

    let row = db
        .query_one(Statement::from_string(backend, sql))
        .await?
        .ok_or_else(|| ServiceError::InternalError("COUNT(*) returned no row".to_string()))?;
    let drift: i64 = row.try_get("", "drift")?;
    Ok(drift as u64)
}
