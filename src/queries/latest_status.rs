//! Alternative SQL shapes for "orders whose latest status event is X".
//!
//! All strategies select the same `orders` columns, so every result can be
//! loaded into [`order::Model`] and compared by id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    QueryTrait, Statement,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::Query;
use crate::{
    db::DatabaseAccess,
    entities::{order, order_status, Status},
    errors::ServiceError,
};

const ORDER_COLUMNS: &str = r#""orders"."id", "orders"."created_at", "orders"."status""#;

// Correlated on "orders"."id"; yields the newest event's status or NULL.
pub(crate) const LATEST_STATUS_SUBQUERY: &str = r#"SELECT "s"."status"
        FROM "order_statuses" AS "s"
        WHERE "s"."order_id" = "orders"."id"
        ORDER BY "s"."created_at" DESC
        LIMIT 1"#;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Strategy {
    /// Orders with *any* event in the target status
    ExistenceJoin,
    /// `ROW_NUMBER()` over each order's events, newest first, filtered to rank 1
    WindowRank,
    /// Newest event per order through `ORDER BY .. LIMIT 1`
    CorrelatedLimit,
    /// Reads the copy kept on `orders.status`
    Denormalized,
}

impl Strategy {
    /// The three shapes that read the event table
    pub fn event_strategies() -> Vec<Strategy> {
        Strategy::iter()
            .filter(|s| !s.requires_denormalized_column())
            .collect()
    }

    pub fn all() -> Vec<Strategy> {
        Strategy::iter().collect()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Strategy::ExistenceJoin => "inner join on any matching status event + DISTINCT",
            Strategy::WindowRank => "ROW_NUMBER() per order, newest first, rank = 1",
            Strategy::CorrelatedLimit => "correlated subquery ORDER BY created_at DESC LIMIT 1",
            Strategy::Denormalized => "filter on the denormalized orders.status column",
        }
    }

    /// Whether the result equals "effective status is `status`".
    ///
    /// The existence join answers "was ever in `status`", which only coincides
    /// when no event can follow `status`.
    pub fn is_exact_for(&self, status: Status) -> bool {
        match self {
            Strategy::ExistenceJoin => status.is_terminal(),
            Strategy::WindowRank | Strategy::CorrelatedLimit | Strategy::Denormalized => true,
        }
    }

    pub fn requires_denormalized_column(&self) -> bool {
        matches!(self, Strategy::Denormalized)
    }

    /// Builds the statement for `backend`.
    ///
    /// Status values are a closed set of fixed identifiers, so the raw shapes
    /// inline them as literals.
    pub fn statement(&self, backend: DbBackend, status: Status) -> Statement {
        match self {
            Strategy::ExistenceJoin => order::Entity::find()
                .inner_join(order_status::Entity)
                .filter(order_status::Column::Status.eq(status))
                .distinct()
                .build(backend),
            Strategy::Denormalized => order::Entity::find()
                .filter(order::Column::Status.eq(status))
                .build(backend),
            Strategy::WindowRank => Statement::from_string(
                backend,
                format!(
                    r#"SELECT {columns}
FROM "orders"
WHERE (
    SELECT "ranked"."status"
    FROM (
        SELECT "s"."status",
               ROW_NUMBER() OVER (
                   PARTITION BY "s"."order_id"
                   ORDER BY "s"."created_at" DESC
               ) AS "row_rank"
        FROM "order_statuses" AS "s"
        WHERE "s"."order_id" = "orders"."id"
    ) AS "ranked"
    WHERE "ranked"."row_rank" = 1
) = '{status}'"#,
                    columns = ORDER_COLUMNS,
                    status = status.as_str(),
                ),
            ),
            Strategy::CorrelatedLimit => Statement::from_string(
                backend,
                format!(
                    r#"SELECT {columns}
FROM "orders"
WHERE (
    {latest}
) = '{status}'"#,
                    columns = ORDER_COLUMNS,
                    latest = LATEST_STATUS_SUBQUERY,
                    status = status.as_str(),
                ),
            ),
        }
    }

    /// SQL text with parameters inlined, for display and `EXPLAIN`
    pub fn sql(&self, backend: DbBackend, status: Status) -> String {
        self.statement(backend, status).to_string()
    }
}

/// Orders selected by `strategy` for `status`
#[instrument(skip(db))]
pub async fn fetch<C>(
    db: &C,
    strategy: Strategy,
    status: Status,
) -> Result<Vec<order::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let stmt = strategy.statement(db.get_database_backend(), status);
    debug!("Executing {} strategy", strategy);
    order::Entity::find()
        .from_raw_sql(stmt)
        .all(db)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// Sorted ids of the orders selected by `strategy`
pub async fn fetch_ids<C>(db: &C, strategy: Strategy, status: Status) -> Result<Vec<Uuid>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut ids: Vec<Uuid> = fetch(db, strategy, status)
        .await?
        .into_iter()
        .map(|order| order.id)
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

/// Execution plan of a strategy, one line per plan node.
///
/// PostgreSQL runs `EXPLAIN ANALYZE` (the query executes); SQLite runs
/// `EXPLAIN QUERY PLAN`, indented by plan depth.
pub async fn explain<C>(db: &C, strategy: Strategy, status: Status) -> Result<Vec<String>, ServiceError>
where
    C: ConnectionTrait,
{
    let backend = db.get_database_backend();
    let sql = strategy.sql(backend, status);

    match backend {
        DbBackend::Postgres => {
            let rows = db
                .query_all(Statement::from_string(
                    backend,
                    format!("EXPLAIN (ANALYZE, BUFFERS) {}", sql),
                ))
                .await?;
            rows.iter()
                .map(|row| {
                    row.try_get::<String>("", "QUERY PLAN")
                        .map_err(ServiceError::DatabaseError)
                })
                .collect()
        }
        DbBackend::Sqlite => {
            let rows = db
                .query_all(Statement::from_string(
                    backend,
                    format!("EXPLAIN QUERY PLAN {}", sql),
                ))
                .await?;
            let mut depth: HashMap<i64, usize> = HashMap::new();
            let mut lines = Vec::with_capacity(rows.len());
            for row in rows {
                let id: i64 = row.try_get("", "id")?;
                let parent: i64 = row.try_get("", "parent")?;
                let detail: String = row.try_get("", "detail")?;
                let level = depth.get(&parent).map(|d| d + 1).unwrap_or(0);
                depth.insert(id, level);
                lines.push(format!("{}{}", "  ".repeat(level), detail));
            }
            Ok(lines)
        }
        DbBackend::MySql => Err(ServiceError::ValidationError(
            "execution plans are only captured on postgres and sqlite".to_string(),
        )),
    }
}

/// Struct to get the orders currently in a status via a chosen strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrdersInStatusQuery {
    pub strategy: Strategy,
    pub status: Status,
}

#[async_trait]
impl Query for OrdersInStatusQuery {
    type Result = Vec<order::Model>;

    #[instrument(skip(self, db), fields(strategy = %self.strategy, status = %self.status))]
    async fn execute(&self, db: &DatabaseAccess) -> Result<Self::Result, ServiceError> {
        let pool = db.get_pool();
        let stmt = self.strategy.statement(pool.get_database_backend(), self.status);
        db.execute(
            &format!("orders_in_status:{}", self.strategy),
            order::Entity::find().from_raw_sql(stmt).all(pool),
        )
        .await
    }
}

/// Per-order digest of the status history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub events: usize,
    pub first: Option<Status>,
    pub latest: Option<Status>,
    pub latest_at: Option<DateTime<Utc>>,
}

/// Effective status of every order, computed in memory from the raw events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveStatusQuery;

#[async_trait]
impl Query for EffectiveStatusQuery {
    type Result = BTreeMap<Uuid, HistorySummary>;

    #[instrument(skip(self, db))]
    async fn execute(&self, db: &DatabaseAccess) -> Result<Self::Result, ServiceError> {
        let pool = db.get_pool();

        let order_ids: Vec<Uuid> = db
            .execute(
                "effective_status:orders",
                order::Entity::find()
                    .select_only()
                    .column(order::Column::Id)
                    .into_tuple()
                    .all(pool),
            )
            .await?;

        let events = db
            .execute(
                "effective_status:events",
                order_status::Entity::find()
                    .order_by_asc(order_status::Column::OrderId)
                    .order_by_asc(order_status::Column::CreatedAt)
                    .all(pool),
            )
            .await?;

        let mut summaries: BTreeMap<Uuid, HistorySummary> = order_ids
            .into_iter()
            .map(|id| {
                (
                    id,
                    HistorySummary {
                        events: 0,
                        first: None,
                        latest: None,
                        latest_at: None,
                    },
                )
            })
            .collect();

        for event in events {
            let Some(summary) = summaries.get_mut(&event.order_id) else {
                continue;
            };
            summary.events += 1;
            if summary.first.is_none() {
                summary.first = Some(event.status);
            }
            if summary.latest_at.map_or(true, |at| event.created_at >= at) {
                summary.latest = Some(event.status);
                summary.latest_at = Some(event.created_at);
            }
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn strategy_names_round_trip() {
        for strategy in Strategy::all() {
            assert_eq!(Strategy::from_str(&strategy.to_string()).unwrap(), strategy);
        }
        assert_eq!(
            Strategy::from_str("correlated-limit").unwrap(),
            Strategy::CorrelatedLimit
        );
    }

    #[test]
    fn existence_join_is_exact_only_for_terminal_statuses() {
        assert!(Strategy::ExistenceJoin.is_exact_for(Status::Cancelled));
        assert!(!Strategy::ExistenceJoin.is_exact_for(Status::Complete));
        assert!(!Strategy::ExistenceJoin.is_exact_for(Status::Pending));
        assert!(Strategy::WindowRank.is_exact_for(Status::Pending));
        assert!(Strategy::CorrelatedLimit.is_exact_for(Status::Complete));
    }

    #[test]
    fn event_strategies_skip_the_denormalized_column() {
        let strategies = Strategy::event_strategies();
        assert_eq!(strategies.len(), 3);
        assert!(!strategies.contains(&Strategy::Denormalized));
    }

    #[test]
    fn existence_join_sql_uses_distinct_inner_join() {
        let sql = Strategy::ExistenceJoin.sql(DbBackend::Postgres, Status::Cancelled);
        assert!(sql.starts_with("SELECT DISTINCT"), "{}", sql);
        assert!(sql.contains(r#"INNER JOIN "order_statuses""#), "{}", sql);
        assert!(sql.contains("'cancelled'"), "{}", sql);
    }

    #[test]
    fn ranking_sql_partitions_by_order() {
        let sql = Strategy::WindowRank.sql(DbBackend::Sqlite, Status::Complete);
        assert!(sql.contains("ROW_NUMBER() OVER"));
        assert!(sql.contains(r#"PARTITION BY "s"."order_id""#));
        assert!(sql.ends_with("= 'complete'"));
    }

    #[test]
    fn correlated_sql_limits_to_one_row() {
        let sql = Strategy::CorrelatedLimit.sql(DbBackend::Postgres, Status::Cancelled);
        assert!(sql.contains(r#"ORDER BY "s"."created_at" DESC"#));
        assert!(sql.contains("LIMIT 1"));
    }

    #[test]
    fn denormalized_sql_filters_orders_only() {
        let sql = Strategy::Denormalized.sql(DbBackend::Postgres, Status::Pending);
        assert!(!sql.contains("order_statuses"));
        assert!(sql.contains(r#""orders"."status" = 'pending'"#), "{}", sql);
    }
}
