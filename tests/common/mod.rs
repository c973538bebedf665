#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use order_status_lab::{
    config::AppConfig,
    db::{self, DatabaseAccess, DbPool},
    entities::{order, order_status, OrderModel, Status},
    events::{self, StatusSignal},
    services::{DenormalizeOrderStatus, OrderService},
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use uuid::Uuid;

/// Helper harness backed by a fresh in-memory SQLite database.
pub struct TestDb {
    pub pool: Arc<DbPool>,
    pub service: OrderService,
    _event_task: tokio::task::JoinHandle<u64>,
}

impl TestDb {
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// Order service with the denormalization receiver connected
    pub async fn denormalized() -> Self {
        Self::build(true).await
    }

    async fn build(denormalize: bool) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.log_level = "warn".to_string();
        cfg.auto_migrate = true;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        let pool = Arc::new(pool);

        let (event_sender, event_rx) = events::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let mut signal = StatusSignal::new();
        if denormalize {
            signal.connect(Arc::new(DenormalizeOrderStatus));
        }
        let service = OrderService::new(pool.clone())
            .with_signal(signal)
            .with_event_sender(event_sender);

        Self {
            pool,
            service,
            _event_task: event_task,
        }
    }

    pub fn access(&self) -> DatabaseAccess {
        DatabaseAccess::new(self.pool.clone())
    }

    pub fn conn(&self) -> &DbPool {
        &self.pool
    }

    /// Creates an order through the service and appends `statuses[1..]`.
    pub async fn order_with_history(&self, statuses: &[Status]) -> OrderModel {
        assert_eq!(statuses.first(), Some(&Status::Pending));
        let order = self.service.create_order().await.expect("create order");
        for status in &statuses[1..] {
            self.service
                .append_status(order.id, *status)
                .await
                .expect("append status");
        }
        order
    }

    /// Inserts an order and its events directly, bypassing the service.
    ///
    /// Events get `base + i` microseconds; `reverse_insert` writes them newest
    /// first so physical order disagrees with timestamp order.
    pub async fn insert_raw_history(
        &self,
        statuses: &[Status],
        base: DateTime<Utc>,
        reverse_insert: bool,
    ) -> Uuid {
        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            created_at: Set(base),
            status: Set(None),
        }
        .insert(self.conn())
        .await
        .expect("insert order");

        let mut events: Vec<order_status::ActiveModel> = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| order_status::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                status: Set(*status),
                created_at: Set(base + Duration::microseconds(i as i64)),
            })
            .collect();
        if reverse_insert {
            events.reverse();
        }
        for event in events {
            event.insert(self.conn()).await.expect("insert status");
        }
        order_id
    }
}

/// Micro-second precision "now", as stored by every backend.
pub fn now() -> DateTime<Utc> {
    use chrono::SubsecRound;
    Utc::now().trunc_subsecs(6)
}
