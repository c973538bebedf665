mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::TestDb;
use order_status_lab::{
    entities::{order_status, Status},
    errors::ServiceError,
    events::{StatusReceiver, StatusSignal},
    queries::{fetch_ids, Strategy},
    services::{backfill_order_status, count_drift, DenormalizeOrderStatus, OrderService},
};
use rand::{rngs::StdRng, SeedableRng};
use sea_orm::DatabaseTransaction;

struct Reject;

#[async_trait]
impl StatusReceiver for Reject {
    fn name(&self) -> &'static str {
        "reject"
    }

    async fn on_status_created(
        &self,
        _txn: &DatabaseTransaction,
        event: &order_status::Model,
    ) -> Result<(), ServiceError> {
        if event.status == Status::Cancelled {
            return Err(ServiceError::EventError("cancellations are frozen".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn denormalized_strategy_matches_event_strategies_going_forward() {
    let db = TestDb::denormalized().await;
    db.order_with_history(&[Status::Pending, Status::Complete]).await;
    db.order_with_history(&[Status::Pending, Status::Cancelled]).await;
    db.order_with_history(&[Status::Pending, Status::Complete, Status::Cancelled])
        .await;

    for status in [Status::Pending, Status::Complete, Status::Cancelled] {
        let expected = fetch_ids(db.conn(), Strategy::CorrelatedLimit, status)
            .await
            .unwrap();
        let denormalized = fetch_ids(db.conn(), Strategy::Denormalized, status)
            .await
            .unwrap();
        assert_eq!(denormalized, expected, "{}", status);
    }
    assert_eq!(count_drift(db.conn()).await.unwrap(), 0);
}

#[tokio::test]
async fn receiver_error_rolls_back_the_append() {
    let db = TestDb::new().await;
    let service = OrderService::new(db.pool.clone()).with_signal(
        StatusSignal::new()
            .with(Arc::new(DenormalizeOrderStatus))
            .with(Arc::new(Reject)),
    );

    let order = service.create_order().await.unwrap();
    service.append_status(order.id, Status::Complete).await.unwrap();

    let result = service.append_status(order.id, Status::Cancelled).await;
    assert!(matches!(result, Err(ServiceError::EventError(_))));

    // Neither the event nor the denormalized write survived
    assert_eq!(service.history(order.id).await.unwrap().len(), 2);
    assert_eq!(
        service.get_order(order.id).await.unwrap().status,
        Some(Status::Complete)
    );
}

#[tokio::test]
async fn backfill_covers_seeded_and_plain_rows() {
    let db = TestDb::new().await;
    order_status_lab::seed::seed_orders(
        &db.access(),
        order_status_lab::seed::SeedOptions {
            count: 40,
            batch_size: 16,
            denormalize: false,
        },
        &mut StdRng::seed_from_u64(11),
    )
    .await
    .unwrap();
    db.order_with_history(&[Status::Pending]).await;

    assert_eq!(count_drift(db.conn()).await.unwrap(), 41);
    assert_eq!(backfill_order_status(db.conn()).await.unwrap(), 41);
    assert_eq!(count_drift(db.conn()).await.unwrap(), 0);

    // idempotent
    assert_eq!(backfill_order_status(db.conn()).await.unwrap(), 41);
    assert_eq!(count_drift(db.conn()).await.unwrap(), 0);
}

#[tokio::test]
async fn seeding_with_denormalization_needs_no_backfill() {
    let db = TestDb::new().await;
    order_status_lab::seed::seed_orders(
        &db.access(),
        order_status_lab::seed::SeedOptions {
            count: 30,
            batch_size: 7,
            denormalize: true,
        },
        &mut StdRng::seed_from_u64(5),
    )
    .await
    .unwrap();

    assert_eq!(count_drift(db.conn()).await.unwrap(), 0);
    for status in [Status::Complete, Status::Cancelled] {
        assert_eq!(
            fetch_ids(db.conn(), Strategy::Denormalized, status)
                .await
                .unwrap(),
            fetch_ids(db.conn(), Strategy::WindowRank, status)
                .await
                .unwrap()
        );
    }
}
