mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::{now, TestDb};
use order_status_lab::{
    entities::{order_status, Status},
    errors::ServiceError,
};
use rstest::rstest;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

#[rstest]
#[case(&[Status::Pending], Status::Pending)]
#[case(&[Status::Pending, Status::Complete], Status::Complete)]
#[case(&[Status::Pending, Status::Cancelled], Status::Cancelled)]
#[case(&[Status::Pending, Status::Complete, Status::Cancelled], Status::Cancelled)]
#[tokio::test]
async fn effective_status_is_the_newest_event(
    #[case] history: &'static [Status],
    #[case] expected: Status,
) {
    let db = TestDb::denormalized().await;
    let order = db.order_with_history(history).await;

    assert_eq!(db.service.effective_status(order.id).await.unwrap(), expected);
    assert_eq!(
        db.service.get_order(order.id).await.unwrap().status,
        Some(expected)
    );

    let events = db.service.history(order.id).await.unwrap();
    let statuses: Vec<Status> = events.iter().map(|e| e.status).collect();
    assert_eq!(statuses, history);
    assert!(events.windows(2).all(|w| w[0].created_at < w[1].created_at));
}

#[rstest]
#[case(&[Status::Pending], Status::Pending)]
#[case(&[Status::Pending, Status::Complete], Status::Pending)]
#[case(&[Status::Pending, Status::Complete], Status::Complete)]
#[case(&[Status::Pending, Status::Cancelled], Status::Complete)]
#[case(&[Status::Pending, Status::Cancelled], Status::Cancelled)]
#[tokio::test]
async fn invalid_transitions_are_rejected(
    #[case] history: &'static [Status],
    #[case] next: Status,
) {
    let db = TestDb::new().await;
    let order = db.order_with_history(history).await;

    assert_matches!(
        db.service.append_status(order.id, next).await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_eq!(db.service.history(order.id).await.unwrap().len(), history.len());
}

#[tokio::test]
async fn status_events_are_append_only() {
    let db = TestDb::new().await;
    let order = db.order_with_history(&[Status::Pending, Status::Complete]).await;
    let events = db.service.history(order.id).await.unwrap();

    let mut edited: order_status::ActiveModel = events[1].clone().into();
    edited.status = Set(Status::Cancelled);
    assert_matches!(edited.update(db.conn()).await, Err(_));

    let removed: order_status::ActiveModel = events[0].clone().into();
    assert_matches!(removed.delete(db.conn()).await, Err(_));

    assert_eq!(db.service.history(order.id).await.unwrap(), events);
}

#[tokio::test]
async fn deleting_an_order_cascades() {
    let db = TestDb::new().await;
    let kept = db.order_with_history(&[Status::Pending]).await;
    let removed = db
        .order_with_history(&[Status::Pending, Status::Complete, Status::Cancelled])
        .await;

    db.service.delete_order(removed.id).await.unwrap();

    let orphans = order_status::Entity::find()
        .filter(order_status::Column::OrderId.eq(removed.id))
        .all(db.conn())
        .await
        .unwrap();
    assert!(orphans.is_empty());
    assert_matches!(
        db.service.history(removed.id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(db.service.history(kept.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_orders_are_client_errors() {
    let db = TestDb::new().await;
    let err = db
        .service
        .append_status(Uuid::new_v4(), Status::Complete)
        .await
        .unwrap_err();
    assert!(err.is_client_error());
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn appended_status_follows_a_future_dated_event() {
    let db = TestDb::new().await;
    let future = now() + Duration::hours(1);
    let order_id = db.insert_raw_history(&[Status::Pending], future, false).await;

    let event = db
        .service
        .append_status(order_id, Status::Complete)
        .await
        .unwrap();

    assert_eq!(event.created_at, future + Duration::microseconds(1));
    let history = db.service.history(order_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].created_at < history[1].created_at);
    assert_eq!(
        db.service.effective_status(order_id).await.unwrap(),
        Status::Complete
    );
}
