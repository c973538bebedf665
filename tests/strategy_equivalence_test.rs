mod common;

use common::{now, TestDb};
use order_status_lab::{
    entities::Status,
    queries::{fetch, fetch_ids, OrdersInStatusQuery, Query, Strategy},
};
use rstest::rstest;
use uuid::Uuid;

/// Fixture covering every lifecycle plus an order still pending.
async fn mixed_fixture(db: &TestDb) -> (Uuid, Uuid, Uuid, Uuid) {
    let completed = db
        .order_with_history(&[Status::Pending, Status::Complete])
        .await
        .id;
    let failed = db
        .order_with_history(&[Status::Pending, Status::Cancelled])
        .await
        .id;
    let refunded = db
        .order_with_history(&[Status::Pending, Status::Complete, Status::Cancelled])
        .await
        .id;
    let open = db.order_with_history(&[Status::Pending]).await.id;
    (completed, failed, refunded, open)
}

fn sorted(mut ids: Vec<Uuid>) -> Vec<Uuid> {
    ids.sort_unstable();
    ids
}

#[rstest]
#[case::existence_join(Strategy::ExistenceJoin)]
#[case::window_rank(Strategy::WindowRank)]
#[case::correlated_limit(Strategy::CorrelatedLimit)]
#[tokio::test]
async fn every_event_strategy_finds_currently_cancelled_orders(#[case] strategy: Strategy) {
    let db = TestDb::new().await;
    let (_, failed, refunded, _) = mixed_fixture(&db).await;

    let ids = fetch_ids(db.conn(), strategy, Status::Cancelled).await.unwrap();
    assert_eq!(ids, sorted(vec![failed, refunded]));
}

#[rstest]
#[case::pending(Status::Pending)]
#[case::complete(Status::Complete)]
#[tokio::test]
async fn latest_row_strategies_agree_for_non_terminal_statuses(#[case] status: Status) {
    let db = TestDb::new().await;
    let (completed, _, _, open) = mixed_fixture(&db).await;

    let window = fetch_ids(db.conn(), Strategy::WindowRank, status).await.unwrap();
    let correlated = fetch_ids(db.conn(), Strategy::CorrelatedLimit, status)
        .await
        .unwrap();
    assert_eq!(window, correlated);

    let expected = match status {
        Status::Pending => vec![open],
        _ => vec![completed],
    };
    assert_eq!(window, expected);
}

#[tokio::test]
async fn existence_join_answers_ever_in_status() {
    let db = TestDb::new().await;
    let (completed, _, refunded, _) = mixed_fixture(&db).await;

    let ids = fetch_ids(db.conn(), Strategy::ExistenceJoin, Status::Complete)
        .await
        .unwrap();
    // the refunded order was complete once, so the join still returns it
    assert_eq!(ids, sorted(vec![completed, refunded]));
    assert!(!Strategy::ExistenceJoin.is_exact_for(Status::Complete));
}

#[tokio::test]
async fn existence_join_returns_each_order_once() {
    let db = TestDb::new().await;
    let base = now();
    // A history that is not a valid lifecycle: two cancelled events
    db.insert_raw_history(&[Status::Pending, Status::Cancelled, Status::Cancelled], base, false)
        .await;

    let rows = fetch(db.conn(), Strategy::ExistenceJoin, Status::Cancelled)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[rstest]
#[case::window_rank(Strategy::WindowRank)]
#[case::correlated_limit(Strategy::CorrelatedLimit)]
#[tokio::test]
async fn latest_row_is_chosen_by_timestamp_not_insert_order(#[case] strategy: Strategy) {
    let db = TestDb::new().await;
    let id = db
        .insert_raw_history(&[Status::Pending, Status::Complete], now(), true)
        .await;

    assert_eq!(
        fetch_ids(db.conn(), strategy, Status::Complete).await.unwrap(),
        vec![id]
    );
    assert!(fetch_ids(db.conn(), strategy, Status::Pending)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn orders_without_events_match_no_strategy() {
    let db = TestDb::new().await;
    db.insert_raw_history(&[], now(), false).await;

    for strategy in Strategy::all() {
        for status in [Status::Pending, Status::Complete, Status::Cancelled] {
            assert!(
                fetch_ids(db.conn(), strategy, status).await.unwrap().is_empty(),
                "{} / {}",
                strategy,
                status
            );
        }
    }
}

#[tokio::test]
async fn query_object_loads_full_rows() {
    let db = TestDb::denormalized().await;
    let (_, failed, refunded, _) = mixed_fixture(&db).await;

    let query = OrdersInStatusQuery {
        strategy: Strategy::Denormalized,
        status: Status::Cancelled,
    };
    let rows = query.execute(&db.access()).await.unwrap();

    let ids = sorted(rows.iter().map(|o| o.id).collect());
    assert_eq!(ids, sorted(vec![failed, refunded]));
    assert!(rows.iter().all(|o| o.status == Some(Status::Cancelled)));
}

#[tokio::test]
async fn empty_database_returns_nothing() {
    let db = TestDb::new().await;
    for strategy in Strategy::all() {
        assert!(fetch(db.conn(), strategy, Status::Cancelled)
            .await
            .unwrap()
            .is_empty());
    }
}
