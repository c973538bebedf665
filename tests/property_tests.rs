//! Property-based tests for the latest-status strategies.
//!
//! Each case builds a random set of order histories in a fresh in-memory
//! database and checks the strategies against the history computed in memory.

mod common;

use std::collections::BTreeSet;

use chrono::Duration;
use common::{now, TestDb};
use order_status_lab::{
    entities::Status,
    queries::{fetch_ids, Strategy as QueryStrategy},
    services::backfill_order_status,
};
use proptest::prelude::*;
use uuid::Uuid;

const LIFECYCLES: [&[Status]; 3] = [
    &[Status::Pending, Status::Complete],
    &[Status::Pending, Status::Cancelled],
    &[Status::Pending, Status::Complete, Status::Cancelled],
];

/// A valid history: a non-empty prefix of one lifecycle, so orders may still
/// be pending or complete-before-refund.
fn history_strategy() -> impl Strategy<Value = Vec<Status>> {
    (0usize..3, 1usize..=3).prop_map(|(lifecycle, len)| {
        let statuses = LIFECYCLES[lifecycle];
        statuses[..len.min(statuses.len())].to_vec()
    })
}

fn fixture_strategy() -> impl Strategy<Value = Vec<(Vec<Status>, bool, i64)>> {
    prop::collection::vec((history_strategy(), any::<bool>(), 0i64..10_000), 0..16)
}

fn run<F: std::future::Future<Output = T>, T>(future: F) -> T {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(future)
}

async fn load(fixture: &[(Vec<Status>, bool, i64)]) -> (TestDb, Vec<(Uuid, Status)>) {
    let db = TestDb::new().await;
    let base = now();
    let mut latest = Vec::with_capacity(fixture.len());
    for (statuses, reverse, offset_ms) in fixture {
        let id = db
            .insert_raw_history(statuses, base + Duration::milliseconds(*offset_ms), *reverse)
            .await;
        latest.push((id, statuses[statuses.len() - 1]));
    }
    (db, latest)
}

fn expected(latest: &[(Uuid, Status)], status: Status) -> Vec<Uuid> {
    latest
        .iter()
        .filter(|(_, s)| *s == status)
        .map(|(id, _)| *id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn exact_strategies_return_the_effective_status_set(fixture in fixture_strategy()) {
        let results = run(async {
            let (db, latest) = load(&fixture).await;
            let mut results = Vec::new();
            for status in [Status::Pending, Status::Complete, Status::Cancelled] {
                for strategy in QueryStrategy::event_strategies() {
                    if strategy.is_exact_for(status) {
                        let ids = fetch_ids(db.conn(), strategy, status).await.unwrap();
                        results.push((strategy, status, ids, expected(&latest, status)));
                    }
                }
            }
            results
        });

        for (strategy, status, ids, expected) in results {
            prop_assert_eq!(ids, expected, "{} / {}", strategy, status);
        }
    }

    #[test]
    fn existence_join_is_a_superset_of_the_exact_answer(fixture in fixture_strategy()) {
        let (join, exact) = run(async {
            let (db, _) = load(&fixture).await;
            let join = fetch_ids(db.conn(), QueryStrategy::ExistenceJoin, Status::Complete)
                .await
                .unwrap();
            let exact = fetch_ids(db.conn(), QueryStrategy::CorrelatedLimit, Status::Complete)
                .await
                .unwrap();
            (join, exact)
        });

        let join: BTreeSet<Uuid> = join.into_iter().collect();
        prop_assert!(exact.iter().all(|id| join.contains(id)));
    }

    #[test]
    fn backfill_makes_the_denormalized_strategy_exact(fixture in fixture_strategy()) {
        let results = run(async {
            let (db, latest) = load(&fixture).await;
            backfill_order_status(db.conn()).await.unwrap();
            let mut results = Vec::new();
            for status in [Status::Pending, Status::Complete, Status::Cancelled] {
                let ids = fetch_ids(db.conn(), QueryStrategy::Denormalized, status)
                    .await
                    .unwrap();
                results.push((ids, expected(&latest, status)));
            }
            results
        });

        for (ids, expected) in results {
            prop_assert_eq!(ids, expected);
        }
    }
}
