//! Cross-checks the strategies against effective statuses computed in memory.

use std::collections::BTreeSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DatabaseAccess,
    entities::Status,
    errors::ServiceError,
    queries::{fetch_ids, EffectiveStatusQuery, Query, Strategy},
    reports::{StrategyCheck, VerificationReport},
    services::count_drift,
};

/// Loads every order's history, derives its effective status (newest event)
/// and compares each exact strategy's ids against it.
///
/// With `check_denormalized` the denormalized strategy is checked as well and
/// the report carries the drift count.
#[instrument(skip(db))]
pub async fn verify_effective_status(
    db: &DatabaseAccess,
    status: Status,
    check_denormalized: bool,
) -> Result<VerificationReport, ServiceError> {
    let summaries = EffectiveStatusQuery.execute(db).await?;

    let expected: BTreeSet<Uuid> = summaries
        .iter()
        .filter(|(_, summary)| summary.latest == Some(status))
        .map(|(id, _)| *id)
        .collect();
    let orders_without_history: Vec<Uuid> = summaries
        .iter()
        .filter(|(_, summary)| summary.events == 0)
        .map(|(id, _)| *id)
        .collect();
    let invalid_first_status: Vec<Uuid> = summaries
        .iter()
        .filter(|(_, summary)| summary.first.map_or(false, |s| s != Status::Pending))
        .map(|(id, _)| *id)
        .collect();

    let strategies = Strategy::all()
        .into_iter()
        .filter(|s| check_denormalized || !s.requires_denormalized_column())
        .filter(|s| s.is_exact_for(status));

    let mut checks = Vec::new();
    for strategy in strategies {
        let returned: BTreeSet<Uuid> = fetch_ids(db.get_pool(), strategy, status)
            .await?
            .into_iter()
            .collect();
        let check = StrategyCheck {
            strategy,
            rows: returned.len(),
            unexpected: returned.difference(&expected).copied().collect(),
            missing: expected.difference(&returned).copied().collect(),
        };
        if !check.passed() {
            warn!(
                "{} disagrees with the event history: {} unexpected, {} missing",
                strategy,
                check.unexpected.len(),
                check.missing.len()
            );
        }
        checks.push(check);
    }

    let drift = if check_denormalized {
        Some(count_drift(db.get_pool()).await?)
    } else {
        None
    };

    let report = VerificationReport {
        status,
        orders: summaries.len(),
        expected: expected.len(),
        checks,
        orders_without_history,
        invalid_first_status,
        drift,
    };
    info!(
        "Verified {} orders against status '{}': {}",
        report.orders,
        status,
        if report.passed() { "pass" } else { "fail" }
    );
    Ok(report)
}
