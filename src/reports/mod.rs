use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{entities::Status, queries::Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

impl LatencyStats {
    /// `None` when no run was measured
    pub fn from_micros(latencies_us: &[u128]) -> Option<Self> {
        let mut sorted = latencies_us.to_vec();
        Some(Self {
            mean_ms: mean_ms(&sorted)?,
            p50_ms: percentile(&mut sorted, 0.50)?,
            p95_ms: percentile(&mut sorted, 0.95)?,
            min_ms: *sorted.first()? as f64 / 1000.0,
            max_ms: *sorted.last()? as f64 / 1000.0,
        })
    }
}

fn percentile(latencies_us: &mut [u128], p: f64) -> Option<f64> {
    if latencies_us.is_empty() {
        return None;
    }
    latencies_us.sort_unstable();
    let rank = (p * (latencies_us.len() as f64 - 1.0)).round() as usize;
    Some(latencies_us[rank] as f64 / 1000.0)
}

fn mean_ms(latencies_us: &[u128]) -> Option<f64> {
    if latencies_us.is_empty() {
        return None;
    }
    let sum: u128 = latencies_us.iter().copied().sum();
    Some((sum as f64) / (latencies_us.len() as f64) / 1000.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyResult {
    pub strategy: Strategy,
    pub description: String,
    pub exact: bool,
    pub rows: usize,
    pub latency: Option<LatencyStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub backend: String,
    pub status: Status,
    pub orders: u64,
    pub status_events: u64,
    pub iterations: usize,
    pub warmup: usize,
    pub results: Vec<StrategyResult>,
    /// All exact strategies returned the same ids
    pub consistent: bool,
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Orders in status '{}' on {} ({} orders, {} status events)",
            self.status, self.backend, self.orders, self.status_events
        )?;
        writeln!(
            f,
            "{} measured iterations after {} warmup\n",
            self.iterations, self.warmup
        )?;
        writeln!(
            f,
            "{:<18} {:>6} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "strategy", "exact", "rows", "mean ms", "min ms", "max ms", "p50 ms", "p95 ms"
        )?;
        writeln!(f, "{}", "-".repeat(89))?;
        for result in &self.results {
            let exact = if result.exact { "yes" } else { "no" };
            match &result.latency {
                Some(l) => writeln!(
                    f,
                    "{:<18} {:>6} {:>8} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
                    result.strategy.to_string(),
                    exact,
                    result.rows,
                    l.mean_ms,
                    l.min_ms,
                    l.max_ms,
                    l.p50_ms,
                    l.p95_ms
                )?,
                None => writeln!(
                    f,
                    "{:<18} {:>6} {:>8} {:>10}",
                    result.strategy.to_string(),
                    exact,
                    result.rows,
                    "-"
                )?,
            }
        }
        writeln!(
            f,
            "\nexact strategies agree: {}",
            if self.consistent { "yes" } else { "NO" }
        )?;

        for result in self.results.iter().filter(|r| !r.plan.is_empty()) {
            writeln!(f, "\n== plan: {} ==", result.strategy)?;
            for line in &result.plan {
                writeln!(f, "{}", line)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyCheck {
    pub strategy: Strategy,
    pub rows: usize,
    /// Orders the strategy returned that are not in the status
    pub unexpected: Vec<Uuid>,
    /// Orders in the status the strategy missed
    pub missing: Vec<Uuid>,
}

impl StrategyCheck {
    pub fn passed(&self) -> bool {
        self.unexpected.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: Status,
    pub orders: usize,
    /// Orders whose effective status is `status`
    pub expected: usize,
    pub checks: Vec<StrategyCheck>,
    pub orders_without_history: Vec<Uuid>,
    /// Orders whose first event is not `pending`
    pub invalid_first_status: Vec<Uuid>,
    /// `None` when the denormalized column was not checked
    pub drift: Option<u64>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(StrategyCheck::passed)
            && self.orders_without_history.is_empty()
            && self.invalid_first_status.is_empty()
            && self.drift.map_or(true, |d| d == 0)
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} orders, {} with effective status '{}'",
            self.orders, self.expected, self.status
        )?;
        for check in &self.checks {
            writeln!(
                f,
                "  {:<18} {:>8} rows  {}",
                check.strategy.to_string(),
                check.rows,
                if check.passed() {
                    "ok".to_string()
                } else {
                    format!(
                        "MISMATCH ({} unexpected, {} missing)",
                        check.unexpected.len(),
                        check.missing.len()
                    )
                }
            )?;
        }
        writeln!(
            f,
            "  orders without history: {}",
            self.orders_without_history.len()
        )?;
        writeln!(
            f,
            "  orders not starting pending: {}",
            self.invalid_first_status.len()
        )?;
        if let Some(drift) = self.drift {
            writeln!(f, "  denormalized drift: {}", drift)?;
        }
        write!(f, "result: {}", if self.passed() { "PASS" } else { "FAIL" })
    }
}
