pub mod denormalization;
pub mod orders;

pub use denormalization::{backfill_order_status, count_drift, DenormalizeOrderStatus};
pub use orders::OrderService;
