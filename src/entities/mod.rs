pub mod order;
pub mod order_status;

pub use order::{Entity as Order, Model as OrderModel};
pub use order_status::{Entity as OrderStatus, Model as OrderStatusModel, Status};
