use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{order, order_status, Status},
    errors::ServiceError,
    events::{Event, EventSender, StatusSignal},
};

/// Timestamps are kept at microsecond precision, which every backend stores.
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Creates orders and appends to their status history.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    signal: StatusSignal,
    event_sender: Option<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            signal: StatusSignal::new(),
            event_sender: None,
        }
    }

    /// Receivers fired inside the transaction of every inserted status event
    pub fn with_signal(mut self, signal: StatusSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_event_sender(mut self, event_sender: EventSender) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    pub fn signal(&self) -> &StatusSignal {
        &self.signal
    }

    /// Creates an order and its initial `pending` event in one transaction
    #[instrument(skip(self))]
    pub async fn create_order(&self) -> Result<order::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let created_at = now_micros();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            created_at: Set(created_at),
            status: Set(None),
        }
        .insert(&txn)
        .await?;

        let pending = self
            .insert_event(&txn, order.id, Status::Pending, created_at)
            .await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit transaction for order {}: {}", order.id, e);
            ServiceError::DatabaseError(e)
        })?;

        info!("Order {} created", order.id);
        self.publish(Event::OrderCreated(order.id)).await;
        self.publish(Event::OrderStatusRecorded {
            order_id: order.id,
            status: pending.status,
            recorded_at: pending.created_at,
        })
        .await;

        // Reload so a denormalized status written by a receiver is visible
        self.find_order(db, order.id).await
    }

    /// Appends a status event after validating the transition
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %status))]
    pub async fn append_status(
        &self,
        order_id: Uuid,
        status: Status,
    ) -> Result<order_status::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        self.find_order(&txn, order_id).await?;

        let latest = latest_event(&txn, order_id)
            .await?
            .ok_or(ServiceError::MissingHistory(order_id))?;

        if !latest.status.can_transition_to(status) {
            warn!(
                "Invalid status transition from {} to {}",
                latest.status, status
            );
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition order {} from '{}' to '{}'",
                order_id, latest.status, status
            )));
        }

        // Never reuse or precede the previous timestamp, even if the clock did
        let created_at = now_micros().max(latest.created_at + Duration::microseconds(1));
        let event = self.insert_event(&txn, order_id, status, created_at).await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit transaction for order {}: {}", order_id, e);
            ServiceError::DatabaseError(e)
        })?;

        info!(
            "Order {} status moved from '{}' to '{}'",
            order_id, latest.status, status
        );
        self.publish(Event::OrderStatusRecorded {
            order_id,
            status,
            recorded_at: event.created_at,
        })
        .await;

        Ok(event)
    }

    /// Status of the order's newest event
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn effective_status(&self, order_id: Uuid) -> Result<Status, ServiceError> {
        let db = &*self.db;
        self.find_order(db, order_id).await?;
        latest_event(db, order_id)
            .await?
            .map(|event| event.status)
            .ok_or(ServiceError::MissingHistory(order_id))
    }

    /// Every status event of the order, oldest first
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn history(&self, order_id: Uuid) -> Result<Vec<order_status::Model>, ServiceError> {
        let db = &*self.db;
        self.find_order(db, order_id).await?;
        order_status::Entity::find()
            .filter(order_status::Column::OrderId.eq(order_id))
            .order_by_asc(order_status::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Deletes the order; its status events go with it through the cascade
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let result = order::Entity::delete_by_id(order_id)
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }

        info!("Order {} deleted", order_id);
        self.publish(Event::OrderDeleted(order_id)).await;
        Ok(())
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.find_order(&*self.db, order_id).await
    }

    async fn find_order<C>(&self, db: &C, order_id: Uuid) -> Result<order::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        order::Entity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(|e| {
                error!("Failed to fetch order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn insert_event(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        order_id: Uuid,
        status: Status,
        created_at: DateTime<Utc>,
    ) -> Result<order_status::Model, ServiceError> {
        let event = order_status::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(status),
            created_at: Set(created_at),
        }
        .insert(txn)
        .await
        .map_err(|e| {
            error!("Failed to insert status event for order {}: {}", order_id, e);
            ServiceError::DatabaseError(e)
        })?;

        self.signal.send(txn, &event).await?;
        Ok(event)
    }

    async fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!("Dropping order event: {}", e);
            }
        }
    }
}

/// Newest status event of an order, if any
pub(crate) async fn latest_event<C>(
    db: &C,
    order_id: Uuid,
) -> Result<Option<order_status::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    order_status::Entity::find()
        .filter(order_status::Column::OrderId.eq(order_id))
        .order_by_desc(order_status::Column::CreatedAt)
        .one(db)
        .await
        .map_err(ServiceError::DatabaseError)
}
