//! Inventory executor trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{AggregateId, CorrelationId};
use domain::{OrderItem, Sku};

use crate::error::OrchestratorError;

/// Result of a successful per-item reservation.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// The reservation ID assigned by the inventory system.
    pub reservation_id: String,
}

/// Trait for inventory operations.
///
/// Reservations are per line item so independent items can be reserved
/// in parallel (scatter-gather) and released individually.
#[async_trait]
pub trait InventoryExecutor: Send + Sync {
    /// Reserves stock for one line item.
    async fn reserve(
        &self,
        order_id: AggregateId,
        item: &OrderItem,
        correlation_id: CorrelationId,
    ) -> Result<Reservation, OrchestratorError>;

    /// Releases a previously made reservation.
    async fn release(&self, reservation_id: &str) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<String, (AggregateId, Sku, u32)>,
    out_of_stock: HashSet<Sku>,
    next_id: u32,
}

/// In-memory inventory executor for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryExecutor {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryExecutor {
    /// Creates a new in-memory inventory executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a SKU as out of stock so its reservations fail.
    pub fn set_out_of_stock(&self, sku: Sku) {
        self.state.write().unwrap().out_of_stock.insert(sku);
    }

    /// Restores a SKU to availability.
    pub fn restock(&self, sku: &Sku) {
        self.state.write().unwrap().out_of_stock.remove(sku);
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reservations.len()
    }

    /// Returns true if a reservation exists with the given ID.
    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .reservations
            .contains_key(reservation_id)
    }
}

#[async_trait]
impl InventoryExecutor for InMemoryInventoryExecutor {
    async fn reserve(
        &self,
        order_id: AggregateId,
        item: &OrderItem,
        _correlation_id: CorrelationId,
    ) -> Result<Reservation, OrchestratorError> {
        let mut state = self.state.write().unwrap();

        if state.out_of_stock.contains(&item.sku) {
            return Err(OrchestratorError::InventoryExecutor(format!(
                "OUT_OF_STOCK: {}",
                item.sku
            )));
        }

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state.reservations.insert(
            reservation_id.clone(),
            (order_id, item.sku.clone(), item.quantity),
        );

        Ok(Reservation { reservation_id })
    }

    async fn release(&self, reservation_id: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().unwrap();
        state.reservations.remove(reservation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;

    fn widget() -> OrderItem {
        OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000))
    }

    #[tokio::test]
    async fn reserve_and_release() {
        let executor = InMemoryInventoryExecutor::new();
        let order_id = AggregateId::new();

        let reservation = executor
            .reserve(order_id, &widget(), CorrelationId::new())
            .await
            .unwrap();
        assert!(reservation.reservation_id.starts_with("RES-"));
        assert_eq!(executor.reservation_count(), 1);

        executor.release(&reservation.reservation_id).await.unwrap();
        assert_eq!(executor.reservation_count(), 0);
    }

    #[tokio::test]
    async fn out_of_stock_sku_fails() {
        let executor = InMemoryInventoryExecutor::new();
        executor.set_out_of_stock(Sku::new("SKU-001"));

        let result = executor
            .reserve(AggregateId::new(), &widget(), CorrelationId::new())
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::InventoryExecutor(msg)) if msg.contains("OUT_OF_STOCK")
        ));
        assert_eq!(executor.reservation_count(), 0);
    }

    #[tokio::test]
    async fn restock_recovers_the_sku() {
        let executor = InMemoryInventoryExecutor::new();
        let sku = Sku::new("SKU-001");
        executor.set_out_of_stock(sku.clone());
        executor.restock(&sku);

        let result = executor
            .reserve(AggregateId::new(), &widget(), CorrelationId::new())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sequential_reservation_ids() {
        let executor = InMemoryInventoryExecutor::new();
        let order_id = AggregateId::new();

        let r1 = executor
            .reserve(order_id, &widget(), CorrelationId::new())
            .await
            .unwrap();
        let r2 = executor
            .reserve(order_id, &widget(), CorrelationId::new())
            .await
            .unwrap();

        assert_eq!(r1.reservation_id, "RES-0001");
        assert_eq!(r2.reservation_id, "RES-0002");
    }
}
