use async_trait::async_trait;

use crate::models::ItemObservation;
use crate::utils::error::Result;

/// Price-history collaborator. We hand it one observation per watch term
/// per run; dedup and "lowest ever" policy live on the other side of this
/// seam.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record(&mut self, observation: ItemObservation) -> Result<()>;
}

/// In-memory store for tests and for runs without a configured backend.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    observations: Vec<ItemObservation>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> &[ItemObservation] {
        &self.observations
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn record(&mut self, observation: ItemObservation) -> Result<()> {
        self.observations.push(observation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Availability;
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_memory_history_records_in_order() {
        let mut store = MemoryHistory::new();
        store
            .record(ItemObservation {
                watch_term_key: "goku".to_string(),
                price: Some(Decimal::new(150000, 2)),
                observed_at: Utc::now(),
                availability: Availability::InStock,
            })
            .await
            .unwrap();
        store
            .record(ItemObservation {
                watch_term_key: "vegeta".to_string(),
                price: None,
                observed_at: Utc::now(),
                availability: Availability::Unknown,
            })
            .await
            .unwrap();

        assert_eq!(store.observations().len(), 2);
        assert_eq!(store.observations()[0].watch_term_key, "goku");
        assert_eq!(store.observations()[1].price, None);
    }
}
