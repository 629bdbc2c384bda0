use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Availability;

/// One scraped listing record. Lives only for the current run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub title: String,
    /// Listed price, if one was extracted. Absent for entries whose price
    /// block could not be parsed; never zero-as-sentinel.
    pub price: Option<Decimal>,
    /// Site-side listing identifier (e.g. "MLB123456789").
    pub identifier: String,
    /// 1-based position across the whole paginated result set.
    pub position: usize,
    pub link: Option<String>,
    pub availability: Availability,
}

impl CatalogEntry {
    pub fn new(title: impl Into<String>, identifier: impl Into<String>, position: usize) -> Self {
        Self {
            title: title.into(),
            price: None,
            identifier: identifier.into(),
            position,
            link: None,
            availability: Availability::Unknown,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self.availability = Availability::InStock;
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn sold_out(mut self) -> Self {
        self.availability = Availability::SoldOut;
        self
    }
}
