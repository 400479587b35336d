use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{DomainError, DomainResult, Entity, MovementId, ProductId};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    /// Goods received into the warehouse.
    Inbound,
    /// Goods leaving the warehouse (sales, transfers out).
    Outbound,
    /// Manual correction; quantity carries its own sign.
    Adjustment,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Inbound => "inbound",
            MovementKind::Outbound => "outbound",
            MovementKind::Adjustment => "adjustment",
        }
    }
}

/// A single stock movement for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    /// Magnitude for inbound/outbound; signed delta for adjustments.
    pub quantity: i64,
    /// When the movement physically happened.
    pub occurred_at: DateTime<Utc>,
    /// When the record last changed.
    pub recorded_at: DateTime<Utc>,
}

impl Movement {
    /// Build a validated movement record.
    pub fn new(
        id: MovementId,
        product_id: ProductId,
        kind: MovementKind,
        quantity: i64,
        occurred_at: DateTime<Utc>,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        match kind {
            MovementKind::Inbound | MovementKind::Outbound => {
                if quantity <= 0 {
                    return Err(DomainError::validation(
                        "inbound/outbound quantity must be positive",
                    ));
                }
            }
            MovementKind::Adjustment => {
                if quantity == 0 {
                    return Err(DomainError::validation("adjustment delta cannot be zero"));
                }
            }
        }

        Ok(Self {
            id,
            product_id,
            kind,
            quantity,
            occurred_at,
            recorded_at,
        })
    }

    /// Effect of this movement on on-hand stock.
    pub fn signed_delta(&self) -> i64 {
        match self.kind {
            MovementKind::Inbound => self.quantity,
            MovementKind::Outbound => -self.quantity,
            MovementKind::Adjustment => self.quantity,
        }
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> MovementId {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}
