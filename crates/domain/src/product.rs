use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{DomainError, DomainResult, Entity, ProductId};

/// Product record (matches the backend response shape).
///
/// `stock` is the on-hand quantity; `reorder_level` is the threshold below
/// which the dashboard flags the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub stock: i64,
    pub reorder_level: i64,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Build a validated product record.
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        stock: i64,
        reorder_level: i64,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();

        if sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if stock < 0 {
            return Err(DomainError::invariant("stock cannot be negative"));
        }
        if reorder_level < 0 {
            return Err(DomainError::validation("reorder level cannot be negative"));
        }

        Ok(Self {
            id,
            sku,
            name,
            stock,
            reorder_level,
            updated_at: at,
        })
    }

    /// Apply a partial update, refreshing the last-modified marker.
    pub fn apply_patch(&mut self, patch: &ProductPatch, at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
        }
        if let Some(level) = patch.reorder_level {
            if level < 0 {
                return Err(DomainError::validation("reorder level cannot be negative"));
            }
        }

        let new_stock = self.stock + patch.stock_delta.unwrap_or(0);
        if new_stock < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }

        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(level) = patch.reorder_level {
            self.reorder_level = level;
        }
        self.stock = new_stock;
        self.updated_at = at;

        Ok(())
    }

    /// Whether on-hand stock is at or below the reorder threshold.
    pub fn needs_reorder(&self) -> bool {
        self.stock <= self.reorder_level
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Partial update of a product. Absent fields are left untouched;
/// `stock_delta` is additive so offline adjustments compose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder_level: Option<i64>,
}

impl ProductPatch {
    pub fn stock_delta(delta: i64) -> Self {
        Self {
            stock_delta: Some(delta),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.stock_delta.is_none() && self.reorder_level.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_product() -> Product {
        Product::new(ProductId::new(), "SKU-1", "Widget", 10, 2, Utc::now()).unwrap()
    }

    #[test]
    fn new_rejects_empty_name_and_sku() {
        let at = Utc::now();
        assert!(Product::new(ProductId::new(), "", "Widget", 0, 0, at).is_err());
        assert!(Product::new(ProductId::new(), "SKU", "  ", 0, 0, at).is_err());
    }

    #[test]
    fn new_rejects_negative_stock() {
        let err = Product::new(ProductId::new(), "SKU", "Widget", -1, 0, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn patch_applies_delta_and_bumps_marker() {
        let mut product = test_product();
        let before = product.updated_at;
        let later = before + chrono::Duration::seconds(5);

        product
            .apply_patch(&ProductPatch::stock_delta(-4), later)
            .unwrap();

        assert_eq!(product.stock, 6);
        assert_eq!(product.updated_at, later);
    }

    #[test]
    fn patch_rejects_negative_resulting_stock() {
        let mut product = test_product();
        let err = product
            .apply_patch(&ProductPatch::stock_delta(-11), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        // Nothing applied.
        assert_eq!(product.stock, 10);
    }

    #[test]
    fn needs_reorder_at_threshold() {
        let mut product = test_product();
        product.stock = 2;
        assert!(product.needs_reorder());
        product.stock = 3;
        assert!(!product.needs_reorder());
    }
}
