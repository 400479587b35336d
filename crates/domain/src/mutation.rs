//! Mutation vocabulary: the payloads carried by queued pending actions.
//!
//! A [`Mutation`] is self-contained: it carries its own identifiers and
//! timestamps, so applying it optimistically while offline and replaying it
//! against the backend later produce the same record, byte for byte.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wareflow_core::{DomainError, DomainResult, ProductId};

use crate::movement::{Movement, MovementKind};
use crate::product::{Product, ProductPatch};

/// Discriminant of a mutation, used for reporting and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    CreateProduct,
    UpdateProduct,
    DeleteProduct,
    CreateMovement,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::CreateProduct => "create_product",
            MutationKind::UpdateProduct => "update_product",
            MutationKind::DeleteProduct => "delete_product",
            MutationKind::CreateMovement => "create_movement",
        }
    }
}

impl core::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Draft for a product to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub stock: i64,
    pub reorder_level: i64,
}

/// Draft for a movement to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// A state-changing intent, applied either directly against the backend or
/// optimistically against the local copy and queued for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    CreateProduct {
        product: Product,
    },
    UpdateProduct {
        id: ProductId,
        patch: ProductPatch,
        occurred_at: DateTime<Utc>,
    },
    DeleteProduct {
        id: ProductId,
        occurred_at: DateTime<Utc>,
    },
    CreateMovement {
        movement: Movement,
    },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateProduct { .. } => MutationKind::CreateProduct,
            Mutation::UpdateProduct { .. } => MutationKind::UpdateProduct,
            Mutation::DeleteProduct { .. } => MutationKind::DeleteProduct,
            Mutation::CreateMovement { .. } => MutationKind::CreateMovement,
        }
    }

    /// Identifier of the record this mutation touches.
    pub fn entity_id(&self) -> Uuid {
        match self {
            Mutation::CreateProduct { product } => product.id.into(),
            Mutation::UpdateProduct { id, .. } => (*id).into(),
            Mutation::DeleteProduct { id, .. } => (*id).into(),
            Mutation::CreateMovement { movement } => movement.id.into(),
        }
    }

    /// Apply this mutation to a pair of entity collections.
    ///
    /// This is the single merge-semantics implementation: the optimistic
    /// offline apply, the reconciliation after a fetch, and the in-memory
    /// backend all go through it, so a queued replay ends in exactly the
    /// state a direct online write would have produced. Last writer wins on
    /// the single copy of each record.
    pub fn apply_to(&self, products: &mut Vec<Product>, movements: &mut Vec<Movement>) -> DomainResult<()> {
        match self {
            Mutation::CreateProduct { product } => {
                match products.iter_mut().find(|p| p.id == product.id) {
                    Some(existing) => *existing = product.clone(),
                    None => products.push(product.clone()),
                }
                Ok(())
            }
            Mutation::UpdateProduct {
                id,
                patch,
                occurred_at,
            } => {
                let product = products
                    .iter_mut()
                    .find(|p| p.id == *id)
                    .ok_or(DomainError::NotFound)?;
                product.apply_patch(patch, *occurred_at)
            }
            Mutation::DeleteProduct { id, .. } => {
                products.retain(|p| p.id != *id);
                Ok(())
            }
            Mutation::CreateMovement { movement } => {
                if !products.iter().any(|p| p.id == movement.product_id) {
                    return Err(DomainError::NotFound);
                }
                match movements.iter_mut().find(|m| m.id == movement.id) {
                    Some(existing) => *existing = movement.clone(),
                    None => movements.push(movement.clone()),
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wareflow_core::MovementId;

    fn product(stock: i64) -> Product {
        Product::new(ProductId::new(), "SKU-9", "Crate", stock, 1, Utc::now()).unwrap()
    }

    fn movement_for(product_id: ProductId, quantity: i64) -> Movement {
        let now = Utc::now();
        Movement::new(
            MovementId::new(),
            product_id,
            MovementKind::Outbound,
            quantity,
            now,
            now,
        )
        .unwrap()
    }

    #[test]
    fn create_then_update_applies_in_order() {
        let mut products = Vec::new();
        let mut movements = Vec::new();
        let p = product(10);
        let id = p.id;

        Mutation::CreateProduct { product: p }
            .apply_to(&mut products, &mut movements)
            .unwrap();
        Mutation::UpdateProduct {
            id,
            patch: ProductPatch::stock_delta(-5),
            occurred_at: Utc::now(),
        }
        .apply_to(&mut products, &mut movements)
        .unwrap();

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].stock, 5);
    }

    #[test]
    fn update_missing_product_is_not_found() {
        let mut products = Vec::new();
        let mut movements = Vec::new();
        let err = Mutation::UpdateProduct {
            id: ProductId::new(),
            patch: ProductPatch::stock_delta(1),
            occurred_at: Utc::now(),
        }
        .apply_to(&mut products, &mut movements)
        .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn movement_requires_existing_product() {
        let mut products = Vec::new();
        let mut movements = Vec::new();
        let m = movement_for(ProductId::new(), 2);

        let err = Mutation::CreateMovement { movement: m }
            .apply_to(&mut products, &mut movements)
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut products = vec![product(1)];
        let mut movements = Vec::new();
        let id = products[0].id;

        let delete = Mutation::DeleteProduct {
            id,
            occurred_at: Utc::now(),
        };
        delete.apply_to(&mut products, &mut movements).unwrap();
        delete.apply_to(&mut products, &mut movements).unwrap();
        assert!(products.is_empty());
    }

    #[test]
    fn create_product_is_last_writer_wins() {
        let mut products = Vec::new();
        let mut movements = Vec::new();
        let mut p = product(3);
        let id = p.id;

        Mutation::CreateProduct { product: p.clone() }
            .apply_to(&mut products, &mut movements)
            .unwrap();
        p.stock = 7;
        Mutation::CreateProduct { product: p }
            .apply_to(&mut products, &mut movements)
            .unwrap();

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, id);
        assert_eq!(products[0].stock, 7);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: applying the same mutation sequence to the same
            /// initial state always yields the same final state.
            #[test]
            fn apply_is_deterministic(
                initial_stock in 0i64..10_000,
                deltas in proptest::collection::vec(-50i64..50, 0..12),
            ) {
                let p = Product::new(
                    ProductId::new(),
                    "SKU-P",
                    "Pallet",
                    initial_stock,
                    0,
                    Utc::now(),
                ).unwrap();
                let id = p.id;
                let at = Utc::now();

                let mut mutations = vec![Mutation::CreateProduct { product: p }];
                mutations.extend(deltas.iter().map(|&d| Mutation::UpdateProduct {
                    id,
                    patch: ProductPatch::stock_delta(d),
                    occurred_at: at,
                }));

                let mut products_a = Vec::new();
                let mut movements_a = Vec::new();
                let mut products_b = Vec::new();
                let mut movements_b = Vec::new();

                for m in &mutations {
                    let ra = m.apply_to(&mut products_a, &mut movements_a);
                    let rb = m.apply_to(&mut products_b, &mut movements_b);
                    prop_assert_eq!(ra.is_ok(), rb.is_ok());
                }

                prop_assert_eq!(products_a, products_b);
                prop_assert_eq!(movements_a, movements_b);
            }
        }
    }

    #[test]
    fn mutation_round_trips_through_json() {
        let p = product(4);
        let mutation = Mutation::CreateMovement {
            movement: movement_for(p.id, 2),
        };
        let json = serde_json::to_string(&mutation).unwrap();
        let back: Mutation = serde_json::from_str(&json).unwrap();
        assert_eq!(mutation, back);
        assert!(json.contains("\"kind\":\"create_movement\""));
    }
}
