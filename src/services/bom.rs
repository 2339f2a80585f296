use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::repositories::BomWithComponents;

/// Absolute material need for one BOM component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentRequirement {
    pub product_id: Uuid,
    pub required_qty: Decimal,
    pub unit: String,
}

/// Computes raw-material requirements for producing `qty_ordered` units.
///
/// `required_qty = quantity_per_unit * qty_ordered`, one entry per component
/// in BOM order. Components naming the same product are not merged; the
/// stock ledger aggregates them when it checks sufficiency.
pub fn explode(
    bom: Option<&BomWithComponents>,
    qty_ordered: Decimal,
) -> Result<Vec<ComponentRequirement>, ServiceError> {
    let bom = bom.ok_or_else(|| {
        ServiceError::InvalidBom("no bill of materials assigned".to_string())
    })?;

    if bom.components.is_empty() {
        return Err(ServiceError::InvalidBom(format!(
            "bill of materials '{}' has no components",
            bom.bom.name
        )));
    }

    if qty_ordered <= Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "production quantity must be positive, got {}",
            qty_ordered
        )));
    }

    bom.components
        .iter()
        .map(|component| {
            if component.quantity_per_unit <= Decimal::ZERO {
                return Err(ServiceError::InvalidBom(format!(
                    "component {} of '{}' has non-positive quantity {}",
                    component.product_id, bom.bom.name, component.quantity_per_unit
                )));
            }
            let required_qty = component
                .quantity_per_unit
                .checked_mul(qty_ordered)
                .ok_or_else(|| {
                    ServiceError::InvalidQuantity(format!(
                        "requirement for component {} overflows at quantity {}",
                        component.product_id, qty_ordered
                    ))
                })?;
            Ok(ComponentRequirement {
                product_id: component.product_id,
                required_qty,
                unit: component.unit.clone(),
            })
        })
        .collect()
}
