//! Calculation model - one group's cost/share analysis for one property

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Baseline cost figures captured when a calculation is opened
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBaseline {
    #[serde(default)]
    pub purchase_price: Option<f64>,
    #[serde(default)]
    pub down_payment: Option<f64>,
    #[serde(default)]
    pub closing_costs: Option<f64>,
    #[serde(default)]
    pub monthly_costs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calculation {
    pub id: Uuid,
    pub group_id: Uuid,
    pub property_id: Uuid,
    pub costs: CostBaseline,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Calculation {
    pub fn new(group_id: Uuid, property_id: Uuid, created_by: Uuid, costs: CostBaseline) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            property_id,
            costs,
            created_by,
            created_at: Utc::now(),
        }
    }
}
