//! Calculation storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{Calculation, CostBaseline};

const CALCULATION_COLUMNS: &str =
    "id, group_id, property_id, costs_json, created_by, created_at";

pub struct CalculationStore<'a> {
    conn: &'a Connection,
}

fn row_to_calculation(row: &Row<'_>) -> rusqlite::Result<Calculation> {
    let costs_json: String = row.get(3)?;
    let costs: CostBaseline = serde_json::from_str(&costs_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Calculation {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        group_id: parse_uuid(&row.get::<_, String>(1)?)?,
        property_id: parse_uuid(&row.get::<_, String>(2)?)?,
        costs,
        created_by: parse_uuid(&row.get::<_, String>(4)?)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?)?,
    })
}

impl<'a> CalculationStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a calculation
    #[instrument(skip(self, calculation), fields(calculation_id = %calculation.id, group_id = %calculation.group_id))]
    pub fn create(&self, calculation: &Calculation) -> Result<()> {
        self.conn.execute(
            "INSERT INTO calculations (id, group_id, property_id, costs_json, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                calculation.id.to_string(),
                calculation.group_id.to_string(),
                calculation.property_id.to_string(),
                serde_json::to_string(&calculation.costs)?,
                calculation.created_by.to_string(),
                calculation.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find calculation by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Calculation>> {
        let sql = format!("SELECT {CALCULATION_COLUMNS} FROM calculations WHERE id = ?1");
        let calculation = self
            .conn
            .query_row(&sql, params![id.to_string()], row_to_calculation)
            .optional()?;
        Ok(calculation)
    }

    /// Find the calculation for a (group, property) pair
    #[instrument(skip(self))]
    pub fn find_for(&self, group_id: Uuid, property_id: Uuid) -> Result<Option<Calculation>> {
        let sql = format!(
            "SELECT {CALCULATION_COLUMNS} FROM calculations WHERE group_id = ?1 AND property_id = ?2"
        );
        let calculation = self
            .conn
            .query_row(
                &sql,
                params![group_id.to_string(), property_id.to_string()],
                row_to_calculation,
            )
            .optional()?;
        Ok(calculation)
    }
}
