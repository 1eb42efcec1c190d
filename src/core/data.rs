use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};
use super::types::{Deal, EventScope, MarketEvent, Neighborhood, ProductType};

const BUNDLED_REFERENCE_JSON: &str = include_str!("../../data/reference.json");

/// Static reference data loaded once before any run starts.
///
/// Neighborhoods here are the starting conditions; each run clones them into
/// its own mutable state. Product types, events and deals are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceData {
    pub neighborhoods: Vec<Neighborhood>,
    pub product_types: Vec<ProductType>,
    #[serde(default)]
    pub events: Vec<MarketEvent>,
    #[serde(default)]
    pub deals: Vec<Deal>,
}

impl ReferenceData {
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_REFERENCE_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let data: ReferenceData = serde_json::from_str(json)?;
        data.validate()?;
        Ok(data)
    }

    pub fn product_type(&self, id: &str) -> Result<&ProductType> {
        self.product_types
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| SimError::UnknownProductType(id.to_string()))
    }

    pub fn initial_neighborhood(&self, id: &str) -> Result<&Neighborhood> {
        self.neighborhoods
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| SimError::UnknownNeighborhood(id.to_string()))
    }

    pub fn event(&self, id: &str) -> Result<&MarketEvent> {
        self.events
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| SimError::UnknownEvent(id.to_string()))
    }

    pub fn deal(&self, id: &str) -> Result<&Deal> {
        self.deals
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| SimError::UnknownDeal(id.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.neighborhoods.is_empty() {
            return Err(SimError::InvalidReferenceData(
                "at least one neighborhood is required".to_string(),
            ));
        }
        if self.product_types.is_empty() {
            return Err(SimError::InvalidReferenceData(
                "at least one product type is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for p in &self.product_types {
            if !seen.insert(p.id.as_str()) {
                return Err(SimError::InvalidReferenceData(format!(
                    "duplicate product type id {}",
                    p.id
                )));
            }
            if !(0.0..0.95).contains(&p.base_expense_ratio) {
                return Err(SimError::InvalidReferenceData(format!(
                    "product type {} expense ratio must be in [0, 0.95)",
                    p.id
                )));
            }
            if p.lease.min_term_years == 0 || p.lease.max_term_years < p.lease.min_term_years {
                return Err(SimError::InvalidReferenceData(format!(
                    "product type {} lease term range is empty",
                    p.id
                )));
            }
        }

        let mut seen = HashSet::new();
        for n in &self.neighborhoods {
            if !seen.insert(n.id.as_str()) {
                return Err(SimError::InvalidReferenceData(format!(
                    "duplicate neighborhood id {}",
                    n.id
                )));
            }
            if n.zoning.is_empty() {
                return Err(SimError::InvalidReferenceData(format!(
                    "neighborhood {} has no zoned product types",
                    n.id
                )));
            }
            for zoned in &n.zoning {
                self.product_type(zoned)?;
            }
        }

        for e in &self.events {
            if let Some(target) = &e.target {
                if e.scope == EventScope::Global {
                    return Err(SimError::InvalidReferenceData(format!(
                        "global event {} cannot target a neighborhood",
                        e.id
                    )));
                }
                self.initial_neighborhood(target)?;
            }
        }

        for d in &self.deals {
            self.initial_neighborhood(&d.neighborhood_id)?;
            self.product_type(&d.product_type_id)?;
        }

        Ok(())
    }
}
