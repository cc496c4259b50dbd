//! Credit pricing for check items.
//!
//! Pricing is a pure function of the check kind, its options, and the active
//! price table. The coordinator only multiplies the per-item price by the
//! number of subjects; it never reasons about individual surfaces' cost.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{MeterError, Result};
use crate::types::{CheckKind, CheckOptions, Surface};

/// Credits charged per billed unit of each check kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingTable {
    pub rank_check_per_surface: i64,
    pub ai_visibility_per_engine: i64,
    pub backlink_audit_per_domain: i64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            rank_check_per_surface: 1,
            ai_visibility_per_engine: 1,
            backlink_audit_per_domain: 5,
        }
    }
}

impl PricingTable {
    /// Price of one successful surface for `kind`.
    pub fn unit_price(&self, kind: CheckKind) -> i64 {
        match kind {
            CheckKind::RankCheck => self.rank_check_per_surface,
            CheckKind::AiVisibility => self.ai_visibility_per_engine,
            CheckKind::BacklinkAudit => self.backlink_audit_per_domain,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("rank_check_per_surface", self.rank_check_per_surface),
            ("ai_visibility_per_engine", self.ai_visibility_per_engine),
            ("backlink_audit_per_domain", self.backlink_audit_per_domain),
        ] {
            if value <= 0 {
                return Err(MeterError::InvalidAmount(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Surfaces that will be probed, after checking they belong to `kind` and are
/// not repeated.
pub fn resolve_surfaces(kind: CheckKind, options: &CheckOptions) -> Result<Vec<Surface>> {
    let surfaces = options.effective_surfaces(kind);
    let allowed = kind.allowed_surfaces();
    let mut seen = HashSet::new();

    for surface in &surfaces {
        if !allowed.contains(surface) {
            return Err(MeterError::InvalidBatchRequest(format!(
                "surface '{surface}' is not valid for {kind}"
            )));
        }
        if !seen.insert(*surface) {
            return Err(MeterError::InvalidBatchRequest(format!(
                "surface '{surface}' requested more than once"
            )));
        }
    }

    Ok(surfaces)
}

/// Credits reserved for a single subject of `kind` with `options`.
pub fn credits_per_item(kind: CheckKind, options: &CheckOptions, table: &PricingTable) -> Result<i64> {
    let surfaces = resolve_surfaces(kind, options)?;
    Ok(table.unit_price(kind) * surfaces.len() as i64)
}
