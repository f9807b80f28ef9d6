//! Volume tier compiler
//!
//! Each tier's quantity range is compiled once into a boolean pattern over
//! the order quantity (`quantity >= min && quantity <= max`). Lookups are
//! cached per exact quantity with their own TTL.
//!
//! Tiers must not overlap; construction fails otherwise. Quantities above the
//! highest bounded tier fall into it when the top tier is open-ended;
//! quantities below the lowest tier get no tier.

use super::RuleCompiler;
use crate::bdd::NodeId;
use crate::cache::{CacheStats, Sweepable, TtlCache};
use crate::engine::Assignment;
use crate::error::{Error, Result};
use crate::model::VolumeTier;
use crate::registry::PRICE_QUANTITY;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct CompiledTier {
    tier: VolumeTier,
    pattern: NodeId,
}

/// Quantity to tier resolution for one model
pub struct TierCompiler {
    compiler: Arc<RuleCompiler>,
    tiers: Vec<CompiledTier>,
    open_ended: bool,
    cache: Arc<TtlCache<u32, Option<VolumeTier>>>,
}

impl std::fmt::Debug for TierCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierCompiler")
            .field("tiers", &self.tiers.len())
            .field("open_ended", &self.open_ended)
            .finish()
    }
}

fn tier_pattern(tier: &VolumeTier) -> String {
    match tier.max_quantity {
        Some(max) => format!("quantity >= {} && quantity <= {}", tier.min_quantity, max),
        None => format!("quantity >= {}", tier.min_quantity),
    }
}

impl TierCompiler {
    pub fn new(
        tiers: Vec<VolumeTier>,
        compiler: Arc<RuleCompiler>,
        open_ended: bool,
        ttl: Duration,
        max_bytes: usize,
    ) -> Result<Self> {
        let mut ordered = tiers;
        ordered.sort_by_key(|t| t.min_quantity);

        let mut compiled: Vec<CompiledTier> = Vec::with_capacity(ordered.len());
        for tier in ordered {
            if let Some(max) = tier.max_quantity {
                if tier.min_quantity > max {
                    return Err(Error::InvalidTier(format!(
                        "tier '{}' has min_quantity {} above max_quantity {}",
                        tier.id, tier.min_quantity, max
                    )));
                }
            }
            if !tier.multiplier.is_finite() || tier.multiplier < 0.0 {
                return Err(Error::InvalidTier(format!(
                    "tier '{}' has invalid multiplier {}",
                    tier.id, tier.multiplier
                )));
            }
            if let Some(prev) = compiled.last().map(|c| &c.tier) {
                if prev.max_quantity.is_none_or(|max| max >= tier.min_quantity) {
                    return Err(Error::InvalidTier(format!(
                        "tier '{}' overlaps tier '{}' at quantity {}",
                        tier.id, prev.id, tier.min_quantity
                    )));
                }
            }
            let pattern = compiler
                .compile_condition(&tier.id, &tier_pattern(&tier))?
                .handle;
            compiled.push(CompiledTier { tier, pattern });
        }

        Ok(Self {
            compiler,
            tiers: compiled,
            open_ended,
            cache: Arc::new(TtlCache::new("tiers", ttl, max_bytes)),
        })
    }

    pub fn tiers(&self) -> impl Iterator<Item = &VolumeTier> {
        self.tiers.iter().map(|t| &t.tier)
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Tier governing `quantity`, if any
    pub fn determine_tier(&self, quantity: u32) -> Result<Option<VolumeTier>> {
        if let Some(hit) = self.cache.get(&quantity)? {
            return Ok(hit);
        }

        let matched = {
            let registry = self.compiler.registry().read()?;
            let bdd = self.compiler.bdd().read()?;
            let mut numeric = BTreeMap::new();
            numeric.insert(PRICE_QUANTITY.to_string(), f64::from(quantity));
            let assignment = Assignment::from_parts(&registry, BTreeSet::new(), numeric, None)?;

            let mut found = None;
            for candidate in &self.tiers {
                if bdd.eval(candidate.pattern, assignment.bits())? {
                    found = Some(candidate.tier.clone());
                    break;
                }
            }
            found
        };

        let resolved = matched.or_else(|| self.open_ended_fallback(quantity));
        debug!(
            quantity,
            tier = resolved.as_ref().map(|t| t.id.as_str()),
            "Tier resolved"
        );
        self.cache.set(quantity, resolved.clone())?;
        Ok(resolved)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sweepable(&self) -> Arc<dyn Sweepable> {
        self.cache.clone()
    }

    fn open_ended_fallback(&self, quantity: u32) -> Option<VolumeTier> {
        if !self.open_ended {
            return None;
        }
        let top = self.tiers.last()?;
        match top.tier.max_quantity {
            Some(max) if quantity > max => Some(top.tier.clone()),
            _ => None,
        }
    }
}
