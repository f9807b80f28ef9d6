//! Model analysis tools
//!
//! Read-only reports over a model's rules. Each tool builds its own private
//! engines, so analyses can run concurrently with each other and with live
//! validation of the same model.
//!
//! - `conflicts` - contradictions, cycles, impossible groups, duplicates
//! - `impact` - what-if evaluation of a proposed rule change
//! - `priority` - execution-order priorities

pub mod conflicts;
pub mod impact;
pub mod priority;

pub use conflicts::{
    ConflictDetectionResult, ConflictDetector, ConflictSeverity, ConflictType, RuleConflict,
};
pub use impact::{
    AvailabilityImpact, ConfigurationChange, ImpactAnalysis, ImpactAnalyzer, ImpactSummary,
    PricingImpact, RuleChange, ValidityImpact,
};
pub use priority::{
    analyze_priorities, apply_priority_assignments, optimize_execution_order, PriorityAnalysis,
    PriorityAssignment, PriorityConflict, PriorityConflictKind, PrioritySource,
};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::Model;

/// Entry point bundling the analysis tools under one configuration
#[derive(Debug, Clone, Default)]
pub struct ModelAnalyzer {
    config: EngineConfig,
}

impl ModelAnalyzer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn detect_conflicts(&self, model: &Model) -> Result<ConflictDetectionResult> {
        ConflictDetector::new(&self.config).detect(model)
    }

    pub fn analyze_rule_change(&self, model: &Model, change: &RuleChange) -> Result<ImpactAnalysis> {
        ImpactAnalyzer::new(&self.config).analyze_rule_change(model, change)
    }

    pub fn analyze_priorities(&self, model: &Model) -> PriorityAnalysis {
        priority::analyze_priorities(model, &self.config.priority)
    }

    /// Assign priorities and write them into a new model version
    pub fn apply_priorities(&self, model: &Model) -> Result<Model> {
        let analysis = self.analyze_priorities(model);
        apply_priority_assignments(model, &analysis.assignments)
    }
}
