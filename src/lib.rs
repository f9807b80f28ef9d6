// Production-quality lints
#![warn(
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
// Deny truly dangerous patterns
#![deny(clippy::mem_forget)]
// Allow common patterns in library code
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # cpq-engine: constraint and pricing core for product configuration
//!
//! A product model (option groups, options, logical rules, price rules) is
//! compiled once into a decision diagram. Interactive sessions then validate
//! selections, list what can still be chosen, and price the result without
//! re-reading the rules.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cpq_engine::{Configurator, EngineConfig, Model};
//!
//! let model = Model::from_yaml(r#"
//!   id: laptop
//!   name: Laptop
//!   groups:
//!     - { id: cpu, name: CPU, type: single_select, min_selections: 1, max_selections: 1 }
//!     - { id: extras, name: Extras, type: optional, min_selections: 0, max_selections: 2 }
//!   options:
//!     - { id: i5, name: Core i5, group_id: cpu, price: 800 }
//!     - { id: i9, name: Core i9, group_id: cpu, price: 1400 }
//!     - { id: cooler, name: Cooler, group_id: extras, price: 60 }
//!   rules:
//!     - { id: R1, type: requires, expression: "i9 -> cooler" }
//! "#)?;
//!
//! let mut session = Configurator::new(model, &EngineConfig::default())?;
//! let update = session.add_selection("i9", 1)?;
//! assert!(!update.validation.is_valid);
//! let update = session.add_selection("cooler", 1)?;
//! assert!(update.validation.is_valid);
//! println!("total: {}", update.price.total);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Model (YAML / builder)                                      │
//! │       │                                                      │
//! │       ├──► RuleCompiler ──► Bdd ──► ConstraintNetwork        │
//! │       │         │                       │                    │
//! │       │   VariableRegistry              ├──► ValidationEngine │
//! │       │                                 └──► availability    │
//! │       │                                                      │
//! │       ├──► PricingCalculator (tiers, price rules, customer)  │
//! │       │                                                      │
//! │       └──► ModelAnalyzer (conflicts, impact, priorities)     │
//! │                                                              │
//! │  Configurator = session over ConfigurationEngine + pricing   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Engines are immutable after construction and safe to share across
//! threads. Model changes produce a new model version and new engines.

// Foundations
pub mod config;
pub mod error;
pub mod model;

// Rule language and compilation
pub mod bdd;
pub mod compiler;
pub mod expr;
pub mod registry;

// Runtime engines
pub mod cache;
pub mod configurator;
pub mod engine;
pub mod pricing;
pub mod validation;

// Offline tooling
pub mod analysis;
pub mod store;

pub use analysis::{
    ConflictDetectionResult, ConflictDetector, ImpactAnalysis, ImpactAnalyzer, ModelAnalyzer,
    PriorityAnalysis, RuleChange,
};
pub use bdd::{Bdd, NodeId};
pub use cache::{spawn_sweeper, CacheStats, EntityCache, Sweepable, SweeperHandle, TtlCache};
pub use compiler::{CompilationFailure, CompiledRule, RuleCompiler, TierCompiler};
pub use config::{CompilationPolicy, DeclarationMode, EngineConfig, TierScope};
pub use configurator::{Configurator, UpdateResult};
pub use engine::{AvailableOption, ConfigurationEngine, ConstraintNetwork};
pub use error::{Error, Result};
pub use expr::{parse_expr, Expr};
pub use model::{
    Configuration, CustomerContext, Group, GroupType, Model, ModelOption, PriceRule,
    PriceRuleType, Rule, RuleType, Selection, VolumeTier,
};
pub use pricing::{PriceAdjustment, PriceBreakdown, PricingCalculator};
pub use registry::VariableRegistry;
pub use store::{InMemoryStore, ModelStore};
pub use validation::{RuleViolation, Severity, Suggestion, ValidationEngine, ValidationResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
