//! Memory routing types
//!
//! Defines the tiers, operations and routing inputs/outputs shared by
//! every component of the router.

pub mod types;

pub use types::{
    ConsistencyLevel, DecisionMetadata, DecisionStatus, FallbackPlan, FallbackStrategy,
    OperationKind, OperationMetadata, OperationResult, RequestMetadata, RoutingContext,
    RoutingDecision, ScoringFeature, ScoringResult, Tier, Urgency, UserHints,
};
