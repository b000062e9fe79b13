//! # galaxy-algo - addition practice core algorithms
//!
//! Pure Rust algorithms behind the Math Galaxy practice sessions:
//!
//! - **Mastery store** - Beta(alpha, beta) counters per fact family (sum 0..=18)
//! - **Success predictor** - bounded success probability per family
//! - **Stage unlock resolution** - addend ranges gated by prerequisite mastery
//! - **Local planner** - weak/review/challenge/balanced session selection
//! - **Review queue** - spaced re-asking of missed facts
//!
//! ## Modules
//!
//! - [`mastery`] - fact-family counters
//! - [`predictor`] - success prediction, mastery snapshots
//! - [`tracking`] - per-addend attempt levels
//! - [`stages`] - stage progress and first-claim-wins addend ownership
//! - [`planner`] - local session planner
//! - [`review`] - review scheduling
//! - [`sanitize`] - normalizing loosely shaped plan items
//! - [`types`] - shared types and constants
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use galaxy_algo::{
//!     addition_stage_sequence, compute_stage_progress, default_tracking, generate_local_plan,
//!     LocalPlanRequest, MasteryStore, StageIndex, TargetBand,
//! };
//!
//! let tracking = default_tracking();
//! let stages = compute_stage_progress(&addition_stage_sequence(), &tracking, &BTreeMap::new());
//! let index = StageIndex::build(&stages);
//! assert!(!index.is_locked(2));
//! assert!(index.is_locked(4));
//!
//! let mastery = MasteryStore::new();
//! let history = BTreeMap::new();
//! let request = LocalPlanRequest {
//!     mastery: &mastery,
//!     history: &history,
//!     timeline: &[],
//!     session_size: 10,
//!     band: TargetBand::default(),
//!     target_success: 0.85,
//!     addend_limit: 3,
//!     now: 0,
//! };
//! let plan = generate_local_plan(&request, 42);
//! assert_eq!(plan.items.len(), 10);
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod mastery;
pub mod planner;
pub mod predictor;
pub mod review;
pub mod sanitize;
pub mod stages;
pub mod tracking;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use mastery::{MasteryNode, MasteryStore};
pub use planner::{
    generate_local_plan, LocalPlan, LocalPlanRequest, LocalPlanner, PlanQuotas,
    LOCAL_PLANNER_SOURCE,
};
pub use predictor::{mastery_snapshot, predict_family, predict_success, weakest_families};
pub use review::{clear_if_recovered, pick_review_due, schedule_review, ReviewEntry};
pub use sanitize::{extract_fact, extract_operands, normalize_remote_item, to_number};
pub use stages::{
    addition_stage_sequence, compute_stage_progress, filter_items_within_addend_limit,
    find_stage_by_id, resolve_max_unlocked_addend, resolve_unlocked_addend_limit, AddendLock,
    StageAchievement, StageConfig, StageIndex, StageProgress,
};
pub use tracking::{default_tracking, record_fact, AddendMastery, AddendTracking, MasteryLevel};
pub use types::*;
