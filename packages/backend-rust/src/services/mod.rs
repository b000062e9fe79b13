pub mod ai_planner;
pub mod attempts;
pub mod plan;
