//! Practice plan assembly
//!
//! Remote planner first when enabled; any failure, rate limit or empty result
//! falls back to the local planner. Whatever comes back is cut to the
//! learner's unlocked addend range before it is queued.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use galaxy_algo::{
    filter_items_within_addend_limit, generate_local_plan, mastery_snapshot,
    normalize_remote_item, resolve_unlocked_addend_limit, weakest_families, LocalPlan,
    LocalPlanRequest, PlanItem, TargetBand,
};

use crate::response::AppError;
use crate::services::ai_planner::{
    PlanContext, PlanOutcome, PlanRequest, PlanTarget, RemotePlan, RemotePlanner,
};
use crate::state::AppState;
use crate::store::{now_ms, LearnerProfile, LearnerState, PlanSummary};

/// Queue length at which an unforced request reuses the existing plan
pub const REUSE_QUEUE_THRESHOLD: usize = 8;

const WEAK_FAMILY_CONTEXT: usize = 3;
const SESSION_MINUTES: u32 = 10;
const DEFAULT_LEARNER_NAME: &str = "Learner";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsurePlanResult {
    pub reused: bool,
    pub source: Option<String>,
    pub plan_id: Option<String>,
    pub appended: Vec<PlanItem>,
    pub queue_length: usize,
    pub addend_limit: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_seconds: Option<u64>,
}

/// Items normalized from one planner run, before queueing
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPlan {
    pub plan_id: String,
    pub source: String,
    pub generated_at: i64,
    pub items: Vec<PlanItem>,
}

impl From<LocalPlan> for PreparedPlan {
    fn from(plan: LocalPlan) -> Self {
        Self {
            plan_id: plan.plan_id,
            source: plan.source,
            generated_at: plan.generated_at,
            items: plan.items,
        }
    }
}

// ==================== Request Building ====================

/// Grade label from an explicit grade, else from age
pub fn grade_for(profile: &LearnerProfile) -> String {
    if let Some(grade) = profile.grade.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        return grade.to_string();
    }
    let grade = match profile.age.filter(|age| age.is_finite()) {
        None => "preK",
        Some(age) if age < 5.0 => "preK",
        Some(age) if age < 6.0 => "K",
        Some(age) if age < 7.0 => "grade-1",
        Some(age) if age < 8.0 => "grade-2",
        Some(age) if age < 9.0 => "grade-3",
        Some(_) => "grade-4",
    };
    grade.to_string()
}

pub fn addend_limit(state: &LearnerState) -> u8 {
    resolve_unlocked_addend_limit(&state.mastery_tracking, &state.stage_achievements)
}

pub fn build_plan_request(state: &LearnerState, session_size: usize, addend_limit: u8) -> PlanRequest {
    let band = TargetBand::default();
    let mastery = &state.planner.mastery;
    let snapshot = mastery_snapshot(mastery, &band);

    PlanRequest {
        user_id: state.learner_id.clone(),
        grade: grade_for(&state.profile),
        mastery: (!snapshot.is_empty()).then_some(snapshot),
        target: PlanTarget {
            success_rate: band.clamp_target(state.planner.target_success),
            minutes: SESSION_MINUTES,
        },
        context: PlanContext {
            weak_families: weakest_families(mastery, &band, WEAK_FAMILY_CONTEXT)
                .into_iter()
                .map(|family| family.key())
                .collect(),
            need_items: session_size,
            learner_name: state
                .profile
                .name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LEARNER_NAME.to_string()),
            max_addend: addend_limit,
        },
        model: None,
    }
}

// ==================== Planning ====================

/// Sanitize remote items and cut them to the addend limit
pub fn prepare_remote_plan(
    plan: &RemotePlan,
    fallback_target: f64,
    addend_limit: u8,
    default_source: &str,
    now: i64,
) -> PreparedPlan {
    let plan_id = plan
        .plan_id
        .clone()
        .unwrap_or_else(|| format!("remote-{}", Uuid::new_v4().simple()));
    let source = plan.source.clone().unwrap_or_else(|| default_source.to_string());
    let items: Vec<PlanItem> = plan
        .items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| normalize_remote_item(item, index, &plan_id, fallback_target, &source))
        .collect();
    PreparedPlan {
        plan_id,
        source,
        generated_at: now,
        items: filter_items_within_addend_limit(items, addend_limit, PlanItem::fact),
    }
}

pub fn prepare_local_plan(
    state: &LearnerState,
    session_size: usize,
    addend_limit: u8,
    now: i64,
    seed: u64,
) -> PreparedPlan {
    let band = TargetBand::default();
    let request = LocalPlanRequest {
        mastery: &state.planner.mastery,
        history: &state.statistics.problem_history,
        timeline: &state.statistics.answers_timeline,
        session_size,
        band,
        target_success: band.clamp_target(state.planner.target_success),
        addend_limit,
        now,
    };
    let mut plan = PreparedPlan::from(generate_local_plan(&request, seed));
    plan.items = filter_items_within_addend_limit(plan.items, addend_limit, PlanItem::fact);
    plan
}

enum RemoteAttempt {
    Plan(PreparedPlan),
    RateLimited(u64),
    Unavailable,
}

async fn try_remote(
    planner: &RemotePlanner,
    request: &PlanRequest,
    addend_limit: u8,
    now: i64,
) -> RemoteAttempt {
    if !planner.is_available() {
        return RemoteAttempt::Unavailable;
    }
    match planner.request_plan(request).await {
        Ok(PlanOutcome::Ready(remote)) => {
            let prepared = prepare_remote_plan(
                &remote,
                request.target.success_rate,
                addend_limit,
                planner.model(),
                now,
            );
            if prepared.items.is_empty() {
                warn!(
                    received = remote.items.len(),
                    "remote plan had no usable items, using local planner"
                );
                RemoteAttempt::Unavailable
            } else {
                RemoteAttempt::Plan(prepared)
            }
        }
        Ok(PlanOutcome::RateLimited { retry_in_seconds }) => {
            warn!(retry_in_seconds, "remote planner rate limited, using local planner");
            RemoteAttempt::RateLimited(retry_in_seconds)
        }
        Err(err) => {
            warn!(error = %err, "remote planner failed, using local planner");
            RemoteAttempt::Unavailable
        }
    }
}

/// Make sure the learner has a queued plan
///
/// Reuses the queue when it already holds [`REUSE_QUEUE_THRESHOLD`] items,
/// unless `force` is set.
pub async fn ensure_plan(state: &AppState, learner_id: &str, force: bool) -> Result<EnsurePlanResult, AppError> {
    let snapshot = state.store().snapshot(learner_id)?;
    let limit = addend_limit(&snapshot);

    if !force && snapshot.planner.plan_queue.len() >= REUSE_QUEUE_THRESHOLD {
        return Ok(reused_plan(&snapshot, limit));
    }

    let session_size = state.session_size();
    let now = now_ms();
    let request = build_plan_request(&snapshot, session_size, limit);

    let (prepared, retry_in_seconds) = match try_remote(state.planner(), &request, limit, now).await {
        RemoteAttempt::Plan(plan) => (plan, None),
        RemoteAttempt::RateLimited(seconds) => (
            prepare_local_plan(&snapshot, session_size, limit, now, rand::random()),
            Some(seconds),
        ),
        RemoteAttempt::Unavailable => (
            prepare_local_plan(&snapshot, session_size, limit, now, rand::random()),
            None,
        ),
    };

    let plan_id = prepared.plan_id.clone();
    let items = prepared.items.len();
    let result = state.store().update(learner_id, move |learner| {
        commit_plan(learner, prepared, retry_in_seconds, limit, force)
    })?;

    if result.reused {
        info!(learner_id = %learner_id, plan_id = %plan_id, "concurrent plan already queued, dropping");
    } else {
        info!(
            learner_id = %learner_id,
            plan_id = %plan_id,
            source = ?result.source,
            items,
            addend_limit = limit,
            "plan generated"
        );
    }
    Ok(result)
}

fn reused_plan(learner: &LearnerState, limit: u8) -> EnsurePlanResult {
    let last = learner.planner.last_plan.as_ref();
    EnsurePlanResult {
        reused: true,
        source: last.map(|plan| plan.source.clone()),
        plan_id: last.map(|plan| plan.plan_id.clone()),
        appended: Vec::new(),
        queue_length: learner.planner.plan_queue.len(),
        addend_limit: limit,
        retry_in_seconds: None,
    }
}

/// Queue a prepared plan
///
/// The reuse threshold is checked again against the live state, so a plan
/// queued by a concurrent request while this one was being prepared wins.
pub fn commit_plan(
    learner: &mut LearnerState,
    prepared: PreparedPlan,
    retry_in_seconds: Option<u64>,
    limit: u8,
    force: bool,
) -> EnsurePlanResult {
    if !force && learner.planner.plan_queue.len() >= REUSE_QUEUE_THRESHOLD {
        return reused_plan(learner, limit);
    }

    learner.planner.last_plan = Some(PlanSummary {
        plan_id: prepared.plan_id.clone(),
        source: prepared.source.clone(),
        generated_at: prepared.generated_at,
        item_count: prepared.items.len(),
        rate_limited_for: retry_in_seconds,
    });
    learner.planner.plan_queue.extend(prepared.items.iter().cloned());

    EnsurePlanResult {
        reused: false,
        source: Some(prepared.source),
        plan_id: Some(prepared.plan_id),
        appended: prepared.items,
        queue_length: learner.planner.plan_queue.len(),
        addend_limit: limit,
        retry_in_seconds,
    }
}

/// Pop the next queued item, planning first when the queue is empty
///
/// Queued items beyond the current addend limit are skipped.
pub async fn next_item(state: &AppState, learner_id: &str) -> Result<Option<PlanItem>, AppError> {
    let snapshot = state.store().snapshot(learner_id)?;
    if snapshot.planner.plan_queue.is_empty() {
        ensure_plan(state, learner_id, false).await?;
    }

    let item = state.store().update(learner_id, |learner| {
        let limit = addend_limit(learner);
        let queue = &mut learner.planner.plan_queue;
        while !queue.is_empty() {
            let item = queue.remove(0);
            if item.fact().within_limit(limit) {
                return Some(item);
            }
        }
        None
    })?;
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_algo::{AdditionFact, PlanRole};
    use serde_json::json;

    fn profile(age: Option<f64>, grade: Option<&str>) -> LearnerProfile {
        LearnerProfile {
            name: None,
            age,
            grade: grade.map(str::to_string),
        }
    }

    #[test]
    fn test_grade_for_age() {
        assert_eq!(grade_for(&profile(None, None)), "preK");
        assert_eq!(grade_for(&profile(Some(4.5), None)), "preK");
        assert_eq!(grade_for(&profile(Some(5.0), None)), "K");
        assert_eq!(grade_for(&profile(Some(6.2), None)), "grade-1");
        assert_eq!(grade_for(&profile(Some(8.0), None)), "grade-3");
        assert_eq!(grade_for(&profile(Some(11.0), None)), "grade-4");
        assert_eq!(grade_for(&profile(Some(6.0), Some(" grade-2 "))), "grade-2");
        assert_eq!(grade_for(&profile(Some(f64::NAN), None)), "preK");
    }

    #[test]
    fn test_build_plan_request() {
        let mut state = LearnerState::new("ana", 0);
        state.profile.name = Some("Ana".into());
        for _ in 0..4 {
            state.planner.mastery.record(AdditionFact::new(4, 5), false, 1);
        }
        state.planner.mastery.record(AdditionFact::new(1, 1), true, 1);

        let request = build_plan_request(&state, 10, 3);
        assert_eq!(request.user_id, "ana");
        assert_eq!(request.context.learner_name, "Ana");
        assert_eq!(request.context.need_items, 10);
        assert_eq!(request.context.max_addend, 3);
        assert_eq!(request.context.weak_families.first().map(String::as_str), Some("sum=9"));
        let mastery = request.mastery.unwrap();
        assert!(mastery.contains_key("add_within_10"));
        assert!((request.target.success_rate - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_empty_mastery_is_omitted() {
        let state = LearnerState::new("new", 0);
        let request = build_plan_request(&state, 10, 3);
        assert!(request.mastery.is_none());
        assert_eq!(request.context.learner_name, "Learner");
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("mastery").is_none());
    }

    #[test]
    fn test_prepare_remote_plan_enforces_limit() {
        let remote = RemotePlan {
            plan_id: Some("g-1".into()),
            source: None,
            items: vec![
                json!({"a": 1, "b": 2, "role": "weak"}),
                json!({"a": 7, "b": 1}),
                json!({"operands": ["3", "3"]}),
                json!({"a": "x", "b": 1}),
            ],
        };
        let plan = prepare_remote_plan(&remote, 0.85, 3, "gemini-2.5-pro", 5);
        assert_eq!(plan.plan_id, "g-1");
        assert_eq!(plan.source, "gemini-2.5-pro");
        let facts: Vec<(u8, u8)> = plan.items.iter().map(|item| (item.a, item.b)).collect();
        assert_eq!(facts, vec![(1, 2), (3, 3)]);
        assert_eq!(plan.items[0].role, PlanRole::Weak);
        assert_eq!(plan.items[1].id, "g-1-2");
    }

    #[test]
    fn test_remote_plan_without_id_gets_one() {
        let remote = RemotePlan {
            plan_id: None,
            source: Some("gemini".into()),
            items: vec![json!({"a": 1, "b": 1})],
        };
        let plan = prepare_remote_plan(&remote, 0.85, 9, "fallback", 5);
        assert!(plan.plan_id.starts_with("remote-"));
        assert_eq!(plan.items[0].plan_id, plan.plan_id);
        assert_eq!(plan.items[0].source, "gemini");
    }

    #[test]
    fn test_prepare_local_plan() {
        let state = LearnerState::new("ana", 0);
        let plan = prepare_local_plan(&state, 10, 3, 1_000, 9);
        assert_eq!(plan.source, "local planner");
        assert_eq!(plan.items.len(), 10);
        assert!(plan.items.iter().all(|item| item.a <= 3 && item.b <= 3));
    }

    #[test]
    fn test_commit_rechecks_queue_filled_meanwhile() {
        let mut learner = LearnerState::new("ana", 0);
        let first = prepare_local_plan(&learner, 10, 3, 1_000, 1);
        let second = prepare_local_plan(&learner, 10, 3, 1_000, 2);
        let first_id = first.plan_id.clone();

        let committed = commit_plan(&mut learner, first, None, 3, false);
        assert!(!committed.reused);
        assert_eq!(committed.queue_length, 10);

        let raced = commit_plan(&mut learner, second.clone(), None, 3, false);
        assert!(raced.reused);
        assert!(raced.appended.is_empty());
        assert_eq!(raced.plan_id.as_deref(), Some(first_id.as_str()));
        assert_eq!(learner.planner.plan_queue.len(), 10);

        let forced = commit_plan(&mut learner, second, Some(30), 3, true);
        assert!(!forced.reused);
        assert_eq!(forced.queue_length, 20);
        assert_eq!(learner.planner.last_plan.as_ref().unwrap().rate_limited_for, Some(30));
    }
}
