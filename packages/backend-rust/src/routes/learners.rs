use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use galaxy_algo::review::MAX_REVIEW_QUEUE;
use galaxy_algo::{
    addition_stage_sequence, compute_stage_progress, mastery_snapshot, pick_review_due,
    resolve_max_unlocked_addend, AddendLock, AddendTracking, PlanItem, ReviewEntry, StageIndex,
    StageProgress, TargetBand, MAX_ADDEND,
};

use crate::response::{ok, ok_with_message, AppError};
use crate::services::attempts::{self, AttemptInput};
use crate::services::plan;
use crate::state::AppState;
use crate::store::{now_ms, LearnerProfile, LearnerState};

const MAX_AGE: f64 = 120.0;
const MAX_NAME_LEN: usize = 60;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/stages", get(get_stages))
        .route("/:id/addends/:addend/lock", get(get_addend_lock))
        .route("/:id/attempts", post(post_attempt))
        .route("/:id/plan", post(post_plan))
        .route("/:id/plan/next", get(get_next_item))
        .route("/:id/mastery", get(get_mastery))
        .route("/:id/review", get(get_review))
        .route("/:id/profile", put(put_profile))
}

fn stages_for(learner: &LearnerState) -> Vec<StageProgress> {
    compute_stage_progress(
        &addition_stage_sequence(),
        &learner.mastery_tracking,
        &learner.stage_achievements,
    )
}

// ==================== Stages ====================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StagesResponse {
    stages: Vec<StageProgress>,
    unlocked_addend_limit: u8,
}

async fn get_stages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let learner = state.store().snapshot(&id)?;
    let stages = stages_for(&learner);
    let unlocked_addend_limit = resolve_max_unlocked_addend(&stages).min(MAX_ADDEND);
    Ok(ok(StagesResponse {
        stages,
        unlocked_addend_limit,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LockedStage {
    id: String,
    label: String,
    unlocked: bool,
    prerequisites: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddendLockResponse {
    addend: u8,
    locked: bool,
    stage: Option<LockedStage>,
}

async fn get_addend_lock(
    State(state): State<AppState>,
    Path((id, addend)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let addend = addend
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|value| *value <= MAX_ADDEND)
        .ok_or_else(|| AppError::validation(format!("addend must be between 0 and {MAX_ADDEND}")))?;

    let learner = state.store().snapshot(&id)?;
    let stages = stages_for(&learner);
    let index = StageIndex::build(&stages);
    let lock = index.lock_info(addend);

    Ok(ok(AddendLockResponse {
        addend,
        locked: lock.is_locked(),
        stage: match lock {
            AddendLock::NoStage => None,
            AddendLock::Unlocked(stage) | AddendLock::Locked(stage) => Some(LockedStage {
                id: stage.id.clone(),
                label: stage.label.clone(),
                unlocked: stage.unlocked,
                prerequisites: stage.prerequisites.clone(),
            }),
        },
    }))
}

// ==================== Attempts & Plans ====================

async fn post_attempt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<AttemptInput>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = attempts::record_attempt(&state, &id, payload).await?;
    Ok(ok(outcome))
}

#[derive(Debug, Default, Deserialize)]
struct PlanBody {
    #[serde(default)]
    force: bool,
}

async fn post_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<PlanBody>>,
) -> Result<impl IntoResponse, AppError> {
    let force = body.map(|Json(body)| body.force).unwrap_or(false);
    let result = plan::ensure_plan(&state, &id, force).await?;
    let message = if result.reused {
        "existing plan reused"
    } else {
        "plan generated"
    };
    Ok(ok_with_message(result, message))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NextItemResponse {
    item: Option<PlanItem>,
    remaining: usize,
}

async fn get_next_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let item = plan::next_item(&state, &id).await?;
    let remaining = state.store().snapshot(&id)?.planner.plan_queue.len();
    Ok(ok(NextItemResponse { item, remaining }))
}

// ==================== Mastery & Review ====================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MasteryResponse {
    band: TargetBand,
    target_success: f64,
    families: BTreeMap<String, f64>,
    addends: AddendTracking,
}

async fn get_mastery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let learner = state.store().snapshot(&id)?;
    let band = TargetBand::default();
    Ok(ok(MasteryResponse {
        band,
        target_success: learner.planner.target_success,
        families: mastery_snapshot(&learner.planner.mastery, &band),
        addends: learner.mastery_tracking,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewResponse {
    due: Vec<ReviewEntry>,
    upcoming: Vec<ReviewEntry>,
}

async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let learner = state.store().snapshot(&id)?;
    let queue = &learner.adaptive.needs_review;
    let (due, mut upcoming) = pick_review_due(queue, now_ms(), MAX_REVIEW_QUEUE);
    upcoming.sort_by_key(|entry| entry.due_at);
    Ok(ok(ReviewResponse { due, upcoming }))
}

// ==================== Profile ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdate {
    name: Option<String>,
    age: Option<f64>,
    grade: Option<String>,
    target_success: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    profile: LearnerProfile,
    target_success: f64,
}

async fn put_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(age) = payload.age {
        if !age.is_finite() || !(0.0..=MAX_AGE).contains(&age) {
            return Err(AppError::validation("age must be between 0 and 120"));
        }
    }
    if let Some(target) = payload.target_success {
        if !target.is_finite() || !(0.0..=1.0).contains(&target) {
            return Err(AppError::validation("targetSuccess must be between 0 and 1"));
        }
    }
    let name = payload.name.map(|name| name.trim().to_string());
    if name.as_ref().is_some_and(|name| name.chars().count() > MAX_NAME_LEN) {
        return Err(AppError::validation("name is too long"));
    }

    let band = TargetBand::default();
    let response = state.store().update(&id, |learner| {
        if let Some(name) = name {
            learner.profile.name = Some(name).filter(|name| !name.is_empty());
        }
        if let Some(age) = payload.age {
            learner.profile.age = Some(age);
        }
        if let Some(grade) = payload.grade {
            learner.profile.grade = Some(grade.trim().to_string()).filter(|grade| !grade.is_empty());
        }
        if let Some(target) = payload.target_success {
            learner.planner.target_success = band.clamp_target(target);
        }
        ProfileResponse {
            profile: learner.profile.clone(),
            target_success: learner.planner.target_success,
        }
    })?;
    Ok(ok(response))
}
