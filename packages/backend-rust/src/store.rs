//! Learner state persistence
//!
//! One JSON document per learner under the data directory, cached in memory.
//! The cache is authoritative: a failed write is logged and the request still
//! succeeds with the in-memory state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use galaxy_algo::{
    default_tracking, AddendTracking, MasteryStore, PlanItem, ProblemHistory, ReviewEntry,
    StageAchievement, TargetBand, TimelineEntry, MAX_ADDEND,
};

/// Newest timeline entries kept per learner
pub const MAX_TIMELINE_ENTRIES: usize = 500;

/// Recent attempts kept for difficulty adjustment
pub const MAX_RECENT_ATTEMPTS: usize = 10;

const MAX_LEARNER_ID_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid learner id: {0}")]
    InvalidId(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ==================== Learner State ====================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearnerProfile {
    pub name: Option<String>,
    pub age: Option<f64>,
    pub grade: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyTotal {
    pub attempts: u32,
    pub correct: u32,
    pub seconds: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrugglingProblem {
    pub a: u8,
    pub b: u8,
    pub attempts: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
    pub total_problems_attempted: u64,
    pub total_correct: u64,
    /// Seconds
    pub total_time_spent: f64,
    pub average_time_per_problem: f64,
    /// Consecutive practice days
    pub current_streak: u32,
    pub longest_streak: u32,
    /// `YYYY-MM-DD` of the last answered problem
    pub last_practice_day: Option<String>,
    pub problem_history: BTreeMap<String, ProblemHistory>,
    pub struggling_problems: Vec<StrugglingProblem>,
    pub answers_timeline: Vec<TimelineEntry>,
    pub daily_totals: BTreeMap<String, DailyTotal>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecentAttempt {
    pub correct: bool,
    pub ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdaptiveLearning {
    pub current_difficulty: Difficulty,
    pub struggles_detected: u32,
    pub consecutive_correct: u32,
    pub needs_review: Vec<ReviewEntry>,
    pub recent_attempts: Vec<RecentAttempt>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanSummary {
    pub plan_id: String,
    pub source: String,
    pub generated_at: i64,
    pub item_count: usize,
    pub rate_limited_for: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerState {
    pub mastery: MasteryStore,
    pub target_success: f64,
    pub plan_queue: Vec<PlanItem>,
    pub last_plan: Option<PlanSummary>,
}

impl Default for PlannerState {
    fn default() -> Self {
        Self {
            mastery: MasteryStore::new(),
            target_success: TargetBand::default().midpoint,
            plan_queue: Vec::new(),
            last_plan: None,
        }
    }
}

/// Progress of a stage session that has not finished yet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageRun {
    pub stage_id: String,
    pub attempts: u32,
    pub correct: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearnerState {
    pub learner_id: String,
    pub profile: LearnerProfile,
    pub statistics: Statistics,
    pub mastery_tracking: AddendTracking,
    pub adaptive: AdaptiveLearning,
    pub planner: PlannerState,
    pub stage_achievements: BTreeMap<String, StageAchievement>,
    pub active_stage_run: Option<StageRun>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl Default for LearnerState {
    fn default() -> Self {
        Self {
            learner_id: String::new(),
            profile: LearnerProfile::default(),
            statistics: Statistics::default(),
            mastery_tracking: default_tracking(),
            adaptive: AdaptiveLearning::default(),
            planner: PlannerState::default(),
            stage_achievements: BTreeMap::new(),
            active_stage_run: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl LearnerState {
    pub fn new(learner_id: impl Into<String>, now: i64) -> Self {
        Self {
            learner_id: learner_id.into(),
            created_at: Some(now),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    /// Repair a loaded document: fill missing addends, floor counters,
    /// drop entries naming facts out of range, trim oversized lists, clamp
    /// the target into the band
    pub fn normalize(&mut self) {
        for (addend, node) in default_tracking() {
            self.mastery_tracking.entry(addend).or_insert(node);
        }
        self.planner.mastery.normalize();

        let in_range = |a: u8, b: u8| a <= MAX_ADDEND && b <= MAX_ADDEND;
        let mut seen = HashSet::new();
        self.adaptive.needs_review.retain_mut(|entry| {
            if !in_range(entry.a, entry.b) {
                return false;
            }
            entry.key = entry.fact().key();
            seen.insert(entry.key.clone())
        });
        self.planner.plan_queue.retain_mut(|item| {
            if !in_range(item.a, item.b) {
                return false;
            }
            item.answer = item.fact().answer();
            true
        });
        self.statistics.answers_timeline.retain(|entry| in_range(entry.a, entry.b));
        if self
            .active_stage_run
            .as_ref()
            .is_some_and(|run| run.stage_id.is_empty())
        {
            self.active_stage_run = None;
        }

        let band = TargetBand::default();
        self.planner.target_success = band.clamp_target(self.planner.target_success);

        let timeline = &mut self.statistics.answers_timeline;
        if timeline.len() > MAX_TIMELINE_ENTRIES {
            let overflow = timeline.len() - MAX_TIMELINE_ENTRIES;
            timeline.drain(..overflow);
        }
        let recent = &mut self.adaptive.recent_attempts;
        if recent.len() > MAX_RECENT_ATTEMPTS {
            let overflow = recent.len() - MAX_RECENT_ATTEMPTS;
            recent.drain(..overflow);
        }
    }
}

// ==================== Store ====================

/// Per-learner file writer; holds the revision last written to disk
type Writer = Arc<Mutex<u64>>;

pub struct LearnerStore {
    dir: PathBuf,
    learners: RwLock<HashMap<String, LearnerState>>,
    /// Bumped under the `learners` write lock, so revisions of one learner
    /// are ordered the same way as its updates
    revision: AtomicU64,
    writers: Mutex<HashMap<String, Writer>>,
}

impl LearnerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            learners: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn validate_id(id: &str) -> Result<(), StoreError> {
        let valid = !id.is_empty()
            && id.len() <= MAX_LEARNER_ID_LEN
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(StoreError::InvalidId(id.to_string()))
        }
    }

    /// Clone of the learner's state, loading or creating it on first use
    pub fn snapshot(&self, id: &str) -> Result<LearnerState, StoreError> {
        Self::validate_id(id)?;
        if let Some(state) = self.learners.read().get(id) {
            return Ok(state.clone());
        }
        self.ensure_loaded(id);
        let learners = self.learners.read();
        Ok(learners.get(id).cloned().unwrap_or_else(|| LearnerState::new(id, now_ms())))
    }

    /// Mutate the learner's state and persist the result
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut LearnerState) -> R) -> Result<R, StoreError> {
        Self::validate_id(id)?;
        self.ensure_loaded(id);

        let (result, revision, serialized) = {
            let mut learners = self.learners.write();
            let state = learners
                .entry(id.to_string())
                .or_insert_with(|| LearnerState::new(id, now_ms()));
            let result = f(state);
            state.updated_at = Some(now_ms());
            let revision = self.revision.fetch_add(1, Ordering::Relaxed) + 1;
            (result, revision, serde_json::to_vec_pretty(state))
        };

        match serialized {
            Ok(bytes) => self.persist(id, revision, &bytes),
            Err(err) => warn!(learner_id = %id, error = %err, "failed to serialize learner state"),
        }
        Ok(result)
    }

    fn ensure_loaded(&self, id: &str) {
        if self.learners.read().contains_key(id) {
            return;
        }
        let loaded = self.load_from_disk(id);
        self.learners.write().entry(id.to_string()).or_insert(loaded);
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn load_from_disk(&self, id: &str) -> LearnerState {
        let path = self.path_for(id);
        match read_state(&path) {
            Ok(Some(mut state)) => {
                state.learner_id = id.to_string();
                state.normalize();
                debug!(learner_id = %id, "learner state loaded");
                state
            }
            Ok(None) => LearnerState::new(id, now_ms()),
            Err(err) => {
                warn!(learner_id = %id, error = %err, "unreadable learner state, starting fresh");
                let backup = path.with_extension("json.corrupt");
                if let Err(err) = std::fs::rename(&path, &backup) {
                    warn!(learner_id = %id, error = %err, "failed to move unreadable state aside");
                }
                LearnerState::new(id, now_ms())
            }
        }
    }

    /// Write `bytes` unless a newer revision of the learner already landed
    fn persist(&self, id: &str, revision: u64, bytes: &[u8]) {
        let writer = Arc::clone(self.writers.lock().entry(id.to_string()).or_default());
        let mut written = writer.lock();
        if *written >= revision {
            debug!(learner_id = %id, revision, written = *written, "skipping stale learner write");
            return;
        }
        match write_atomic(&self.dir, &self.path_for(id), bytes) {
            Ok(()) => *written = revision,
            Err(err) => warn!(learner_id = %id, error = %err, "failed to persist learner state"),
        }
    }
}

fn read_state(path: &Path) -> Result<Option<LearnerState>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
