use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::config::Config;
use crate::services::ai_planner::RemotePlanner;
use crate::store::LearnerStore;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    config: Arc<Config>,
    store: Arc<LearnerStore>,
    planner: Arc<RemotePlanner>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(LearnerStore::new(config.data_dir.clone()));
        let planner = Arc::new(RemotePlanner::new(config.planner.clone()));
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            config: Arc::new(config),
            store,
            planner,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LearnerStore {
        &self.store
    }

    pub fn planner(&self) -> &RemotePlanner {
        &self.planner
    }

    pub fn session_size(&self) -> usize {
        self.config.session_size
    }
}
