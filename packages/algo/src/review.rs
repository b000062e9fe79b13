//! Spaced review queue for missed facts
//!
//! A missed fact is scheduled at the first interval. Missing it again while
//! queued pushes it one interval further out. Facts leave the queue once
//! their accuracy recovers.

use serde::{Deserialize, Serialize};

use crate::types::AdditionFact;

/// Review intervals in milliseconds: 10 min, 1 h, 1 day
pub const REVIEW_INTERVALS_MS: [i64; 3] = [600_000, 3_600_000, 86_400_000];

/// Maximum queued facts; the oldest due entries are dropped first
pub const MAX_REVIEW_QUEUE: usize = 20;

/// Accuracy at which a fact leaves the queue
pub const REVIEW_RECOVERY_ACCURACY: f64 = 0.8;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewEntry {
    pub key: String,
    pub a: u8,
    pub b: u8,
    pub due_at: i64,
    #[serde(alias = "stage")]
    pub interval_index: usize,
}

impl ReviewEntry {
    pub fn fact(&self) -> AdditionFact {
        AdditionFact::new(self.a, self.b)
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.due_at <= now
    }
}

/// Queue a missed fact, or move an already queued one to its next interval
pub fn schedule_review(queue: &mut Vec<ReviewEntry>, fact: AdditionFact, now: i64) {
    let key = fact.key();
    if let Some(entry) = queue.iter_mut().find(|entry| entry.key == key) {
        let next = (entry.interval_index + 1).min(REVIEW_INTERVALS_MS.len() - 1);
        entry.interval_index = next;
        entry.due_at = now + REVIEW_INTERVALS_MS[next];
    } else {
        queue.push(ReviewEntry {
            key,
            a: fact.a,
            b: fact.b,
            due_at: now + REVIEW_INTERVALS_MS[0],
            interval_index: 0,
        });
    }

    if queue.len() > MAX_REVIEW_QUEUE {
        queue.sort_by_key(|entry| entry.due_at);
        let overflow = queue.len() - MAX_REVIEW_QUEUE;
        queue.drain(..overflow);
    }
}

/// Drop `key` once its accuracy reaches [`REVIEW_RECOVERY_ACCURACY`]
pub fn clear_if_recovered(queue: &mut Vec<ReviewEntry>, key: &str, accuracy: f64) {
    if accuracy >= REVIEW_RECOVERY_ACCURACY {
        queue.retain(|entry| entry.key != key);
    }
}

/// Split the queue into up to `limit` due entries (earliest first) and the rest
pub fn pick_review_due(
    queue: &[ReviewEntry],
    now: i64,
    limit: usize,
) -> (Vec<ReviewEntry>, Vec<ReviewEntry>) {
    let mut due: Vec<ReviewEntry> = queue.iter().filter(|entry| entry.is_due(now)).cloned().collect();
    due.sort_by_key(|entry| entry.due_at);
    let picked: Vec<ReviewEntry> = due.into_iter().take(limit).collect();
    let remaining = queue
        .iter()
        .filter(|entry| !picked.iter().any(|p| p.key == entry.key))
        .cloned()
        .collect();
    (picked, remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_and_pick() {
        let mut queue = Vec::new();
        schedule_review(&mut queue, AdditionFact::new(2, 3), 0);
        schedule_review(&mut queue, AdditionFact::new(4, 4), 300_000);

        let (due, rest) = pick_review_due(&queue, 600_000, 5);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, "2+3");
        assert_eq!(rest.len(), 1);

        let (due, rest) = pick_review_due(&queue, 900_000, 5);
        assert_eq!(due.len(), 2);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_repeat_miss_moves_to_next_interval() {
        let mut queue = Vec::new();
        let fact = AdditionFact::new(3, 4);
        schedule_review(&mut queue, fact, 0);
        assert_eq!(queue[0].interval_index, 0);
        assert_eq!(queue[0].due_at, 600_000);

        schedule_review(&mut queue, fact, 1_000);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].interval_index, 1);
        assert_eq!(queue[0].due_at, 1_000 + 3_600_000);

        schedule_review(&mut queue, fact, 2_000);
        schedule_review(&mut queue, fact, 3_000);
        assert_eq!(queue[0].interval_index, 2);
        assert_eq!(queue[0].due_at, 3_000 + 86_400_000);
    }

    #[test]
    fn test_entry_accepts_stage_field() {
        let entry: ReviewEntry =
            serde_json::from_str(r#"{"key":"1+2","a":1,"b":2,"stage":1,"dueAt":5}"#).unwrap();
        assert_eq!(entry.interval_index, 1);
        assert_eq!(entry.due_at, 5);
    }

    #[test]
    fn test_recovered_fact_leaves_queue() {
        let mut queue = Vec::new();
        schedule_review(&mut queue, AdditionFact::new(3, 3), 0);
        clear_if_recovered(&mut queue, "3+3", 0.5);
        assert_eq!(queue.len(), 1);
        clear_if_recovered(&mut queue, "3+3", 0.8);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_is_capped() {
        let mut queue = Vec::new();
        for a in 0..=4u8 {
            for b in 0..=4u8 {
                schedule_review(&mut queue, AdditionFact::new(a, b), (a as i64) * 10 + b as i64);
            }
        }
        assert_eq!(queue.len(), MAX_REVIEW_QUEUE);
        assert!(queue.iter().all(|entry| entry.key != "0+0"));
    }
}
