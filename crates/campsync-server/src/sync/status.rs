//! Live and last-completed job status
//!
//! The tracker itself is plain data; the scheduler keeps it behind its shared
//! lock and every read returns an owned copy.
//!
//! Per job name: `(none) -> pending -> running -> success | failed | cancelled`.
//! `pending` is never stored. It is synthesized for names queued in the active
//! sequence that have not started and have not completed since the sequence
//! began.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::stats::SyncStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failed,
    /// Stopped by its cancellation signal; not an error
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failed | JobState::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Success => write!(f, "success"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "success" => Ok(JobState::Success),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid job state: {}", s)),
        }
    }
}

/// Status of one job run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    /// Identity of the run; shared between a pre-mark and the worker that adopts it
    pub run_id: Uuid,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub stats: Option<SyncStats>,
}

impl JobStatus {
    fn running(name: &str) -> Self {
        Self {
            name: name.to_string(),
            run_id: Uuid::new_v4(),
            state: JobState::Running,
            started_at: Some(Utc::now()),
            finished_at: None,
            error: None,
            stats: None,
        }
    }

    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            run_id: Uuid::nil(),
            state: JobState::Pending,
            started_at: None,
            finished_at: None,
            error: None,
            stats: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }
}

/// The composite sequence currently in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSequence {
    pub name: String,
    /// Job names in run order
    pub queue: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// How a finished run ended
#[derive(Debug, Clone)]
pub struct Completion {
    pub state: JobState,
    pub error: Option<String>,
    pub stats: SyncStats,
}

#[derive(Debug, Default)]
pub struct StatusTracker {
    running: HashMap<String, JobStatus>,
    completed: HashMap<String, JobStatus>,
    sequence: Option<ActiveSequence>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a running status for `name`, or return the one already there.
    ///
    /// The first caller creates the status with its run id and start time; any
    /// later caller before completion gets that same status back unchanged.
    pub fn mark_running(&mut self, name: &str) -> JobStatus {
        self.running
            .entry(name.to_string())
            .or_insert_with(|| JobStatus::running(name))
            .clone()
    }

    /// Retire the running status of `name` into the completed map.
    ///
    /// A run id that does not match the live status still completes, so a
    /// status is never left stuck in `running`.
    pub fn finish(&mut self, name: &str, run_id: Uuid, completion: Completion) -> JobStatus {
        let mut status = match self.running.remove(name) {
            Some(status) if status.run_id == run_id => status,
            Some(other) => {
                tracing::warn!(job = %name, expected = %run_id, found = %other.run_id, "Run id mismatch on completion");
                other
            },
            None => JobStatus::running(name),
        };

        status.state = completion.state;
        status.finished_at = Some(Utc::now());
        status.error = completion.error;
        status.stats = Some(completion.stats);

        self.completed.insert(name.to_string(), status.clone());
        status
    }

    /// Current status of `name`: running, then pending, then last completed.
    pub fn status(&self, name: &str) -> Option<JobStatus> {
        if let Some(running) = self.running.get(name) {
            return Some(running.clone());
        }

        let completed = self.completed.get(name);
        if let Some(sequence) = &self.sequence {
            let queued = sequence.queue.iter().any(|n| n == name);
            let done_this_sequence = completed
                .and_then(|c| c.finished_at)
                .is_some_and(|t| t >= sequence.started_at);
            if queued && !done_this_sequence {
                return Some(JobStatus::pending(name));
            }
        }

        completed.cloned()
    }

    pub fn completed(&self, name: &str) -> Option<JobStatus> {
        self.completed.get(name).cloned()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    /// Names with a live running status, sorted
    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn begin_sequence(&mut self, name: &str, queue: Vec<String>) {
        self.sequence = Some(ActiveSequence {
            name: name.to_string(),
            queue,
            started_at: Utc::now(),
        });
    }

    pub fn end_sequence(&mut self) {
        self.sequence = None;
    }

    pub fn sequence(&self) -> Option<ActiveSequence> {
        self.sequence.clone()
    }

    pub fn is_sequence_active(&self) -> bool {
        self.sequence.is_some()
    }
}
