//! Job catalog, phases and sequence plans
//!
//! Every job belongs to one of five phases that always run in this order:
//!
//! | Phase       | Contents                                                  |
//! |-------------|-----------------------------------------------------------|
//! | `source`    | primary entities, no sync dependency within the run      |
//! | `expensive` | one remote call per entity; weekly / on demand only      |
//! | `transform` | derived tables built from source and expensive output    |
//! | `process`   | local batch post-processing                               |
//! | `export`    | ships reconciled state elsewhere                          |
//!
//! Inside `source`, [`SOURCE_ORDER`] fixes the dependency order.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::config::SyncConfig;
use super::jobs::{
    CamperHistoryJob, CustomValuesJob, CustomValuesTarget, EntityDefinition, EntitySyncJob,
};
use super::registry::JobRegistry;
use super::source::SourceClient;
use super::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Source,
    Expensive,
    Transform,
    Process,
    Export,
}

impl Phase {
    /// Execution order
    pub const ALL: [Phase; 5] = [
        Phase::Source,
        Phase::Expensive,
        Phase::Transform,
        Phase::Process,
        Phase::Export,
    ];
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Source => write!(f, "source"),
            Phase::Expensive => write!(f, "expensive"),
            Phase::Transform => write!(f, "transform"),
            Phase::Process => write!(f, "process"),
            Phase::Export => write!(f, "export"),
        }
    }
}

/// Which scheduled sequence picks a job up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    /// Slow-changing global definitions
    Weekly,
    /// Only run when explicitly asked for
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub phase: Phase,
    pub cadence: Cadence,
}

impl JobSpec {
    pub fn new(name: &str, phase: Phase, cadence: Cadence) -> Self {
        Self {
            name: name.to_string(),
            phase,
            cadence,
        }
    }
}

/// Dependency order of the source phase
pub const SOURCE_ORDER: [&str; 10] = [
    "session_groups",
    "sessions",
    "attendees",
    "persons",
    "households",
    "bunks",
    "bunk_plans",
    "bunk_assignments",
    "staff",
    "financial_transactions",
];

pub const WEEKLY_JOBS: [&str; 3] = ["divisions", "custom_field_definitions", "financial_lookups"];

pub const EXPENSIVE_JOBS: [&str; 2] = ["person_custom_values", "household_custom_values"];

pub const TRANSFORM_JOBS: [&str; 1] = ["camper_history"];

/// One step of a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStep {
    Job(String),
    /// Jobs writing disjoint collections, run at the same time
    Parallel(Vec<String>),
}

impl PlanStep {
    pub fn job_names(&self) -> Vec<String> {
        match self {
            PlanStep::Job(name) => vec![name.clone()],
            PlanStep::Parallel(names) => names.clone(),
        }
    }
}

/// Ordered steps of a named sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePlan {
    pub name: String,
    pub steps: Vec<PlanStep>,
}

impl SequencePlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Every job name in run order
    pub fn job_names(&self) -> Vec<String> {
        self.steps.iter().flat_map(PlanStep::job_names).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append another plan's steps.
    pub fn then(mut self, other: SequencePlan) -> Self {
        self.steps.extend(other.steps);
        self
    }

    /// Keep only the jobs `keep` accepts, dropping steps left empty.
    pub fn retain_jobs<F>(mut self, mut keep: F) -> Self
    where
        F: FnMut(&str) -> bool,
    {
        self.steps = self
            .steps
            .into_iter()
            .filter_map(|step| match step {
                PlanStep::Job(name) => keep(name.as_str()).then_some(PlanStep::Job(name)),
                PlanStep::Parallel(names) => {
                    let names: Vec<String> = names.into_iter().filter(|n| keep(n.as_str())).collect();
                    match names.len() {
                        0 => None,
                        1 => names.into_iter().next().map(PlanStep::Job),
                        _ => Some(PlanStep::Parallel(names)),
                    }
                },
            })
            .collect();
        self
    }

    /// Keep only jobs present in `registry`, warning about the rest.
    pub fn retain_registered(self, registry: &JobRegistry) -> Self {
        let plan_name = self.name.clone();
        self.retain_jobs(|name| {
            let known = registry.contains(name);
            if !known {
                warn!(sequence = %plan_name, job = %name, "Skipping unregistered job");
            }
            known
        })
    }
}

/// Phase and cadence of every known job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    specs: Vec<JobSpec>,
}

impl Default for Catalog {
    fn default() -> Self {
        let mut specs: Vec<JobSpec> = WEEKLY_JOBS
            .iter()
            .map(|name| JobSpec::new(name, Phase::Source, Cadence::Weekly))
            .collect();
        specs.extend(
            SOURCE_ORDER
                .iter()
                .map(|name| JobSpec::new(name, Phase::Source, Cadence::Daily)),
        );
        specs.extend(
            EXPENSIVE_JOBS
                .iter()
                .map(|name| JobSpec::new(name, Phase::Expensive, Cadence::OnDemand)),
        );
        specs.extend(
            TRANSFORM_JOBS
                .iter()
                .map(|name| JobSpec::new(name, Phase::Transform, Cadence::Daily)),
        );
        Self { specs }
    }
}

impl Catalog {
    pub fn empty() -> Self {
        Self { specs: Vec::new() }
    }

    /// Add or replace a spec.
    pub fn with(mut self, spec: JobSpec) -> Self {
        self.specs.retain(|s| s.name != spec.name);
        self.specs.push(spec);
        self
    }

    pub fn spec(&self, name: &str) -> Option<&JobSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn specs(&self) -> &[JobSpec] {
        &self.specs
    }

    /// Jobs of `phase` with `cadence`, source jobs in dependency order
    fn phase_jobs(&self, phase: Phase, cadence: Cadence) -> Vec<String> {
        let mut jobs: Vec<&JobSpec> = self
            .specs
            .iter()
            .filter(|s| s.phase == phase && s.cadence == cadence)
            .collect();
        if phase == Phase::Source {
            let rank = |name: &str| {
                SOURCE_ORDER
                    .iter()
                    .position(|n| *n == name)
                    .unwrap_or(SOURCE_ORDER.len())
            };
            jobs.sort_by_key(|s| rank(s.name.as_str()));
        }
        jobs.into_iter().map(|s| s.name.clone()).collect()
    }

    /// Source, transform, process and export jobs of the daily cadence, one at a time.
    pub fn daily_plan(&self) -> SequencePlan {
        let mut plan = SequencePlan::new("daily");
        for phase in Phase::ALL.into_iter().filter(|p| *p != Phase::Expensive) {
            plan.steps.extend(
                self.phase_jobs(phase, Cadence::Daily)
                    .into_iter()
                    .map(PlanStep::Job),
            );
        }
        plan
    }

    /// Weekly definition jobs, one at a time.
    pub fn weekly_plan(&self) -> SequencePlan {
        let mut plan = SequencePlan::new("weekly");
        for phase in Phase::ALL {
            plan.steps.extend(
                self.phase_jobs(phase, Cadence::Weekly)
                    .into_iter()
                    .map(PlanStep::Job),
            );
        }
        plan
    }

    /// Every expensive-phase job, all at once.
    pub fn custom_values_plan(&self) -> SequencePlan {
        let names: Vec<String> = self
            .specs
            .iter()
            .filter(|s| s.phase == Phase::Expensive)
            .map(|s| s.name.clone())
            .collect();
        let mut plan = SequencePlan::new("custom_values");
        if !names.is_empty() {
            plan.steps.push(PlanStep::Parallel(names));
        }
        plan
    }

    /// Daily plan with the expensive group placed between source and transform.
    pub fn full_plan(&self, name: &str, include_expensive: bool) -> SequencePlan {
        let daily = self.daily_plan();
        if !include_expensive {
            return SequencePlan {
                name: name.to_string(),
                steps: daily.steps,
            };
        }

        let is_source = |step: &PlanStep| match step {
            PlanStep::Job(job) => self.spec(job).is_some_and(|s| s.phase == Phase::Source),
            PlanStep::Parallel(_) => false,
        };
        let split = daily.steps.iter().take_while(|s| is_source(s)).count();
        let mut steps = daily.steps;
        let rest = steps.split_off(split);
        steps.extend(self.custom_values_plan().steps);
        steps.extend(rest);

        SequencePlan {
            name: name.to_string(),
            steps,
        }
    }
}

/// Register the standard job set against a source and a store.
pub fn build_registry(
    config: &SyncConfig,
    source: Arc<dyn SourceClient>,
    store: Arc<dyn RecordStore>,
) -> JobRegistry {
    let entity_job = |name: &str, definitions: Vec<EntityDefinition>| -> Arc<EntitySyncJob> {
        Arc::new(
            EntitySyncJob::new(name, definitions, source.clone(), store.clone())
                .page_size(config.page_size),
        )
    };
    let scoped = |name: &str, key: &[&str]| entity_job(name, vec![EntityDefinition::scoped(name, name, key)]);
    let global = |name: &str| entity_job(name, vec![EntityDefinition::global(name, name, &["id"])]);

    let mut registry = JobRegistry::new();

    // Weekly, year-independent
    registry.register(global("divisions"));
    registry.register(global("custom_field_definitions"));
    registry.register(entity_job(
        "financial_lookups",
        vec![
            EntityDefinition::global("financial_categories", "financial_categories", &["id"]),
            EntityDefinition::global("payment_methods", "payment_methods", &["id"]),
        ],
    ));

    // Source, in dependency order
    registry.register(scoped("session_groups", &["id"]));
    registry.register(scoped("sessions", &["id"]));
    registry.register(scoped("attendees", &["person_id", "session_id"]));
    registry.register(scoped("persons", &["id"]));
    registry.register(scoped("households", &["id"]));
    registry.register(scoped("bunks", &["id"]));
    registry.register(scoped("bunk_plans", &["id"]));
    registry.register(scoped("bunk_assignments", &["person_id", "session_id"]));
    registry.register(scoped("staff", &["person_id"]));
    registry.register(scoped("financial_transactions", &["id"]));

    // Expensive
    registry.register(Arc::new(CustomValuesJob::new(
        "person_custom_values",
        CustomValuesTarget::new("persons", "persons/custom_values", "person_custom_values", "person_id"),
        source.clone(),
        store.clone(),
    )));
    registry.register(Arc::new(CustomValuesJob::new(
        "household_custom_values",
        CustomValuesTarget::new(
            "households",
            "households/custom_values",
            "household_custom_values",
            "household_id",
        ),
        source.clone(),
        store.clone(),
    )));

    // Transform
    registry.register(Arc::new(CamperHistoryJob::new(source.current_year(), store.clone())));

    registry
}
