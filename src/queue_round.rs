use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::RoundError;
use crate::fairness::QueueView;
use crate::job::{JobDecision, JobHandle, JobId};
use crate::rate_limiter::RateLimiter;
use crate::resource::{PriorityClassResources, ResourceVector};

/// Per-queue bookkeeping within one scheduling round.
///
/// Owned by `Round` in its `queue→QueueRound` map; there is no back-pointer to
/// `Round` (see `SPEC_FULL.md` §9) because every mutator that needs both levels
/// is called from `Round`, which already holds `&mut self` over both.
#[derive(Debug)]
pub struct QueueRound {
    name: String,
    weight: f64,
    limiter: Arc<dyn RateLimiter>,
    allocated: ResourceVector,
    allocated_by_class: PriorityClassResources,
    scheduled_by_class: PriorityClassResources,
    evicted_by_class: PriorityClassResources,
    successful: HashMap<JobId, JobDecision>,
    unsuccessful: HashMap<JobId, JobDecision>,
    evicted: HashMap<JobId, JobDecision>,
}

impl QueueRound {
    pub(crate) fn new(
        name: String,
        weight: f64,
        allocated_by_class: PriorityClassResources,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let allocated = allocated_by_class.total();
        Self {
            name,
            weight,
            limiter,
            allocated,
            allocated_by_class,
            scheduled_by_class: PriorityClassResources::new(),
            evicted_by_class: PriorityClassResources::new(),
            successful: HashMap::new(),
            unsuccessful: HashMap::new(),
            evicted: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    pub fn allocated_by_class(&self) -> &PriorityClassResources {
        &self.allocated_by_class
    }

    pub fn scheduled_by_class(&self) -> &PriorityClassResources {
        &self.scheduled_by_class
    }

    pub fn evicted_by_class(&self) -> &PriorityClassResources {
        &self.evicted_by_class
    }

    pub fn successful(&self) -> impl Iterator<Item = &JobDecision> {
        self.successful.values()
    }

    pub fn unsuccessful(&self) -> impl Iterator<Item = &JobDecision> {
        self.unsuccessful.values()
    }

    pub fn evicted(&self) -> impl Iterator<Item = &JobDecision> {
        self.evicted.values()
    }

    pub fn num_successful(&self) -> usize {
        self.successful.len()
    }

    pub fn num_unsuccessful(&self) -> usize {
        self.unsuccessful.len()
    }

    pub fn num_evicted(&self) -> usize {
        self.evicted.len()
    }

    pub fn has_activity(&self) -> bool {
        !self.successful.is_empty() || !self.evicted.is_empty()
    }

    /// Adds a `JobDecision` to this queue's bookkeeping.
    ///
    /// Returns whether the job id was in `evicted` at entry. See `SPEC_FULL.md`
    /// §4.2 for the full accounting table.
    pub fn add_job_decision(&mut self, decision: JobDecision) -> Result<bool, RoundError> {
        if self.successful.contains_key(&decision.job_id) || self.unsuccessful.contains_key(&decision.job_id) {
            warn!(job_id = %decision.job_id, queue = %self.name, "duplicate job decision rejected");
            return Err(RoundError::DuplicateJobDecision(decision.job_id));
        }

        let was_evicted = self.evicted.contains_key(&decision.job_id);

        if decision.is_successful() {
            let pod_requirements = decision
                .pod_requirements
                .clone()
                .ok_or_else(|| RoundError::MissingPodRequirements(decision.job_id.clone()))?;
            let class = pod_requirements.priority_class.as_str();
            let requests = &pod_requirements.requests;

            self.allocated.add(requests);
            self.allocated_by_class.add(class, requests);

            if was_evicted {
                self.evicted.remove(&decision.job_id);
                self.evicted_by_class.sub(class, requests);
                debug!(job_id = %decision.job_id, queue = %self.name, "rescheduled a previously-evicted job");
            } else {
                self.scheduled_by_class.add(class, requests);
                debug!(job_id = %decision.job_id, queue = %self.name, "recorded new successful job decision");
                self.successful.insert(decision.job_id.clone(), decision);
            }
        } else {
            debug!(job_id = %decision.job_id, queue = %self.name, reason = %decision.unschedulable_reason, "recorded unsuccessful job decision");
            self.unsuccessful.insert(decision.job_id.clone(), decision);
        }

        Ok(was_evicted)
    }

    /// Evicts `job_id`, whose priority class and resource requests are supplied
    /// by the caller (via the job handle's basic `resource_requirements`/
    /// `priority_class_name` capabilities, which remain available even when a
    /// full `PodRequirements` cannot be resolved).
    ///
    /// Returns whether the job id was in `successful` at entry.
    pub fn evict_job(
        &mut self,
        job_id: JobId,
        priority_class: &str,
        requests: &ResourceVector,
        job_handle: Option<Arc<dyn JobHandle>>,
    ) -> Result<bool, RoundError> {
        if self.unsuccessful.contains_key(&job_id) || self.evicted.contains_key(&job_id) {
            warn!(job_id = %job_id, queue = %self.name, "invalid eviction rejected");
            return Err(RoundError::InvalidEviction(job_id));
        }

        let was_scheduled = self.successful.contains_key(&job_id);

        self.allocated.sub(requests);
        self.allocated_by_class.sub(priority_class, requests);

        if was_scheduled {
            self.successful.remove(&job_id);
            self.scheduled_by_class.sub(priority_class, requests);
            debug!(job_id = %job_id, queue = %self.name, "evicted a job scheduled earlier this round");
        } else {
            self.evicted_by_class.add(priority_class, requests);
            let decision = JobDecision {
                created_at: chrono::Utc::now(),
                job_id: job_id.clone(),
                queue: self.name.clone(),
                job_handle,
                pod_requirements: None,
                unschedulable_reason: String::new(),
                pod_decision: None,
            };
            self.evicted.insert(job_id, decision);
            debug!(queue = %self.name, "evicted a previously-running job");
        }

        Ok(was_scheduled)
    }

    /// Drops the job handle from every retained `JobDecision` — see
    /// `Round::clear_job_specs`.
    pub(crate) fn clear_job_specs(&mut self) {
        for decision in self.successful.values_mut() {
            decision.clear_job_handle();
        }
        for decision in self.unsuccessful.values_mut() {
            decision.clear_job_handle();
        }
        for decision in self.evicted.values_mut() {
            decision.clear_job_handle();
        }
    }
}

impl QueueView for QueueRound {
    fn allocation(&self) -> ResourceVector {
        self.allocated.clone()
    }

    fn weight(&self) -> f64 {
        self.weight
    }
}
