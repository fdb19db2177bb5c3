use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::RoundError;
use crate::fairness::FairnessCostProvider;
use crate::gang::GangDecision;
use crate::job::{JobDecision, JobHandle, JobId};
use crate::priority::PriorityClassCatalogue;
use crate::queue_round::QueueRound;
use crate::rate_limiter::RateLimiter;
use crate::reporting::RoundReport;
use crate::resource::{PriorityClassResources, ResourceVector};
use crate::scheduling_key::{InterningKeyGenerator, SchedulingKey, SchedulingKeyGenerator};

/// Per-executor, per-invocation scheduling context.
///
/// A `Round` owns every `QueueRound` participating in it, its infeasible-key
/// cache, and its own deep-copied resource vectors. It is not safe to mutate
/// from more than one thread at a time (see `SPEC_FULL.md` §5) — the type makes
/// no attempt at interior synchronisation because it is meant to be driven
/// end-to-end by one scheduler task.
pub struct Round {
    executor_id: String,
    pool: String,
    catalogue: PriorityClassCatalogue,
    cost_provider: Arc<dyn FairnessCostProvider>,
    round_limiter: Arc<dyn RateLimiter>,
    total_resources: ResourceVector,

    scheduled_resources: ResourceVector,
    evicted_resources: ResourceVector,
    scheduled_resources_by_class: PriorityClassResources,
    evicted_resources_by_class: PriorityClassResources,

    num_scheduled_jobs: i64,
    num_evicted_jobs: i64,
    num_scheduled_gangs: i64,

    weight_sum: f64,

    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    termination_reason: Option<String>,

    key_generator: Box<dyn SchedulingKeyGenerator>,
    infeasible_keys: HashMap<SchedulingKey, JobDecision>,
    limits: crate::config::RoundLimits,

    queues: HashMap<String, QueueRound>,
}

impl Round {
    pub fn new(
        executor_id: impl Into<String>,
        pool: impl Into<String>,
        catalogue: PriorityClassCatalogue,
        cost_provider: Arc<dyn FairnessCostProvider>,
        round_limiter: Arc<dyn RateLimiter>,
        total_resources: ResourceVector,
    ) -> Self {
        Self::with_limits(
            executor_id,
            pool,
            catalogue,
            cost_provider,
            round_limiter,
            total_resources,
            crate::config::RoundLimits::default(),
        )
    }

    pub fn with_limits(
        executor_id: impl Into<String>,
        pool: impl Into<String>,
        catalogue: PriorityClassCatalogue,
        cost_provider: Arc<dyn FairnessCostProvider>,
        round_limiter: Arc<dyn RateLimiter>,
        total_resources: ResourceVector,
        limits: crate::config::RoundLimits,
    ) -> Self {
        let executor_id = executor_id.into();
        let pool = pool.into();
        info!(executor_id = %executor_id, pool = %pool, "starting scheduling round");
        Self {
            executor_id,
            pool,
            catalogue,
            cost_provider,
            round_limiter,
            total_resources,
            scheduled_resources: ResourceVector::new(),
            evicted_resources: ResourceVector::new(),
            scheduled_resources_by_class: PriorityClassResources::new(),
            evicted_resources_by_class: PriorityClassResources::new(),
            num_scheduled_jobs: 0,
            num_evicted_jobs: 0,
            num_scheduled_gangs: 0,
            weight_sum: 0.0,
            started_at: Utc::now(),
            finished_at: None,
            termination_reason: None,
            key_generator: Box::new(InterningKeyGenerator::new()),
            infeasible_keys: HashMap::new(),
            limits,
            queues: HashMap::new(),
        }
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn catalogue(&self) -> &PriorityClassCatalogue {
        &self.catalogue
    }

    pub fn total_resources(&self) -> &ResourceVector {
        &self.total_resources
    }

    pub fn scheduled_resources(&self) -> &ResourceVector {
        &self.scheduled_resources
    }

    pub fn evicted_resources(&self) -> &ResourceVector {
        &self.evicted_resources
    }

    pub fn scheduled_resources_by_class(&self) -> &PriorityClassResources {
        &self.scheduled_resources_by_class
    }

    pub fn evicted_resources_by_class(&self) -> &PriorityClassResources {
        &self.evicted_resources_by_class
    }

    pub fn num_scheduled_jobs(&self) -> i64 {
        self.num_scheduled_jobs
    }

    pub fn num_evicted_jobs(&self) -> i64 {
        self.num_evicted_jobs
    }

    pub fn num_scheduled_gangs(&self) -> i64 {
        self.num_scheduled_gangs
    }

    pub fn weight_sum(&self) -> f64 {
        self.weight_sum
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn termination_reason(&self) -> Option<&str> {
        self.termination_reason.as_deref()
    }

    pub fn round_limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.round_limiter
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(|s| s.as_str())
    }

    pub(crate) fn queues_iter(&self) -> impl Iterator<Item = (&str, &QueueRound)> {
        self.queues.iter().map(|(name, queue)| (name.as_str(), queue))
    }

    /// Registers a queue. Fails with `DuplicateQueue` if `name` is already
    /// registered.
    #[instrument(skip(self, queue_limiter, initial_allocated_by_class))]
    pub fn register_queue(
        &mut self,
        name: impl Into<String>,
        weight: f64,
        initial_allocated_by_class: Option<PriorityClassResources>,
        queue_limiter: Arc<dyn RateLimiter>,
    ) -> Result<(), RoundError> {
        let name = name.into();
        if self.queues.contains_key(&name) {
            warn!(queue = %name, "duplicate queue registration rejected");
            return Err(RoundError::DuplicateQueue(name));
        }
        let allocated_by_class = initial_allocated_by_class.unwrap_or_default();
        self.weight_sum += weight;
        self.queues.insert(
            name.clone(),
            QueueRound::new(name.clone(), weight, allocated_by_class, queue_limiter),
        );
        debug!(queue = %name, weight, "registered queue");
        Ok(())
    }

    pub fn get_queue(&self, name: &str) -> Option<&QueueRound> {
        self.queues.get(name)
    }

    /// Derives a job's scheduling key from its priority class (resolved via
    /// the round's catalogue, unknown ⇒ priority 0) and its placement-relevant
    /// fields. Takes a live job handle directly, so it is unaffected by
    /// `ClearJobSpecs` — that call only drops the handle retained inside
    /// already-recorded `JobDecision`s, never a handle a caller holds outside
    /// the round.
    pub fn scheduling_key_for(&mut self, job: &dyn JobHandle) -> SchedulingKey {
        let priority = self.catalogue.priority_of(job.priority_class_name());
        self.key_generator.key(
            job.node_selector(),
            job.affinity(),
            job.tolerations(),
            &job.resource_requirements(),
            priority,
        )
    }

    pub fn insert_infeasible_key(&mut self, key: SchedulingKey, decision: JobDecision) {
        if self.infeasible_keys.len() >= self.limits.max_infeasible_cache_entries
            && !self.infeasible_keys.contains_key(&key)
        {
            warn!("infeasible-key cache at capacity, dropping insert");
            return;
        }
        self.infeasible_keys.insert(key, decision);
    }

    pub fn get_infeasible(&self, key: &SchedulingKey) -> Option<&JobDecision> {
        self.infeasible_keys.get(key)
    }

    pub fn clear_infeasible_keys(&mut self) {
        debug!(count = self.infeasible_keys.len(), "clearing infeasible scheduling-key cache");
        self.infeasible_keys.clear();
    }

    pub fn num_infeasible_keys(&self) -> usize {
        self.infeasible_keys.len()
    }

    /// Applies one job decision: delegates to its `QueueRound`, then folds the
    /// returned "was pre-evicted" flag together with the decision's success
    /// verdict into the round's aggregates. Returns the "was pre-evicted" flag
    /// so gang-level callers can track it across members.
    #[instrument(skip(self, decision), fields(job_id = %decision.job_id, queue = %decision.queue))]
    pub fn apply_job_decision(&mut self, decision: JobDecision) -> Result<bool, RoundError> {
        let queue_name = decision.queue.clone();
        let is_successful = decision.is_successful();
        let job_id = decision.job_id.clone();
        let job_handle = decision.job_handle.clone();

        let queue_round = self
            .queues
            .get_mut(&queue_name)
            .ok_or_else(|| RoundError::UnknownQueue(queue_name.clone()))?;

        let pod_requirements = decision.pod_requirements.clone();
        let was_evicted = queue_round.add_job_decision(decision)?;

        if is_successful {
            let pod_requirements = pod_requirements.expect("QueueRound validated pod requirements");
            let class = pod_requirements.priority_class.as_str();
            let requests = &pod_requirements.requests;

            if was_evicted {
                self.evicted_resources.sub(requests);
                self.evicted_resources_by_class.sub(class, requests);
                self.num_evicted_jobs -= 1;
            } else {
                self.scheduled_resources.add(requests);
                self.scheduled_resources_by_class.add(class, requests);
                self.num_scheduled_jobs += 1;
            }

            if let Some(job_handle) = job_handle {
                let key = self.scheduling_key_for(job_handle.as_ref());
                if self.infeasible_keys.remove(&key).is_some() {
                    debug!(job_id = %job_id, "evicted stale infeasible-key cache entry on success");
                }
            }
        }

        Ok(was_evicted)
    }

    /// Applies every job decision in `gang`, in order, then increments
    /// `num_scheduled_gangs` iff every member ended successful and at least one
    /// was not pre-evicted. Stops and returns the first error encountered;
    /// members applied before that point remain committed (see `SPEC_FULL.md`
    /// §9, "Counter updates as transactions").
    pub fn apply_gang_decision(&mut self, gang: GangDecision) -> Result<(), RoundError> {
        let mut all_pre_evicted = true;
        let mut all_successful = true;

        for job in gang.jobs {
            let is_successful = job.is_successful();
            let was_evicted = self.apply_job_decision(job)?;
            all_pre_evicted &= was_evicted;
            all_successful &= is_successful;
        }

        if all_successful && !all_pre_evicted {
            self.num_scheduled_gangs += 1;
            debug!(queue = %gang.queue, "gang scheduled");
        }

        Ok(())
    }

    /// Evicts one job: delegates to its `QueueRound`, then folds the returned
    /// "was scheduled this round" flag into the round's aggregates.
    pub fn evict_job(&mut self, job: Arc<dyn JobHandle>) -> Result<bool, RoundError> {
        let queue_name = job.queue().to_string();
        let priority_class = job.priority_class_name().to_string();
        let requests = job.resource_requirements();
        let job_id = job.id();

        let queue_round = self
            .queues
            .get_mut(&queue_name)
            .ok_or_else(|| RoundError::UnknownQueue(queue_name.clone()))?;

        let was_scheduled =
            queue_round.evict_job(job_id, &priority_class, &requests, Some(Arc::clone(&job)))?;

        if was_scheduled {
            self.scheduled_resources.sub(&requests);
            self.scheduled_resources_by_class.sub(&priority_class, &requests);
            self.num_scheduled_jobs -= 1;
        } else {
            self.evicted_resources.add(&requests);
            self.evicted_resources_by_class.add(&priority_class, &requests);
            self.num_evicted_jobs += 1;
        }

        Ok(was_scheduled)
    }

    /// Evicts every job in `jobs`, ANDing a "all were freshly scheduled this
    /// round" flag; if that flag holds, decrements `num_scheduled_gangs`.
    pub fn evict_gang(&mut self, jobs: Vec<Arc<dyn JobHandle>>) -> Result<(), RoundError> {
        let had_jobs = !jobs.is_empty();
        let mut all_freshly_scheduled = true;

        for job in jobs {
            let was_scheduled = self.evict_job(job)?;
            all_freshly_scheduled &= was_scheduled;
        }

        if had_jobs && all_freshly_scheduled {
            self.num_scheduled_gangs -= 1;
        }

        Ok(())
    }

    pub fn total_cost(&self) -> f64 {
        self.queues
            .values()
            .map(|queue| self.cost_provider.cost_from_queue(queue))
            .sum()
    }

    /// Deep copy of `{queue → AllocatedByPriorityClass}`, skipping queues whose
    /// allocation is entirely zero.
    pub fn allocated_by_queue_and_priority(&self) -> HashMap<String, PriorityClassResources> {
        self.queues
            .iter()
            .filter(|(_, queue)| !queue.allocated_by_class().is_zero())
            .map(|(name, queue)| (name.clone(), queue.allocated_by_class().clone()))
            .collect()
    }

    /// Drops the job handle from every retained `JobDecision`, in every queue
    /// and in the infeasible-key cache, preserving ids, reasons, and pod
    /// decisions. No further mutation may rely on a job handle after this.
    pub fn clear_job_specs(&mut self) {
        for queue in self.queues.values_mut() {
            queue.clear_job_specs();
        }
        for decision in self.infeasible_keys.values_mut() {
            decision.clear_job_handle();
        }
        info!(executor_id = %self.executor_id, "cleared job specs");
    }

    pub fn set_termination_reason(&mut self, reason: impl Into<String>) {
        self.termination_reason = Some(reason.into());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        info!(
            executor_id = %self.executor_id,
            scheduled = self.num_scheduled_jobs,
            evicted = self.num_evicted_jobs,
            gangs = self.num_scheduled_gangs,
            "scheduling round finished"
        );
    }

    pub fn report(&self, verbosity: i32) -> RoundReport {
        RoundReport::from_round(self, verbosity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::test_support::CpuPerWeightCost;
    use crate::job::test_support::FakeJob;
    use crate::rate_limiter::{RateLimiterFactory, TokenBucketFactory};
    use pretty_assertions::assert_eq;

    fn limiter() -> Arc<dyn RateLimiter> {
        TokenBucketFactory.create(1000.0, 10.0, Utc::now())
    }

    fn round() -> Round {
        Round::new(
            "executor-1",
            "pool-a",
            PriorityClassCatalogue::new("default").with_class("p1", 5),
            Arc::new(CpuPerWeightCost),
            limiter(),
            ResourceVector::from_pairs([("cpu", 10.0), ("memory", 100.0)]),
        )
    }

    fn success_job(id: &str, queue: &str, class: &str, cpu: f64, mem: f64) -> JobDecision {
        let catalogue = PriorityClassCatalogue::new("default").with_class(class, 5);
        let job: Arc<dyn JobHandle> = Arc::new(FakeJob::new(
            id,
            queue,
            class,
            ResourceVector::from_pairs([("cpu", cpu), ("memory", mem)]),
        ));
        let pod = job.pod_requirements(&catalogue).unwrap();
        JobDecision::success(job, pod, None)
    }

    #[test]
    fn scenario_1_single_scheduling() {
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();

        r.apply_job_decision(success_job("j1", "A", "p1", 2.0, 20.0)).unwrap();

        let a = r.get_queue("A").unwrap();
        assert_eq!(a.allocated_by_class().get("p1").get("cpu"), 2.0);
        assert_eq!(a.scheduled_by_class().get("p1").get("cpu"), 2.0);
        assert_eq!(r.scheduled_resources().get("cpu"), 2.0);
        assert_eq!(r.num_scheduled_jobs(), 1);
    }

    #[test]
    fn scenario_2_evict_freshly_scheduled() {
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();
        r.apply_job_decision(success_job("j1", "A", "p1", 2.0, 20.0)).unwrap();

        let job: Arc<dyn JobHandle> = Arc::new(FakeJob::new(
            "j1",
            "A",
            "p1",
            ResourceVector::from_pairs([("cpu", 2.0), ("memory", 20.0)]),
        ));
        r.evict_job(job).unwrap();

        assert!(r.get_queue("A").unwrap().allocated_by_class().is_zero());
        assert!(r.scheduled_resources().is_zero());
        assert_eq!(r.num_scheduled_jobs(), 0);
        assert_eq!(r.num_evicted_jobs(), 0);
    }

    #[test]
    fn scenario_3_evict_then_schedule_round_trip() {
        let mut r = round();
        let mut init = PriorityClassResources::new();
        init.add("p1", &ResourceVector::from_pairs([("cpu", 5.0), ("memory", 50.0)]));
        r.register_queue("B", 2.0, Some(init), limiter()).unwrap();

        let job: Arc<dyn JobHandle> = Arc::new(FakeJob::new(
            "j2",
            "B",
            "p1",
            ResourceVector::from_pairs([("cpu", 5.0), ("memory", 50.0)]),
        ));
        r.evict_job(job).unwrap();
        r.apply_job_decision(success_job("j2", "B", "p1", 5.0, 50.0)).unwrap();

        let b = r.get_queue("B").unwrap();
        assert_eq!(b.allocated_by_class().get("p1").get("cpu"), 5.0);
        assert_eq!(b.num_evicted(), 0);
        assert!(r.evicted_resources().is_zero());
        assert!(r.scheduled_resources().is_zero());
        assert_eq!(r.num_scheduled_jobs(), 0);
        assert_eq!(r.num_evicted_jobs(), 0);
    }

    #[test]
    fn scenario_4_gang_partial_failure() {
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();

        let job2: Arc<dyn JobHandle> = Arc::new(FakeJob::new(
            "j2",
            "A",
            "p1",
            ResourceVector::from_pairs([("cpu", 1.0), ("memory", 10.0)]),
        ));
        let gang = GangDecision::new(vec![
            success_job("j1", "A", "p1", 1.0, 10.0),
            JobDecision::failure(job2, "infeasible"),
        ])
        .unwrap();

        r.apply_gang_decision(gang).unwrap();

        assert_eq!(r.num_scheduled_gangs(), 0);
        assert_eq!(r.scheduled_resources().get("cpu"), 1.0);
        assert_eq!(r.num_scheduled_jobs(), 1);
        assert_eq!(r.get_queue("A").unwrap().num_unsuccessful(), 1);
    }

    #[test]
    fn scenario_5_duplicate_queue_rejected() {
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();
        let err = r.register_queue("A", 1.0, None, limiter()).unwrap_err();
        assert_eq!(err, RoundError::DuplicateQueue("A".to_string()));
        assert_eq!(r.weight_sum(), 1.0);
    }

    #[test]
    fn scenario_6_infeasible_key_short_circuit() {
        let mut r = round();
        let job = FakeJob::new("j1", "A", "p1", ResourceVector::from_pairs([("cpu", 1.0)]));
        let key = r.scheduling_key_for(&job);

        let job_handle: Arc<dyn JobHandle> = Arc::new(job);
        r.insert_infeasible_key(key, JobDecision::failure(job_handle, "infeasible"));
        assert!(r.get_infeasible(&key).is_some());

        r.clear_infeasible_keys();
        assert!(r.get_infeasible(&key).is_none());
    }

    #[test]
    fn gang_scheduled_count_increments_once_for_two_new_jobs() {
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();

        let gang = GangDecision::new(vec![
            success_job("j1", "A", "p1", 1.0, 10.0),
            success_job("j2", "A", "p1", 1.0, 10.0),
        ])
        .unwrap();
        r.apply_gang_decision(gang).unwrap();
        assert_eq!(r.num_scheduled_gangs(), 1);
    }

    #[test]
    fn gang_all_pre_evicted_does_not_increment_scheduled_gangs() {
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();

        let evicted_job: Arc<dyn JobHandle> = Arc::new(FakeJob::new(
            "j1",
            "A",
            "p1",
            ResourceVector::from_pairs([("cpu", 1.0)]),
        ));
        r.evict_job(evicted_job).unwrap();

        let gang = GangDecision::new(vec![success_job("j1", "A", "p1", 1.0, 10.0)]).unwrap();
        r.apply_gang_decision(gang).unwrap();
        assert_eq!(r.num_scheduled_gangs(), 0);
    }

    #[test]
    fn evict_gang_decrements_count_set_by_apply_gang_decision() {
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();

        let gang = GangDecision::new(vec![
            success_job("j1", "A", "p1", 1.0, 10.0),
            success_job("j2", "A", "p1", 1.0, 10.0),
        ])
        .unwrap();
        r.apply_gang_decision(gang).unwrap();
        assert_eq!(r.num_scheduled_gangs(), 1);

        let jobs: Vec<Arc<dyn JobHandle>> = vec![
            Arc::new(FakeJob::new("j1", "A", "p1", ResourceVector::from_pairs([("cpu", 1.0)]))),
            Arc::new(FakeJob::new("j2", "A", "p1", ResourceVector::from_pairs([("cpu", 1.0)]))),
        ];
        r.evict_gang(jobs).unwrap();
        assert_eq!(r.num_scheduled_gangs(), 0);
    }

    #[test]
    fn evict_gang_drives_count_negative_without_clamping() {
        // j1 is scheduled as a standalone job decision, never through
        // apply_gang_decision, so num_scheduled_gangs starts at 0. Evicting it
        // via evict_gang still sees "all freshly scheduled" and decrements,
        // which must land on -1 rather than clamp at 0 (SPEC_FULL.md §9, signed
        // counters, no clamping).
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();
        r.apply_job_decision(success_job("j1", "A", "p1", 1.0, 10.0)).unwrap();
        assert_eq!(r.num_scheduled_gangs(), 0);

        let jobs: Vec<Arc<dyn JobHandle>> = vec![Arc::new(FakeJob::new(
            "j1",
            "A",
            "p1",
            ResourceVector::from_pairs([("cpu", 1.0)]),
        ))];
        r.evict_gang(jobs).unwrap();
        assert_eq!(r.num_scheduled_gangs(), -1);
    }

    #[test]
    fn unknown_queue_rejected_without_mutating_aggregates() {
        let mut r = round();
        let before_scheduled = r.scheduled_resources().clone();
        let err = r.apply_job_decision(success_job("j1", "ghost", "p1", 1.0, 1.0)).unwrap_err();
        assert_eq!(err, RoundError::UnknownQueue("ghost".to_string()));
        assert_eq!(r.scheduled_resources(), &before_scheduled);
        assert_eq!(r.num_scheduled_jobs(), 0);
    }

    #[test]
    fn total_cost_sums_per_queue_provider_output() {
        let mut r = round();
        r.register_queue("A", 2.0, None, limiter()).unwrap();
        r.register_queue("B", 1.0, None, limiter()).unwrap();
        r.apply_job_decision(success_job("j1", "A", "p1", 4.0, 10.0)).unwrap();

        // CpuPerWeightCost: queue A contributes 4.0/2.0 = 2.0, queue B contributes 0.
        assert_eq!(r.total_cost(), 2.0);
    }

    #[test]
    fn clear_job_specs_preserves_ids_and_drops_handles() {
        let mut r = round();
        r.register_queue("A", 1.0, None, limiter()).unwrap();
        r.apply_job_decision(success_job("j1", "A", "p1", 2.0, 20.0)).unwrap();

        r.clear_job_specs();

        let a = r.get_queue("A").unwrap();
        let decision = a.successful().next().unwrap();
        assert_eq!(decision.job_id, JobId::from("j1"));
        assert!(decision.job_handle.is_none());
    }
}
