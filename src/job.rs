use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::priority::PriorityClassCatalogue;
use crate::resource::ResourceVector;

/// Identifier for a job, stable across a job's whole lifetime in the orchestrator
/// (not just this round).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        JobId(value)
    }
}

/// A node selector is a conjunction of label equalities a node must carry.
pub type NodeSelector = BTreeMap<String, String>;

/// Simplified affinity/anti-affinity expressions. The node-selection engine that
/// actually evaluates these is an external collaborator; the core only needs them
/// as opaque, hashable/equatable inputs to the scheduling key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affinity {
    pub required: Vec<String>,
    pub preferred: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: String,
    pub operator: String,
    pub value: String,
    pub effect: String,
}

/// Well-known annotation recognised by the core: its value on the first job of a
/// gang, if present, is propagated onto [`GangDecision::node_uniformity_label`](crate::gang::GangDecision).
pub const GANG_NODE_UNIFORMITY_LABEL_ANNOTATION: &str = "gang-node-uniformity-label";

/// Well-known annotation recognised by the core: marks a job handle as already
/// evicted prior to this round, value `"true"`.
pub const EVICTED_JOB_ANNOTATION: &str = "evicted-job";
pub const EVICTED_JOB_ANNOTATION_TRUE: &str = "true";

/// The fully-resolved, placement-relevant bundle for one job: what the scheduling
/// key is derived from, and what gets stored in `QueueRound`'s per-priority-class
/// tables once a successful `JobDecision` is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRequirements {
    pub node_selector: NodeSelector,
    pub affinity: Affinity,
    pub tolerations: Vec<Toleration>,
    pub requests: ResourceVector,
    pub priority_class: String,
    pub priority: i32,
    pub annotations: HashMap<String, String>,
}

/// The capability set the core needs from "a job". Concrete job handle types
/// (owned by the job repository, an external collaborator) implement this; the
/// core never inspects a concrete type.
pub trait JobHandle: fmt::Debug + Send + Sync {
    fn id(&self) -> JobId;
    fn queue(&self) -> &str;
    fn priority_class_name(&self) -> &str;
    fn node_selector(&self) -> &NodeSelector;
    fn affinity(&self) -> &Affinity;
    fn tolerations(&self) -> &[Toleration];
    fn resource_requirements(&self) -> ResourceVector;
    fn annotations(&self) -> &HashMap<String, String>;

    /// The full placement-relevant bundle, resolved against `catalogue`. `None`
    /// when the handle cannot yet resolve one (e.g. an incomplete spec) — adding a
    /// successful `JobDecision` then fails with `MissingPodRequirements`.
    fn pod_requirements(&self, catalogue: &PriorityClassCatalogue) -> Option<PodRequirements> {
        Some(PodRequirements {
            node_selector: self.node_selector().clone(),
            affinity: self.affinity().clone(),
            tolerations: self.tolerations().to_vec(),
            requests: self.resource_requirements(),
            priority_class: self.priority_class_name().to_string(),
            priority: catalogue.priority_of(self.priority_class_name()),
            annotations: self.annotations().clone(),
        })
    }
}

/// Histogram of exclusion reasons plus the placement outcome for one pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodDecision {
    pub node_id: Option<String>,
    pub score: f64,
    pub scheduled_priority: i32,
    pub matching_node_types: Vec<String>,
    pub nodes_considered: usize,
    pub exclusion_reasons: HashMap<String, usize>,
}

/// The outcome of placing one job this round.
#[derive(Clone)]
pub struct JobDecision {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub job_id: JobId,
    pub queue: String,
    pub job_handle: Option<Arc<dyn JobHandle>>,
    pub pod_requirements: Option<PodRequirements>,
    pub unschedulable_reason: String,
    pub pod_decision: Option<PodDecision>,
}

impl fmt::Debug for JobDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDecision")
            .field("job_id", &self.job_id)
            .field("queue", &self.queue)
            .field("unschedulable_reason", &self.unschedulable_reason)
            .field("has_job_handle", &self.job_handle.is_some())
            .field("pod_requirements", &self.pod_requirements)
            .field("pod_decision", &self.pod_decision)
            .finish()
    }
}

impl JobDecision {
    pub fn success(
        job: Arc<dyn JobHandle>,
        pod_requirements: PodRequirements,
        pod_decision: Option<PodDecision>,
    ) -> Self {
        Self {
            created_at: chrono::Utc::now(),
            job_id: job.id(),
            queue: job.queue().to_string(),
            job_handle: Some(job),
            pod_requirements: Some(pod_requirements),
            unschedulable_reason: String::new(),
            pod_decision,
        }
    }

    pub fn failure(job: Arc<dyn JobHandle>, reason: impl Into<String>) -> Self {
        Self {
            created_at: chrono::Utc::now(),
            job_id: job.id(),
            queue: job.queue().to_string(),
            job_handle: Some(job),
            pod_requirements: None,
            unschedulable_reason: reason.into(),
            pod_decision: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.unschedulable_reason.is_empty()
    }

    /// Drops the job handle, preserving id, reason, and pod decision. Called by
    /// `Round::clear_job_specs` / `QueueRound::clear_job_specs`.
    pub fn clear_job_handle(&mut self) {
        self.job_handle = None;
    }
}
