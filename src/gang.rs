use crate::error::GangError;
use crate::job::{JobDecision, GANG_NODE_UNIFORMITY_LABEL_ANNOTATION};
use crate::resource::ResourceVector;

/// An ordered bundle of [`JobDecision`]s that must succeed or fail together.
///
/// Stateless and value-shaped: a `GangDecision` is built once per `apply_gang_decision`
/// call and is not retained by `Round` afterwards.
#[derive(Debug, Clone)]
pub struct GangDecision {
    pub queue: String,
    pub priority_class: String,
    pub node_uniformity_label: Option<String>,
    pub total_request: ResourceVector,
    pub jobs: Vec<JobDecision>,
}

impl GangDecision {
    /// Builds a `GangDecision` from a non-empty ordered sequence of job decisions.
    /// `queue`, `priority_class`, and `node_uniformity_label` are derived from the
    /// first member.
    pub fn new(jobs: Vec<JobDecision>) -> Result<Self, GangError> {
        let first = jobs.first().ok_or(GangError::Empty)?;

        let queue = first.queue.clone();
        let priority_class = first
            .job_handle
            .as_ref()
            .map(|handle| handle.priority_class_name().to_string())
            .or_else(|| {
                first
                    .pod_requirements
                    .as_ref()
                    .map(|pod| pod.priority_class.clone())
            })
            .unwrap_or_default();
        let node_uniformity_label = first
            .job_handle
            .as_ref()
            .and_then(|handle| handle.annotations().get(GANG_NODE_UNIFORMITY_LABEL_ANNOTATION))
            .cloned()
            .or_else(|| {
                first.pod_requirements.as_ref().and_then(|pod| {
                    pod.annotations
                        .get(GANG_NODE_UNIFORMITY_LABEL_ANNOTATION)
                        .cloned()
                })
            });

        let mut total_request = ResourceVector::default();
        for job in &jobs {
            if let Some(pod) = &job.pod_requirements {
                total_request.add(&pod.requests);
            }
        }

        Ok(Self {
            queue,
            priority_class,
            node_uniformity_label,
            total_request,
            jobs,
        })
    }

    pub fn cardinality(&self) -> usize {
        self.jobs.len()
    }

    /// Conjunction over members of "job carries the evicted-job annotation".
    pub fn all_jobs_evicted(&self) -> bool {
        use crate::job::{EVICTED_JOB_ANNOTATION, EVICTED_JOB_ANNOTATION_TRUE};
        self.jobs.iter().all(|job| {
            job.job_handle
                .as_ref()
                .and_then(|handle| handle.annotations().get(EVICTED_JOB_ANNOTATION))
                .map(|v| v == EVICTED_JOB_ANNOTATION_TRUE)
                .unwrap_or(false)
        })
    }
}
