use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::resource::{PriorityClassResources, ResourceVector};
use crate::round::Round;

/// Read-only view of one queue's standing within a rendered [`RoundReport`].
///
/// Never constructed from anything but a live `QueueRound` snapshot; rendering
/// it cannot mutate the round it was taken from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueReport {
    pub name: String,
    pub weight: f64,
    pub allocated: ResourceVector,
    pub allocated_by_class: PriorityClassResources,
    pub scheduled_by_class: PriorityClassResources,
    pub evicted_by_class: PriorityClassResources,
    pub num_successful: usize,
    pub num_unsuccessful: usize,
    pub num_evicted: usize,
    /// `(reason, count, representative job id)`, sorted by descending count.
    pub unschedulable_reasons: Vec<(String, usize, JobId)>,
}

/// Read-only snapshot of a whole [`Round`], rendered at a fixed verbosity.
///
/// Building one never mutates the round; it is a deep copy of whatever was
/// live at the moment `Round::report` was called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub executor_id: String,
    pub pool: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub termination_reason: Option<String>,
    pub total_resources: ResourceVector,
    pub scheduled_resources: ResourceVector,
    pub evicted_resources: ResourceVector,
    pub scheduled_resources_by_class: PriorityClassResources,
    pub evicted_resources_by_class: PriorityClassResources,
    pub num_scheduled_jobs: i64,
    pub num_evicted_jobs: i64,
    pub num_scheduled_gangs: i64,
    pub weight_sum: f64,
    /// Populated only when `verbosity - 2 >= 0`; see `render`.
    pub queues: Vec<QueueReport>,
    verbosity: i32,
}

impl RoundReport {
    /// Builds a report at `verbosity`. Always captures the round-level
    /// summary; per-queue detail (including unschedulable-reason grouping) is
    /// only materialised when the nested verbosity budget allows it, matching
    /// what `render` would actually show — there is no point deep-copying
    /// per-queue state a caller asked not to see.
    pub(crate) fn from_round(round: &Round, verbosity: i32) -> Self {
        let queues = if verbosity - 2 >= 0 {
            let show_reasons = verbosity - 4 >= 0;
            round
                .queues_iter()
                .filter(|(_, q)| q.has_activity())
                .map(|(name, q)| QueueReport {
                    name: name.to_string(),
                    weight: crate::fairness::QueueView::weight(q),
                    allocated: q.allocated_by_class().total(),
                    allocated_by_class: q.allocated_by_class().clone(),
                    scheduled_by_class: q.scheduled_by_class().clone(),
                    evicted_by_class: q.evicted_by_class().clone(),
                    num_successful: q.num_successful(),
                    num_unsuccessful: q.num_unsuccessful(),
                    num_evicted: q.num_evicted(),
                    unschedulable_reasons: if show_reasons {
                        grouped_reasons(q)
                    } else {
                        Vec::new()
                    },
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            executor_id: round.executor_id().to_string(),
            pool: round.pool().to_string(),
            started_at: round.started_at(),
            finished_at: round.finished_at(),
            termination_reason: round.termination_reason().map(str::to_string),
            total_resources: round.total_resources().clone(),
            scheduled_resources: round.scheduled_resources().clone(),
            evicted_resources: round.evicted_resources().clone(),
            scheduled_resources_by_class: round.scheduled_resources_by_class().clone(),
            evicted_resources_by_class: round.evicted_resources_by_class().clone(),
            num_scheduled_jobs: round.num_scheduled_jobs(),
            num_evicted_jobs: round.num_evicted_jobs(),
            num_scheduled_gangs: round.num_scheduled_gangs(),
            weight_sum: round.weight_sum(),
            queues,
            verbosity,
        }
    }

    /// Renders a human-readable summary. Top-level timings/totals/counts are
    /// always shown; per-queue blocks only appear when this report was built
    /// at a verbosity allowing them (see `from_round`).
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "round[{}/{}] started={} finished={:?} reason={:?}\n",
            self.executor_id, self.pool, self.started_at, self.finished_at, self.termination_reason
        ));
        out.push_str(&format!(
            "  total={} scheduled={} evicted={} jobs(scheduled={}, evicted={}) gangs={} weight_sum={}\n",
            self.total_resources,
            self.scheduled_resources,
            self.evicted_resources,
            self.num_scheduled_jobs,
            self.num_evicted_jobs,
            self.num_scheduled_gangs,
            self.weight_sum,
        ));

        for queue in &self.queues {
            out.push_str(&format!(
                "  queue[{}] weight={} allocated={} successful={} unsuccessful={} evicted={}\n",
                queue.name, queue.weight, queue.allocated, queue.num_successful, queue.num_unsuccessful, queue.num_evicted
            ));
            if self.verbosity - 4 >= 0 {
                for (reason, count, representative) in &queue.unschedulable_reasons {
                    out.push_str(&format!(
                        "    reason={reason:?} count={count} representative={representative}\n"
                    ));
                }
            }
        }

        out
    }
}

fn grouped_reasons(queue: &crate::queue_round::QueueRound) -> Vec<(String, usize, JobId)> {
    use std::collections::BTreeMap;

    let mut by_reason: BTreeMap<&str, Vec<&JobId>> = BTreeMap::new();
    for decision in queue.unsuccessful() {
        by_reason
            .entry(decision.unschedulable_reason.as_str())
            .or_default()
            .push(&decision.job_id);
    }

    let mut grouped: Vec<(String, usize, JobId)> = by_reason
        .into_iter()
        .map(|(reason, mut ids)| {
            ids.sort();
            (reason.to_string(), ids.len(), ids[0].clone())
        })
        .collect();
    grouped.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    grouped
}
