//! Placement policies
//!
//! Placement is a three-stage pipeline: filter the node list down to
//! candidates, score the candidates, pick the winner. Scores are costs:
//! lower is better, and `pick` returns the strict minimum with the first
//! candidate winning ties.

use shared::config::SchedulerPolicy;
use shared::task::Task;
use std::collections::HashMap;

use crate::node::Node;

/// Lieb's square-ice constant, the exponential base of the E-PVM cost
/// function.
const LIEB: f64 = 1.53960071783900203869;

/// Normalization constant for the per-node job count in the E-PVM cost.
const MAX_JOBS: f64 = 4.0;

/// Three-stage placement interface consulted by the dispatch path.
pub trait Scheduler: Send {
    fn name(&self) -> &'static str;

    /// Filters `nodes` down to those that can host `task`.
    fn select_candidates(&self, task: &Task, nodes: &[Node]) -> Vec<Node>;

    /// Scores each candidate by node name. Stateful policies advance their
    /// internal position here.
    fn score(&mut self, task: &Task, nodes: &[Node]) -> HashMap<String, f64>;

    /// Picks the lowest-scoring candidate, first seen winning ties.
    fn pick(&self, scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node> {
        let mut best: Option<(&Node, f64)> = None;
        for node in candidates {
            let Some(&score) = scores.get(&node.name) else {
                continue;
            };
            match best {
                Some((_, lowest)) if score >= lowest => {}
                _ => best = Some((node, score)),
            }
        }
        best.map(|(node, _)| node.clone())
    }
}

/// Constructs the configured policy.
pub fn new_scheduler(policy: SchedulerPolicy) -> Box<dyn Scheduler> {
    match policy {
        SchedulerPolicy::RoundRobin => Box::new(RoundRobin::new()),
        SchedulerPolicy::Epvm => Box::new(Epvm),
    }
}

/// Rotates placements across the node list in insertion order. The node at
/// the rotation position is marked with a preferential cost of 0.1, all
/// others cost 1.0.
pub struct RoundRobin {
    last_worker: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self { last_worker: 0 }
    }
}

impl Scheduler for RoundRobin {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn select_candidates(&self, _task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes.to_vec()
    }

    fn score(&mut self, _task: &Task, nodes: &[Node]) -> HashMap<String, f64> {
        let mut scores = HashMap::new();
        if nodes.is_empty() {
            return scores;
        }

        let next_worker = (self.last_worker + 1) % nodes.len();
        self.last_worker = next_worker;

        for (idx, node) in nodes.iter().enumerate() {
            let score = if idx == next_worker { 0.1 } else { 1.0 };
            scores.insert(node.name.clone(), score);
        }
        scores
    }
}

/// E-PVM: scores each candidate with the marginal cost of admitting the
/// task, summing exponentials of per-resource load before and after the
/// hypothetical placement. The node whose load rises least wins.
pub struct Epvm;

impl Scheduler for Epvm {
    fn name(&self) -> &'static str {
        "epvm"
    }

    /// Drops nodes whose unreserved disk cannot hold the task's request.
    fn select_candidates(&self, task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes
            .iter()
            .filter(|node| node.disk_free() >= task.disk)
            .cloned()
            .collect()
    }

    fn score(&mut self, task: &Task, nodes: &[Node]) -> HashMap<String, f64> {
        let mut scores = HashMap::new();

        for node in nodes {
            let tasks = node.task_count as f64;
            let cpu_load = node.cpu_usage / 2f64.powf(0.8);

            let mem_total = node.memory as f64;
            let mem_used = node.stats.as_ref().map(|s| s.mem_used()).unwrap_or(0) as f64;
            let mem_allocated = node.memory_allocated as f64;

            let (mem_pct_now, mem_pct_new) = if mem_total > 0.0 {
                (
                    (mem_used + mem_allocated) / mem_total,
                    (mem_used + mem_allocated + task.memory as f64 / 1000.0) / mem_total,
                )
            } else {
                (0.0, 0.0)
            };

            let new_job_term = LIEB.powf((tasks + 1.0) / MAX_JOBS);
            let current_job_term = LIEB.powf(tasks / MAX_JOBS);

            let mem_cost =
                LIEB.powf(mem_pct_new) + new_job_term - LIEB.powf(mem_pct_now) - current_job_term;
            let cpu_cost =
                LIEB.powf(cpu_load) + new_job_term - LIEB.powf(cpu_load) - current_job_term;

            scores.insert(node.name.clone(), mem_cost + cpu_cost);
        }

        scores
    }
}
