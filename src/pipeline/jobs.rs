//! The step job graph.
//!
//! Each simulation step is an explicit DAG of jobs. Edges are modeled by an
//! atomic dependency counter per job: finishing a job decrements its
//! dependents' counters, and a job whose counter reaches zero enters the
//! ready queue. The executor drains the queue deterministically (lowest job
//! index first); jobs that are internally data-parallel fan out through
//! rayon on their own.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::body_store::BodyAccess;

/// The job kinds of one collision step. Sub-step jobs carry their sub-step
/// index separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepJobKind {
    StepListeners,
    ApplyGravity,
    DetermineActiveConstraints,
    BroadPhasePrepare,
    FindCollisions,
    SetupVelocityConstraints,
    BuildIslands,
    FinalizeIslands,
    BodySetIslandIndex,
    BroadPhaseFinalize,
    SolveVelocity,
    Integrate,
    FindCcdContacts,
    ResolveCcdContacts,
    SolvePosition,
    ContactRemovedCallbacks,
    StartNextStep,
}

impl StepJobKind {
    /// Body state this job is allowed to touch; asserted by the store in
    /// debug builds.
    pub(crate) fn body_access(self) -> BodyAccess {
        match self {
            StepJobKind::StepListeners => BodyAccess::ALL,
            StepJobKind::ApplyGravity => BodyAccess::READ_POSITION.union(BodyAccess::WRITE_VELOCITY),
            StepJobKind::DetermineActiveConstraints => BodyAccess::READ_POSITION,
            StepJobKind::BroadPhasePrepare | StepJobKind::BroadPhaseFinalize => BodyAccess::READ_POSITION,
            StepJobKind::FindCollisions => BodyAccess::READ_POSITION
                .union(BodyAccess::READ_VELOCITY)
                .union(BodyAccess::WRITE_ACTIVE_SET),
            StepJobKind::SetupVelocityConstraints | StepJobKind::BuildIslands | StepJobKind::FinalizeIslands | StepJobKind::BodySetIslandIndex => {
                BodyAccess::READ_POSITION.union(BodyAccess::READ_VELOCITY)
            }
            StepJobKind::SolveVelocity => BodyAccess::READ_POSITION.union(BodyAccess::WRITE_VELOCITY).union(BodyAccess::READ_VELOCITY),
            StepJobKind::Integrate => BodyAccess::ALL,
            StepJobKind::FindCcdContacts => BodyAccess::READ_POSITION.union(BodyAccess::READ_VELOCITY),
            StepJobKind::ResolveCcdContacts => BodyAccess::ALL,
            StepJobKind::SolvePosition => BodyAccess::ALL,
            StepJobKind::ContactRemovedCallbacks => BodyAccess::NONE,
            StepJobKind::StartNextStep => BodyAccess::ALL,
        }
    }
}

/// One scheduled job: kind, sub-step it belongs to (0 for per-step jobs),
/// and its dependency bookkeeping.
pub struct JobNode {
    pub kind: StepJobKind,
    pub sub_step: u32,
    dependencies: AtomicU32,
    dependents: Vec<u32>,
}

/// A DAG of step jobs with a deterministic ready-queue executor.
pub struct JobGraph {
    nodes: Vec<JobNode>,
}

impl Default for JobGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl JobGraph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add_job(&mut self, kind: StepJobKind, sub_step: u32) -> u32 {
        let index = self.nodes.len() as u32;
        self.nodes.push(JobNode {
            kind,
            sub_step,
            dependencies: AtomicU32::new(0),
            dependents: Vec::new(),
        });
        index
    }

    /// Declares that `after` cannot start until `before` finished.
    pub fn add_edge(&mut self, before: u32, after: u32) {
        debug_assert!(before != after);
        self.nodes[before as usize].dependents.push(after);
        self.nodes[after as usize].dependencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Decrements a job's dependency counter, reporting readiness.
    fn remove_dependency(&self, job: u32) -> bool {
        self.nodes[job as usize].dependencies.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Executes the whole graph. Jobs become ready when their dependency
    /// counter hits zero; among ready jobs the lowest index runs first, which
    /// makes the execution order reproducible.
    pub fn run<F>(&self, mut execute: F)
    where
        F: FnMut(StepJobKind, u32),
    {
        let mut ready: Vec<u32> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.dependencies.load(Ordering::Acquire) == 0)
            .map(|(index, _)| index as u32)
            .collect();
        // `ready` starts sorted; we keep it sorted by draining the minimum.
        let mut completed = 0usize;

        while let Some(position) = ready.iter().enumerate().min_by_key(|(_, &j)| j).map(|(p, _)| p) {
            let job = ready.swap_remove(position);
            let node = &self.nodes[job as usize];
            execute(node.kind, node.sub_step);
            completed += 1;

            for &dependent in &node.dependents {
                if self.remove_dependency(dependent) {
                    ready.push(dependent);
                }
            }
        }

        debug_assert_eq!(completed, self.nodes.len(), "job graph has a cycle or dangling dependency");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_run_in_dependency_order() {
        let mut graph = JobGraph::new();
        let listeners = graph.add_job(StepJobKind::StepListeners, 0);
        let gravity = graph.add_job(StepJobKind::ApplyGravity, 0);
        let find = graph.add_job(StepJobKind::FindCollisions, 0);
        let solve = graph.add_job(StepJobKind::SolveVelocity, 0);
        graph.add_edge(listeners, gravity);
        graph.add_edge(gravity, find);
        graph.add_edge(find, solve);

        let mut order = Vec::new();
        graph.run(|kind, _| order.push(kind));
        assert_eq!(
            order,
            vec![
                StepJobKind::StepListeners,
                StepJobKind::ApplyGravity,
                StepJobKind::FindCollisions,
                StepJobKind::SolveVelocity
            ]
        );
    }

    #[test]
    fn diamond_dependencies_wait_for_both_parents() {
        let mut graph = JobGraph::new();
        let a = graph.add_job(StepJobKind::BroadPhasePrepare, 0);
        let b = graph.add_job(StepJobKind::ApplyGravity, 0);
        let c = graph.add_job(StepJobKind::FindCollisions, 0);
        graph.add_edge(a, c);
        graph.add_edge(b, c);

        let mut order = Vec::new();
        graph.run(|kind, _| order.push(kind));
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], StepJobKind::FindCollisions);
    }

    #[test]
    fn independent_jobs_run_in_index_order() {
        let mut graph = JobGraph::new();
        graph.add_job(StepJobKind::StepListeners, 0);
        graph.add_job(StepJobKind::BroadPhasePrepare, 0);
        graph.add_job(StepJobKind::DetermineActiveConstraints, 0);

        let mut order = Vec::new();
        graph.run(|kind, _| order.push(kind));
        assert_eq!(
            order,
            vec![
                StepJobKind::StepListeners,
                StepJobKind::BroadPhasePrepare,
                StepJobKind::DetermineActiveConstraints
            ]
        );
    }
}
