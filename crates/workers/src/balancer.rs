//! Worker selection strategies.
//!
//! The pool hands a balancer only workers that can accept work, in worker id
//! order. The balancer picks one by index.

use crate::node::WorkerNode;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks a worker among eligible candidates
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Index into `candidates`, or `None` when empty
    fn select(&self, candidates: &[&WorkerNode]) -> Option<usize>;
}

/// Lowest [`WorkerNode::load_score`] wins; ties go to the first candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadScoreBalancer;

impl LoadBalancer for LoadScoreBalancer {
    fn name(&self) -> &'static str {
        "load-score"
    }

    fn select(&self, candidates: &[&WorkerNode]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, worker) in candidates.iter().enumerate() {
            let score = worker.load_score();
            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((index, score)),
            }
        }
        best.map(|(index, _)| index)
    }
}

/// Fewest active jobs wins; ties go to the first candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastConnectionsBalancer;

impl LoadBalancer for LeastConnectionsBalancer {
    fn name(&self) -> &'static str {
        "least-connections"
    }

    fn select(&self, candidates: &[&WorkerNode]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, worker)| worker.active_jobs)
            .map(|(index, _)| index)
    }
}

/// Rotates through candidates.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    cursor: AtomicUsize,
}

impl LoadBalancer for RoundRobinBalancer {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, candidates: &[&WorkerNode]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, active: usize, max: usize, avg_ms: f64) -> WorkerNode {
        let mut node = WorkerNode::new(id, format!("http://{}", id), max, 0);
        node.active_jobs = active;
        node.avg_duration_ms = avg_ms;
        node
    }

    #[test]
    fn test_load_score_prefers_fast_idle_worker() {
        let slow = worker("a", 0, 4, 8_000.0);
        let busy = worker("b", 2, 4, 0.0);
        let fast = worker("c", 1, 4, 1_000.0);
        let candidates = vec![&slow, &busy, &fast];

        assert_eq!(LoadScoreBalancer.select(&candidates), Some(2));
    }

    #[test]
    fn test_load_score_tie_takes_first() {
        let a = worker("a", 0, 2, 0.0);
        let b = worker("b", 0, 2, 0.0);
        assert_eq!(LoadScoreBalancer.select(&[&a, &b]), Some(0));
    }

    #[test]
    fn test_least_connections() {
        let a = worker("a", 3, 8, 0.0);
        let b = worker("b", 1, 2, 9_000.0);
        assert_eq!(LeastConnectionsBalancer.select(&[&a, &b]), Some(1));
    }

    #[test]
    fn test_round_robin_rotates() {
        let a = worker("a", 0, 2, 0.0);
        let b = worker("b", 0, 2, 0.0);
        let balancer = RoundRobinBalancer::default();
        let picks: Vec<_> = (0..4).map(|_| balancer.select(&[&a, &b]).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_empty_candidates() {
        assert_eq!(LoadScoreBalancer.select(&[]), None);
        assert_eq!(LeastConnectionsBalancer.select(&[]), None);
        assert_eq!(RoundRobinBalancer::default().select(&[]), None);
    }
}
