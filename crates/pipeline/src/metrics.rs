//! Per-proof timing and resource metrics, snapshots and duration predictions.

use crate::config::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;
use trustproof_core::{CircuitSize, Clock};

/// Confidence reported when no comparable history exists
const HEURISTIC_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.9;
/// Per-attestation cost used by the heuristic estimate
const HEURISTIC_MS_PER_ATTESTATION: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStage {
    Fusion,
    CircuitLoad,
    Witness,
    Proving,
    Validation,
}

impl ProofStage {
    pub fn label(&self) -> &'static str {
        match self {
            ProofStage::Fusion => "fusion",
            ProofStage::CircuitLoad => "circuit_load",
            ProofStage::Witness => "witness",
            ProofStage::Proving => "proving",
            ProofStage::Validation => "validation",
        }
    }

    /// Progress percentage reported when the stage begins
    pub fn progress(&self) -> u8 {
        match self {
            ProofStage::Fusion => 10,
            ProofStage::CircuitLoad => 20,
            ProofStage::Witness => 40,
            ProofStage::Proving => 60,
            ProofStage::Validation => 90,
        }
    }
}

/// One resource observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: ProofStage,
    pub started_at: u64,
    pub ended_at: Option<u64>,
}

impl StageTiming {
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at.map(|end| end.saturating_sub(self.started_at))
    }
}

/// Metrics for one proof job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofMetrics {
    pub request_id: String,
    pub circuit_size: CircuitSize,
    pub attestation_count: usize,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub duration_ms: Option<u64>,
    pub stages: Vec<StageTiming>,
    pub peak_memory_bytes: u64,
    pub avg_cpu_percent: f64,
    pub resource_samples: u32,
    pub success: Option<bool>,
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub active_jobs: usize,
    pub completed_jobs: usize,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub p50_duration_ms: u64,
    pub p95_duration_ms: u64,
    pub p99_duration_ms: u64,
    /// Mean peak memory across active jobs
    pub avg_memory_bytes: f64,
    /// Mean CPU across active jobs
    pub avg_cpu_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionBasis {
    History,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformancePrediction {
    pub circuit_size: CircuitSize,
    pub attestation_count: usize,
    pub estimated_duration_ms: u64,
    /// In [0, 0.9]
    pub confidence: f64,
    pub sample_size: usize,
    pub basis: PredictionBasis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBenchmark {
    pub circuit_size: CircuitSize,
    pub samples: usize,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub p50_duration_ms: u64,
    pub p95_duration_ms: u64,
}

/// `sorted[ceil(n·p) − 1]`, 0 for an empty slice
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (sorted.len() as f64 * p).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

pub struct MetricsCollector {
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    active: HashMap<String, ProofMetrics>,
    history: VecDeque<ProofMetrics>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            active: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    pub fn start_proof(
        &mut self,
        request_id: &str,
        circuit_size: CircuitSize,
        attestation_count: usize,
    ) {
        let metrics = ProofMetrics {
            request_id: request_id.to_string(),
            circuit_size,
            attestation_count,
            started_at: self.clock.now_ms(),
            completed_at: None,
            duration_ms: None,
            stages: Vec::new(),
            peak_memory_bytes: 0,
            avg_cpu_percent: 0.0,
            resource_samples: 0,
            success: None,
            error_kind: None,
        };
        self.active.insert(request_id.to_string(), metrics);
    }

    /// Circuit actually used, after fallbacks
    pub fn set_circuit(&mut self, request_id: &str, circuit_size: CircuitSize) {
        if let Some(metrics) = self.active.get_mut(request_id) {
            metrics.circuit_size = circuit_size;
        }
    }

    /// Close the open stage and open `stage`
    pub fn record_stage(&mut self, request_id: &str, stage: ProofStage) {
        let now = self.clock.now_ms();
        if let Some(metrics) = self.active.get_mut(request_id) {
            if let Some(open) = metrics.stages.last_mut().filter(|s| s.ended_at.is_none()) {
                open.ended_at = Some(now);
            }
            metrics.stages.push(StageTiming {
                stage,
                started_at: now,
                ended_at: None,
            });
        }
    }

    pub fn record_resources(&mut self, request_id: &str, sample: ResourceSample) {
        if let Some(metrics) = self.active.get_mut(request_id) {
            metrics.peak_memory_bytes = metrics.peak_memory_bytes.max(sample.memory_bytes);
            let n = metrics.resource_samples as f64;
            metrics.avg_cpu_percent =
                (metrics.avg_cpu_percent * n + sample.cpu_percent) / (n + 1.0);
            metrics.resource_samples += 1;
        }
    }

    /// Move a job into history. Returns the finished record.
    pub fn complete_proof(
        &mut self,
        request_id: &str,
        success: bool,
        error_kind: Option<String>,
    ) -> Option<ProofMetrics> {
        let mut metrics = self.active.remove(request_id)?;
        let now = self.clock.now_ms();
        if let Some(open) = metrics.stages.last_mut().filter(|s| s.ended_at.is_none()) {
            open.ended_at = Some(now);
        }
        metrics.completed_at = Some(now);
        metrics.duration_ms = Some(now.saturating_sub(metrics.started_at));
        metrics.success = Some(success);
        metrics.error_kind = error_kind;
        debug!(request_id, success, duration_ms = ?metrics.duration_ms, "Proof metrics recorded");

        self.history.push_back(metrics.clone());
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
        Some(metrics)
    }

    pub fn active(&self, request_id: &str) -> Option<&ProofMetrics> {
        self.active.get(request_id)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut durations: Vec<u64> = self.history.iter().filter_map(|m| m.duration_ms).collect();
        durations.sort_unstable();
        let successes = self
            .history
            .iter()
            .filter(|m| m.success == Some(true))
            .count();

        let active = self.active.len();
        let (avg_memory_bytes, avg_cpu_percent) = if active == 0 {
            (0.0, 0.0)
        } else {
            let n = active as f64;
            (
                self.active.values().map(|m| m.peak_memory_bytes as f64).sum::<f64>() / n,
                self.active.values().map(|m| m.avg_cpu_percent).sum::<f64>() / n,
            )
        };

        MetricsSnapshot {
            timestamp: self.clock.now_ms(),
            active_jobs: active,
            completed_jobs: self.history.len(),
            success_rate: if self.history.is_empty() {
                0.0
            } else {
                successes as f64 / self.history.len() as f64
            },
            avg_duration_ms: mean(&durations),
            p50_duration_ms: percentile(&durations, 0.5),
            p95_duration_ms: percentile(&durations, 0.95),
            p99_duration_ms: percentile(&durations, 0.99),
            avg_memory_bytes,
            avg_cpu_percent,
        }
    }

    /// Estimate from successful jobs on the same circuit with a similar
    /// evidence-set size.
    pub fn predict_duration(
        &self,
        circuit_size: CircuitSize,
        attestation_count: usize,
    ) -> PerformancePrediction {
        let tolerance = self.config.similar_size_tolerance * attestation_count as f64;
        let mut durations: Vec<u64> = self
            .history
            .iter()
            .filter(|m| m.success == Some(true) && m.circuit_size == circuit_size)
            .filter(|m| (m.attestation_count as f64 - attestation_count as f64).abs() <= tolerance)
            .filter_map(|m| m.duration_ms)
            .collect();

        if durations.is_empty() {
            return PerformancePrediction {
                circuit_size,
                attestation_count,
                estimated_duration_ms: heuristic_base_ms(circuit_size)
                    + HEURISTIC_MS_PER_ATTESTATION * attestation_count as u64,
                confidence: HEURISTIC_CONFIDENCE,
                sample_size: 0,
                basis: PredictionBasis::Heuristic,
            };
        }

        durations.sort_unstable();
        let n = durations.len();
        let median = percentile(&durations, 0.5) as f64;
        let avg = mean(&durations);
        let variance = durations
            .iter()
            .map(|d| (*d as f64 - avg).powi(2))
            .sum::<f64>()
            / n as f64;
        // Coefficient of variation against the median, capped at 1
        let dispersion = if median > 0.0 {
            (variance.sqrt() / median).min(1.0)
        } else {
            1.0
        };
        let variance_term = -0.2 * dispersion;
        let confidence = (0.3 + n as f64 / 100.0 * 0.5 + variance_term).clamp(0.0, MAX_CONFIDENCE);

        PerformancePrediction {
            circuit_size,
            attestation_count,
            estimated_duration_ms: percentile(&durations, 0.75),
            confidence,
            sample_size: n,
            basis: PredictionBasis::History,
        }
    }

    /// Per-circuit aggregates over history, smallest circuit first
    pub fn circuit_benchmarks(&self) -> Vec<CircuitBenchmark> {
        CircuitSize::ALL
            .iter()
            .filter_map(|size| {
                let records: Vec<&ProofMetrics> =
                    self.history.iter().filter(|m| m.circuit_size == *size).collect();
                if records.is_empty() {
                    return None;
                }
                let mut durations: Vec<u64> = records
                    .iter()
                    .filter(|m| m.success == Some(true))
                    .filter_map(|m| m.duration_ms)
                    .collect();
                durations.sort_unstable();
                let successes = records.iter().filter(|m| m.success == Some(true)).count();

                Some(CircuitBenchmark {
                    circuit_size: *size,
                    samples: records.len(),
                    success_rate: successes as f64 / records.len() as f64,
                    avg_duration_ms: mean(&durations),
                    min_duration_ms: durations.first().copied().unwrap_or(0),
                    max_duration_ms: durations.last().copied().unwrap_or(0),
                    p50_duration_ms: percentile(&durations, 0.5),
                    p95_duration_ms: percentile(&durations, 0.95),
                })
            })
            .collect()
    }
}

fn heuristic_base_ms(circuit_size: CircuitSize) -> u64 {
    match circuit_size {
        CircuitSize::Small => 2_000,
        CircuitSize::Medium => 5_000,
        CircuitSize::Large => 15_000,
    }
}

fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trustproof_core::ManualClock;

    fn collector() -> (MetricsCollector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (MetricsCollector::new(MetricsConfig::default(), clock.clone()), clock)
    }

    fn run(
        collector: &mut MetricsCollector,
        clock: &ManualClock,
        id: &str,
        size: CircuitSize,
        count: usize,
        ms: u64,
        ok: bool,
    ) {
        collector.start_proof(id, size, count);
        clock.advance(Duration::from_millis(ms));
        collector.complete_proof(id, ok, None);
    }

    #[test]
    fn test_percentile_indexing() {
        let sorted: Vec<u64> = (1..=10).collect();
        assert_eq!(percentile(&sorted, 0.5), 5);
        assert_eq!(percentile(&sorted, 0.95), 10);
        assert_eq!(percentile(&sorted, 0.99), 10);
        assert_eq!(percentile(&sorted, 0.0), 1);
        assert_eq!(percentile(&[], 0.5), 0);
        assert_eq!(percentile(&[7], 0.99), 7);
    }

    #[test]
    fn test_stage_timings() {
        let (mut collector, clock) = collector();
        collector.start_proof("r1", CircuitSize::Small, 5);
        collector.record_stage("r1", ProofStage::Witness);
        clock.advance(Duration::from_millis(30));
        collector.record_stage("r1", ProofStage::Proving);
        clock.advance(Duration::from_millis(70));
        collector.record_resources("r1", ResourceSample { memory_bytes: 100, cpu_percent: 50.0 });
        collector.record_resources("r1", ResourceSample { memory_bytes: 300, cpu_percent: 100.0 });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.active_jobs, 1);
        assert_eq!(snapshot.avg_memory_bytes, 300.0);
        assert_eq!(snapshot.avg_cpu_percent, 75.0);

        let done = collector.complete_proof("r1", true, None).unwrap();
        assert_eq!(done.duration_ms, Some(100));
        assert_eq!(done.stages[0].duration_ms(), Some(30));
        assert_eq!(done.stages[1].duration_ms(), Some(70));
        assert!(collector.complete_proof("r1", true, None).is_none());
    }

    #[test]
    fn test_snapshot_rates_and_percentiles() {
        let (mut collector, clock) = collector();
        for i in 0..10u64 {
            let id = format!("r{}", i);
            run(&mut collector, &clock, &id, CircuitSize::Small, 5, (i + 1) * 100, i != 0);
        }
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.completed_jobs, 10);
        assert!((snapshot.success_rate - 0.9).abs() < 1e-12);
        assert_eq!(snapshot.p50_duration_ms, 500);
        assert_eq!(snapshot.p95_duration_ms, 1_000);
        assert_eq!(snapshot.avg_duration_ms, 550.0);
    }

    #[test]
    fn test_history_cap() {
        let clock = Arc::new(ManualClock::new(0));
        let mut collector = MetricsCollector::new(
            MetricsConfig {
                history_size: 3,
                ..MetricsConfig::default()
            },
            clock.clone(),
        );
        for i in 0..5 {
            run(&mut collector, &clock, &format!("r{}", i), CircuitSize::Small, 5, 10, true);
        }
        assert_eq!(collector.history_len(), 3);
    }

    #[test]
    fn test_prediction_without_history() {
        let (collector, _) = collector();
        let prediction = collector.predict_duration(CircuitSize::Medium, 40);
        assert_eq!(prediction.basis, PredictionBasis::Heuristic);
        assert_eq!(prediction.estimated_duration_ms, 5_000 + 50 * 40);
        assert_eq!(prediction.confidence, HEURISTIC_CONFIDENCE);
    }

    #[test]
    fn test_prediction_uses_similar_sizes_only() {
        let (mut collector, clock) = collector();
        for (i, ms) in [100u64, 200, 300, 400].iter().enumerate() {
            run(&mut collector, &clock, &format!("s{}", i), CircuitSize::Small, 10, *ms, true);
        }
        // Outside the 30% window or wrong circuit
        run(&mut collector, &clock, "far", CircuitSize::Small, 20, 9_000, true);
        run(&mut collector, &clock, "other", CircuitSize::Large, 10, 9_000, true);
        run(&mut collector, &clock, "failed", CircuitSize::Small, 10, 9_000, false);

        let prediction = collector.predict_duration(CircuitSize::Small, 12);
        assert_eq!(prediction.basis, PredictionBasis::History);
        assert_eq!(prediction.sample_size, 4);
        assert_eq!(prediction.estimated_duration_ms, 300);
        assert!(prediction.confidence > 0.0 && prediction.confidence <= MAX_CONFIDENCE);
    }

    #[test]
    fn test_confidence_grows_and_shrinks() {
        let (mut steady, clock) = collector();
        for i in 0..50 {
            run(&mut steady, &clock, &format!("a{}", i), CircuitSize::Small, 10, 1_000, true);
        }
        let (mut noisy, clock2) = collector();
        for i in 0..50u64 {
            let ms = if i % 2 == 0 { 100 } else { 5_000 };
            run(&mut noisy, &clock2, &format!("b{}", i), CircuitSize::Small, 10, ms, true);
        }

        let steady_conf = steady.predict_duration(CircuitSize::Small, 10).confidence;
        let noisy_conf = noisy.predict_duration(CircuitSize::Small, 10).confidence;
        assert!((steady_conf - 0.55).abs() < 1e-9);
        assert!(noisy_conf < steady_conf);
    }

    #[test]
    fn test_circuit_benchmarks() {
        let (mut collector, clock) = collector();
        run(&mut collector, &clock, "a", CircuitSize::Small, 5, 100, true);
        run(&mut collector, &clock, "b", CircuitSize::Small, 5, 300, true);
        run(&mut collector, &clock, "c", CircuitSize::Large, 200, 1_000, false);

        let benchmarks = collector.circuit_benchmarks();
        assert_eq!(benchmarks.len(), 2);
        assert_eq!(benchmarks[0].circuit_size, CircuitSize::Small);
        assert_eq!(benchmarks[0].avg_duration_ms, 200.0);
        assert_eq!(benchmarks[0].min_duration_ms, 100);
        assert_eq!(benchmarks[0].max_duration_ms, 300);
        assert_eq!(benchmarks[1].success_rate, 0.0);
    }
}
