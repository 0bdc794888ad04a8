//! TrustProof proof node.
//!
//! Loads a node configuration, builds a proof pipeline over the in-process
//! prover (directly or through a worker pool), runs a batch of synthetic
//! reputation requests and prints a JSON report of queue, metrics, cache
//! and pool state.

use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trustproof_core::{
    current_timestamp_ms, logging, AttestationType, Priority, ProofType, SubjectiveOpinion,
    TrustAttestation,
};
use trustproof_fusion::TrustFusionEngine;
use trustproof_pipeline::{
    CacheStats, ChainStatus, CircuitBenchmark, InProcessTransport, LocalExecutor, MetricsSnapshot,
    NodeConfig, PoolExecutor, ProofPipeline, QueueStats, RequestOptions,
};
use trustproof_prover::{CircuitStore, MockProver, SyntheticCircuitSource};
use trustproof_workers::{PoolStats, ScalingRecommendation, WorkerPoolManager};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;
const DEFAULT_REQUESTS: usize = 8;
const ATTESTATIONS_PER_REQUEST: usize = 12;
const PROVER_LATENCY: Duration = Duration::from_millis(25);
const WORKER_CONCURRENCY: usize = 2;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ExecutionMode {
    Local,
    Pool,
}

#[derive(Debug, Serialize)]
struct NodeReport {
    node_id: String,
    mode: ExecutionMode,
    requested: usize,
    succeeded: usize,
    failed: usize,
    queue: QueueStats,
    metrics: MetricsSnapshot,
    benchmarks: Vec<CircuitBenchmark>,
    cache: CacheStats,
    pool: Option<PoolStats>,
    scaling: Option<ScalingRecommendation>,
    audit_entries: usize,
    audit_chain: ChainStatus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config = match parse_config_path(&args)? {
        Some(path) => NodeConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    match config.log_format.as_str() {
        "json" => logging::init_json(),
        _ => logging::init(),
    }

    let mode = parse_mode(&args)?;
    let requests = parse_requests(&args)?;
    info!(node_id = %config.node_id, ?mode, requests, "Proof node starting");

    let engine = Arc::new(TrustFusionEngine::new(
        config.fusion.clone(),
        Arc::new(trustproof_core::SystemClock),
    ));
    let store = Arc::new(CircuitStore::new(Arc::new(SyntheticCircuitSource::new())));
    let prover = Arc::new(MockProver::new().with_latency(PROVER_LATENCY));
    let local = Arc::new(LocalExecutor::new(engine, Arc::clone(&store), prover));

    let mut background = Vec::new();
    let pool = match mode {
        ExecutionMode::Local => None,
        ExecutionMode::Pool => {
            let pool = WorkerPoolManager::new(
                config.pool.clone(),
                Arc::new(InProcessTransport::new(Arc::clone(&local))),
            );
            let worker_ids: Vec<String> = (0..config.pool.min_workers.max(1))
                .map(|i| format!("{}-worker-{}", config.node_id, i))
                .collect();
            for id in &worker_ids {
                pool.register_worker(id.clone(), format!("inproc://{}", id), WORKER_CONCURRENCY)?;
            }
            background.push(pool.start_heartbeat_monitor());
            background.push(spawn_heartbeats(
                pool.clone(),
                worker_ids,
                config.pool.heartbeat_interval(),
            ));
            Some(pool)
        }
    };

    let pipeline = match &pool {
        None => ProofPipeline::local(config.pipeline.clone(), local),
        Some(pool) => ProofPipeline::builder(Arc::new(PoolExecutor::new(pool.clone())))
            .config(config.pipeline.clone())
            .circuit_store(store)
            .build(),
    };
    background.push(pipeline.start_maintenance());

    let (succeeded, failed) = run_batch(&pipeline, requests).await?;

    let report = NodeReport {
        node_id: config.node_id.clone(),
        mode,
        requested: succeeded + failed,
        succeeded,
        failed,
        queue: pipeline.queue_stats(),
        metrics: pipeline.metrics_snapshot(),
        benchmarks: pipeline.circuit_benchmarks(),
        cache: pipeline.cache_stats(),
        pool: pool.as_ref().map(|p| p.stats()),
        scaling: pool.as_ref().map(|p| p.check_scaling()),
        audit_entries: pipeline.audit_entries().len(),
        audit_chain: pipeline.verify_audit_chain(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    for handle in background {
        handle.abort();
    }
    info!(node_id = %config.node_id, succeeded, failed, "Proof node finished");
    Ok(())
}

/// Submit one request per subject, then repeat the first to show a cache hit
async fn run_batch(pipeline: &ProofPipeline, requests: usize) -> anyhow::Result<(usize, usize)> {
    let now = current_timestamp_ms();
    let mut tickets = Vec::with_capacity(requests + 1);

    for i in 0..requests {
        let subject = format!("did:trust:subject-{}", i);
        let (proof_type, threshold) = if i % 2 == 0 {
            (ProofType::Exact, None)
        } else {
            (ProofType::Threshold, Some(0.3))
        };
        let options = RequestOptions {
            priority: priority_for(i),
            user_id: Some(format!("user-{}", i % 3)),
            threshold,
            ..RequestOptions::default()
        };
        let ticket = pipeline
            .request_proof(demo_attestations(&subject, i, now), proof_type, options)
            .map_err(|e| anyhow!("request for {} rejected: {}", subject, e))?;
        tickets.push(ticket);
    }

    let mut succeeded = 0;
    let mut failed = 0;
    for ticket in tickets {
        let request_id = ticket.request_id().to_string();
        match ticket.wait().await {
            Ok(result) => {
                succeeded += 1;
                info!(
                    request_id = %request_id,
                    hash = %result.hash,
                    circuit = %result.circuit_size,
                    "Proof ready"
                );
            }
            Err(e) => {
                failed += 1;
                warn!(request_id = %request_id, kind = %e.kind, error = %e, "Proof failed");
            }
        }
    }

    if requests > 0 {
        let repeat = pipeline
            .generate_proof(
                demo_attestations("did:trust:subject-0", 0, now),
                ProofType::Exact,
                RequestOptions::default(),
            )
            .await;
        match repeat {
            Ok(_) => succeeded += 1,
            Err(e) => {
                failed += 1;
                warn!(kind = %e.kind, error = %e, "Repeat request failed");
            }
        }
    }
    Ok((succeeded, failed))
}

fn priority_for(index: usize) -> Priority {
    match index % 4 {
        0 => Priority::Normal,
        1 => Priority::High,
        2 => Priority::Low,
        _ => Priority::Critical,
    }
}

/// Deterministic attestations about `subject` with opinions spread by `seed`
fn demo_attestations(subject: &str, seed: usize, now: u64) -> Vec<TrustAttestation> {
    (0..ATTESTATIONS_PER_REQUEST)
        .map(|j| {
            let belief = 0.4 + 0.05 * ((seed + j) % 8) as f64;
            let disbelief = 0.05 * ((seed * 3 + j) % 3) as f64;
            let uncertainty = (1.0 - belief - disbelief).max(0.0);
            TrustAttestation {
                source: format!("did:trust:peer-{}", j),
                target: subject.to_string(),
                opinion: SubjectiveOpinion::new(belief, disbelief, uncertainty, 0.5),
                attestation_type: if j % 3 == 0 {
                    AttestationType::Vouch
                } else {
                    AttestationType::Trust
                },
                weight: 1.0,
                created_at: now.saturating_sub(60_000),
                expires_at: now + 86_400_000,
            }
        })
        .collect()
}

/// In-process workers report liveness on the configured interval
fn spawn_heartbeats(
    pool: WorkerPoolManager,
    worker_ids: Vec<String>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            for id in &worker_ids {
                if let Err(e) = pool.record_heartbeat(id) {
                    warn!(worker_id = %id, error = %e, "Heartbeat rejected");
                }
            }
        }
    })
}

fn parse_config_path(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    Ok(flag_value(args, "--config")?.map(PathBuf::from))
}

fn parse_mode(args: &[String]) -> anyhow::Result<ExecutionMode> {
    match flag_value(args, "--mode")? {
        None | Some("local") => Ok(ExecutionMode::Local),
        Some("pool") => Ok(ExecutionMode::Pool),
        Some(other) => bail!("unknown --mode {} (expected local or pool)", other),
    }
}

fn parse_requests(args: &[String]) -> anyhow::Result<usize> {
    match flag_value(args, "--requests")? {
        None => Ok(DEFAULT_REQUESTS),
        Some(raw) => raw
            .parse()
            .with_context(|| format!("--requests expects a count, got {}", raw)),
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> anyhow::Result<Option<&'a str>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == flag {
            return match args_iter.next() {
                Some(value) => Ok(Some(value.as_str())),
                None => Err(anyhow!("{} was provided without a value", flag)),
            };
        }
    }
    Ok(None)
}
