//! Fusion Engine Performance Benchmarks
//!
//! Measures:
//! - Pairwise weighted fusion
//! - Direct vs partitioned reputation computation over growing evidence sets
//! - Set-membership commitment hashing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use trustproof_core::{AttestationType, SubjectiveOpinion, TrustAttestation};
use trustproof_fusion::{compute_set_membership_inputs, fuse_opinions, TrustFusionEngine};

/// Generate a reproducible attestation set about `subject`
fn create_attestations(count: usize, subject: &str) -> Vec<TrustAttestation> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    (0..count)
        .map(|i| {
            let uncertainty: f64 = rng.gen_range(0.05..0.6);
            let split: f64 = rng.gen_range(0.0..1.0);
            TrustAttestation {
                source: format!("source-{}", i),
                target: subject.to_string(),
                opinion: SubjectiveOpinion::new(
                    (1.0 - uncertainty) * split,
                    (1.0 - uncertainty) * (1.0 - split),
                    uncertainty,
                    0.5,
                ),
                attestation_type: AttestationType::Trust,
                weight: rng.gen_range(0.5..2.0),
                created_at: 0,
                expires_at: u64::MAX,
            }
        })
        .collect()
}

fn bench_pairwise_fusion(c: &mut Criterion) {
    let a = SubjectiveOpinion::new(0.6, 0.1, 0.3, 0.5);
    let b = SubjectiveOpinion::new(0.2, 0.5, 0.3, 0.4);

    c.bench_function("fuse_opinions_pair", |bench| {
        bench.iter(|| black_box(fuse_opinions(black_box(&a), black_box(&b), 0.7, 0.3).unwrap()))
    });
}

fn bench_compute_reputation(c: &mut Criterion) {
    let engine = TrustFusionEngine::with_defaults();

    for size in [10usize, 50, 200, 1000] {
        let attestations = create_attestations(size, "subject");

        c.bench_with_input(
            BenchmarkId::new("compute_reputation_direct", size),
            &attestations,
            |b, attestations| {
                b.iter(|| black_box(engine.compute_reputation("subject", attestations, false)))
            },
        );

        c.bench_with_input(
            BenchmarkId::new("compute_reputation_partitioned", size),
            &attestations,
            |b, attestations| {
                b.iter(|| black_box(engine.compute_reputation("subject", attestations, true)))
            },
        );
    }
}

fn bench_set_membership(c: &mut Criterion) {
    for size in [16usize, 64, 256] {
        let attestations = create_attestations(size, "subject");
        c.bench_with_input(
            BenchmarkId::new("set_membership_inputs", size),
            &attestations,
            |b, attestations| {
                b.iter(|| black_box(compute_set_membership_inputs(attestations, Some("subject"))))
            },
        );
    }
}

criterion_group!(
    benches,
    bench_pairwise_fusion,
    bench_compute_reputation,
    bench_set_membership
);
criterion_main!(benches);
