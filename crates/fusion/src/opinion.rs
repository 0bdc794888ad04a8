//! Pairwise opinion algebra.
//!
//! Fusion works in evidence space: an opinion with uncertainty `u` carries
//! evidence proportional to `(1 - u) / u`. Uncertainty therefore fuses
//! cumulatively and never grows, while the weights decide how the committed
//! mass `1 - u` is split between belief and disbelief.

use crate::error::{FusionError, FusionResult};
use trustproof_core::{SubjectiveOpinion, OPINION_EPSILON};

/// Fields in [0,1] and `|b + d + u - 1| < ε`
pub fn validate_opinion(opinion: &SubjectiveOpinion) -> bool {
    opinion.is_valid()
}

/// Expected value of an opinion under its base-rate prior: `b + a·u`.
pub fn opinion_to_reputation(opinion: &SubjectiveOpinion) -> f64 {
    opinion.expected_value().clamp(0.0, 1.0)
}

/// Fuse two opinions with equal weights.
pub fn fuse_subjective_opinions(
    first: &SubjectiveOpinion,
    second: &SubjectiveOpinion,
) -> FusionResult<SubjectiveOpinion> {
    fuse_opinions(first, second, 1.0, 1.0)
}

/// Weighted EBSL fusion of two opinions.
///
/// Weights are normalized to sum to 1. When both opinions are (numerically)
/// certain the evidence ratio is undefined and the result falls back to a
/// weighted average with uncertainty `min(u1, u2)`.
pub fn fuse_opinions(
    first: &SubjectiveOpinion,
    second: &SubjectiveOpinion,
    first_weight: f64,
    second_weight: f64,
) -> FusionResult<SubjectiveOpinion> {
    for opinion in [first, second] {
        if !validate_opinion(opinion) {
            return Err(FusionError::InvalidOpinion(format!("{:?}", opinion)));
        }
    }
    for weight in [first_weight, second_weight] {
        if !weight.is_finite() || weight < 0.0 {
            return Err(FusionError::InvalidWeight(weight));
        }
    }

    let total = first_weight + second_weight;
    let (w1, w2) = if total < OPINION_EPSILON {
        (0.5, 0.5)
    } else {
        (first_weight / total, second_weight / total)
    };

    // A zero-weight opinion contributes no evidence at all
    if w1 == 0.0 {
        return Ok(*second);
    }
    if w2 == 0.0 {
        return Ok(*first);
    }

    let (b1, d1, u1, a1) = (
        first.belief,
        first.disbelief,
        first.uncertainty,
        first.base_rate,
    );
    let (b2, d2, u2, a2) = (
        second.belief,
        second.disbelief,
        second.uncertainty,
        second.base_rate,
    );

    let denom = w1 * u1 + w2 * u2 - w1 * w2 * u1 * u2;
    if denom.abs() < OPINION_EPSILON {
        return Ok(clamp_opinion(SubjectiveOpinion::new(
            w1 * b1 + w2 * b2,
            w1 * d1 + w2 * d2,
            u1.min(u2),
            w1 * a1 + w2 * a2,
        )));
    }

    let uncertainty = (u1 * u2) / (u1 + u2 - u1 * u2);

    let committed_belief = w1 * b1 * u2 + w2 * b2 * u1;
    let committed_disbelief = w1 * d1 * u2 + w2 * d2 * u1;
    let committed = committed_belief + committed_disbelief;
    let (belief, disbelief) = if committed < OPINION_EPSILON {
        ((1.0 - uncertainty) / 2.0, (1.0 - uncertainty) / 2.0)
    } else {
        (
            (1.0 - uncertainty) * committed_belief / committed,
            (1.0 - uncertainty) * committed_disbelief / committed,
        )
    };

    let certainty = w1 * (1.0 - u1) + w2 * (1.0 - u2);
    let base_rate = if certainty < OPINION_EPSILON {
        w1 * a1 + w2 * a2
    } else {
        (w1 * a1 * (1.0 - u1) + w2 * a2 * (1.0 - u2)) / certainty
    };

    Ok(clamp_opinion(renormalize(SubjectiveOpinion::new(
        belief,
        disbelief,
        uncertainty,
        base_rate,
    ))))
}

/// Rescale `b, d, u` proportionally when their sum drifts from 1.
fn renormalize(opinion: SubjectiveOpinion) -> SubjectiveOpinion {
    let mass = opinion.mass();
    if (mass - 1.0).abs() <= OPINION_EPSILON || mass <= 0.0 {
        return opinion;
    }
    SubjectiveOpinion::new(
        opinion.belief / mass,
        opinion.disbelief / mass,
        opinion.uncertainty / mass,
        opinion.base_rate,
    )
}

fn clamp_opinion(opinion: SubjectiveOpinion) -> SubjectiveOpinion {
    SubjectiveOpinion::new(
        opinion.belief.clamp(0.0, 1.0),
        opinion.disbelief.clamp(0.0, 1.0),
        opinion.uncertainty.clamp(0.0, 1.0),
        opinion.base_rate.clamp(0.0, 1.0),
    )
}
