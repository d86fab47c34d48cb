//! Temporal similarity fusion.
//!
//! Scores a candidate's temporal matrix against the query's with three
//! metrics and fixed fusion weights:
//!
//! - DTW similarity `1 / (1 + d)` from band-constrained dynamic time
//!   warping over Euclidean row distance (radius 10);
//! - cosine similarity of the temporal means;
//! - variance similarity `1 - |v_q - v_c| / (v_q + v_c + eps)`.
//!
//! Temporal score = `0.5*dtw + 0.3*cos + 0.2*var`; the final score blends
//! it with the global score as `0.7*temporal + 0.3*global`. All
//! intermediate arithmetic is f32.

use ndarray::{Array2, ArrayView1, Axis};

/// Band half-width for constrained DTW.
pub const DTW_RADIUS: usize = 10;

/// Numerical guard shared by all similarity terms.
pub const EPSILON: f32 = 1e-8;

const W_DTW: f32 = 0.5;
const W_COS: f32 = 0.3;
const W_VAR: f32 = 0.2;
const W_TEMPORAL: f32 = 0.7;
const W_GLOBAL: f32 = 0.3;

/// The three temporal metrics and their fusion.
#[derive(Debug, Clone, Copy)]
pub struct TemporalScores {
    pub dtw_similarity: f32,
    pub cosine_similarity: f32,
    pub variance_similarity: f32,
    pub temporal_score: f32,
}

impl TemporalScores {
    /// Blend with the candidate's global similarity score.
    pub fn fuse_with_global(&self, global_score: f32) -> f32 {
        W_TEMPORAL * self.temporal_score + W_GLOBAL * global_score
    }
}

/// Compute the temporal similarity between a query and candidate matrix.
///
/// An empty matrix on either side scores zero on every term.
pub fn temporal_similarity(query: &Array2<f32>, candidate: &Array2<f32>) -> TemporalScores {
    if query.nrows() == 0 || candidate.nrows() == 0 {
        return TemporalScores {
            dtw_similarity: 0.0,
            cosine_similarity: 0.0,
            variance_similarity: 0.0,
            temporal_score: 0.0,
        };
    }

    let dtw_distance = banded_dtw(query, candidate, DTW_RADIUS);
    let dtw_similarity = 1.0 / (1.0 + dtw_distance);

    let query_mean = query.mean_axis(Axis(0)).expect("non-empty query matrix");
    let candidate_mean = candidate
        .mean_axis(Axis(0))
        .expect("non-empty candidate matrix");
    let dot: f32 = query_mean
        .iter()
        .zip(candidate_mean.iter())
        .map(|(a, b)| a * b)
        .sum();
    let cosine_similarity =
        dot / (norm(query_mean.view()) * norm(candidate_mean.view()) + EPSILON);

    let query_var = mean_of(&query.var_axis(Axis(0), 0.0));
    let candidate_var = mean_of(&candidate.var_axis(Axis(0), 0.0));
    let variance_similarity =
        1.0 - (query_var - candidate_var).abs() / (query_var + candidate_var + EPSILON);

    let temporal_score =
        W_DTW * dtw_similarity + W_COS * cosine_similarity + W_VAR * variance_similarity;

    TemporalScores {
        dtw_similarity,
        cosine_similarity,
        variance_similarity,
        temporal_score,
    }
}

/// Band-constrained (Sakoe–Chiba) DTW distance with Euclidean row
/// distance. The band is centered on the diagonal scaled to the two
/// sequence lengths, with half-width `radius`.
pub fn banded_dtw(query: &Array2<f32>, candidate: &Array2<f32>, radius: usize) -> f32 {
    let n = query.nrows();
    let m = candidate.nrows();
    if n == 0 || m == 0 {
        return f32::INFINITY;
    }

    let mut cost = Array2::from_elem((n + 1, m + 1), f32::INFINITY);
    cost[[0, 0]] = 0.0;

    for i in 1..=n {
        let (lo, hi) = band_bounds(i, n, m, radius);
        for j in lo..=hi {
            let d = euclidean(query.row(i - 1), candidate.row(j - 1));
            let best = cost[[i - 1, j]]
                .min(cost[[i, j - 1]])
                .min(cost[[i - 1, j - 1]]);
            if best.is_finite() {
                cost[[i, j]] = d + best;
            }
        }
    }

    cost[[n, m]]
}

/// 1-based column range of the band for row `i`.
fn band_bounds(i: usize, n: usize, m: usize, radius: usize) -> (usize, usize) {
    let center = if n > 1 {
        1 + (i - 1) * (m - 1) / (n - 1)
    } else {
        1
    };
    let lo = center.saturating_sub(radius).max(1);
    let hi = (center + radius).min(m);
    (lo, hi)
}

fn euclidean(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

fn norm(v: ArrayView1<f32>) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn mean_of(v: &ndarray::Array1<f32>) -> f32 {
    if v.is_empty() {
        0.0
    } else {
        v.sum() / v.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn dtw_of_identical_sequences_is_zero() {
        let q = arr2(&[[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        assert_eq!(banded_dtw(&q, &q, DTW_RADIUS), 0.0);
    }

    #[test]
    fn dtw_matches_hand_computed_value() {
        // 1-D rows; alignment can stretch the middle step.
        let q = arr2(&[[0.0f32], [1.0], [2.0]]);
        let c = arr2(&[[0.0f32], [1.0], [1.0], [2.0]]);
        // Optimal path matches 1 against both middle steps at zero cost.
        assert_eq!(banded_dtw(&q, &c, DTW_RADIUS), 0.0);

        let c2 = arr2(&[[0.5f32], [1.5], [2.5]]);
        // Diagonal path, each step costs 0.5.
        assert!((banded_dtw(&q, &c2, DTW_RADIUS) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn dtw_handles_unequal_lengths() {
        let q = arr2(&[[0.0f32], [1.0]]);
        let c = arr2(&[
            [0.0f32],
            [0.0],
            [0.0],
            [0.0],
            [0.0],
            [0.0],
            [0.0],
            [0.0],
            [1.0],
        ]);
        let d = banded_dtw(&q, &c, DTW_RADIUS);
        assert!(d.is_finite());
        assert_eq!(d, 0.0);
    }

    #[test]
    fn dtw_empty_is_infinite() {
        let q = Array2::<f32>::zeros((0, 2));
        let c = arr2(&[[1.0f32, 2.0]]);
        assert!(banded_dtw(&q, &c, DTW_RADIUS).is_infinite());
    }

    #[test]
    fn identical_matrices_score_near_one() {
        let q = arr2(&[[1.0f32, 0.0], [0.0, 1.0], [1.0, 1.0]]);
        let scores = temporal_similarity(&q, &q);
        assert!((scores.dtw_similarity - 1.0).abs() < 1e-6);
        assert!(scores.cosine_similarity > 0.999);
        assert!(scores.variance_similarity > 0.999);
        assert!((scores.temporal_score - 1.0).abs() < 1e-3);
    }

    #[test]
    fn fusion_uses_pinned_weights() {
        let q = arr2(&[[1.0f32, 0.0], [0.0, 1.0]]);
        let c = arr2(&[[0.5f32, 0.5], [0.5, 0.0]]);
        let scores = temporal_similarity(&q, &c);

        let expected_temporal = 0.5 * scores.dtw_similarity
            + 0.3 * scores.cosine_similarity
            + 0.2 * scores.variance_similarity;
        assert!((scores.temporal_score - expected_temporal).abs() < 1e-6);

        let global = 0.8f32;
        let fused = scores.fuse_with_global(global);
        assert!((fused - (0.7 * scores.temporal_score + 0.3 * global)).abs() < 1e-6);
    }

    #[test]
    fn variance_similarity_separates_dynamics() {
        // Static candidate vs. oscillating query: variance terms differ.
        let still = arr2(&[[1.0f32, 1.0], [1.0, 1.0], [1.0, 1.0]]);
        let moving = arr2(&[[1.0f32, -1.0], [-1.0, 1.0], [1.0, -1.0]]);
        let scores = temporal_similarity(&moving, &still);
        assert!(scores.variance_similarity < 0.1);

        let alike = temporal_similarity(&moving, &moving);
        assert!(alike.variance_similarity > 0.99);
    }
}
