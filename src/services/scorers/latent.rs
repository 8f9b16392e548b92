use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

use super::Scorer;
use crate::{
    error::RecResult,
    models::{ItemId, ModelKind, UserId},
    services::matrix::DatasetSplit,
};

const EPSILON: f64 = 1e-10;

/// Low-rank factors whose product approximates the train matrix
#[derive(Debug, Clone)]
pub struct LatentFactors {
    rank: usize,
    /// users × rank, row-major
    user_factors: Vec<f64>,
    /// items × rank, row-major (transpose of the item-factor matrix)
    item_factors: Vec<f64>,
}

impl LatentFactors {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn user_factors(&self, row: usize) -> &[f64] {
        &self.user_factors[row * self.rank..(row + 1) * self.rank]
    }

    pub fn item_factors(&self, col: usize) -> &[f64] {
        &self.item_factors[col * self.rank..(col + 1) * self.rank]
    }

    /// Reconstructed cell value
    pub fn reconstruct(&self, row: usize, col: usize) -> f64 {
        self.user_factors(row)
            .iter()
            .zip(self.item_factors(col))
            .map(|(u, v)| u * v)
            .sum()
    }
}

/// Latent-factor scorer, shared by the unconstrained and non-negative variants
pub struct LatentFactorScorer {
    kind: ModelKind,
    data: Arc<DatasetSplit>,
    factors: LatentFactors,
}

impl LatentFactorScorer {
    /// Truncated SVD: projects the train matrix onto its top-`rank` right
    /// singular subspace. User factors are `M·V`, item factors `Vᵀ`.
    pub fn fit_svd(data: Arc<DatasetSplit>, rank: usize, iterations: usize, seed: u64) -> Self {
        let factors = truncated_svd(&data, rank, iterations, seed);
        tracing::info!(rank = factors.rank, iterations, "Fitted SVD model");
        Self {
            kind: ModelKind::Svd,
            data,
            factors,
        }
    }

    /// Non-negative factorization with multiplicative updates
    pub fn fit_nmf(data: Arc<DatasetSplit>, rank: usize, max_iter: usize, seed: u64) -> Self {
        let factors = nmf(&data, rank, max_iter, seed);
        tracing::info!(rank = factors.rank, max_iter, "Fitted NMF model");
        Self {
            kind: ModelKind::Nmf,
            data,
            factors,
        }
    }

    pub fn factors(&self) -> &LatentFactors {
        &self.factors
    }
}

impl Scorer for LatentFactorScorer {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn score_items(&self, user_id: UserId) -> RecResult<Vec<(ItemId, f64)>> {
        let full = &self.data.full;
        let row = full.user_row(user_id)?;
        Ok(full
            .unrated_items(row)
            .map(|col| (full.item_id(col), self.factors.reconstruct(row, col)))
            .collect())
    }

    fn predict(&self, user_id: UserId, item_id: ItemId) -> RecResult<f64> {
        let row = self.data.full.user_row(user_id)?;
        let col = self.data.full.item_col(item_id)?;
        Ok(self.factors.reconstruct(row, col))
    }
}

fn effective_rank(data: &DatasetSplit, rank: usize) -> usize {
    rank.min(data.train.n_users()).min(data.train.n_items()).max(1)
}

/// Block subspace iteration on the observed cells of the train matrix
fn truncated_svd(data: &DatasetSplit, rank: usize, iterations: usize, seed: u64) -> LatentFactors {
    let train = &data.train;
    let (m, n) = (train.n_users(), train.n_items());
    let k = effective_rank(data, rank);
    let observed = train.observed();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut v: Vec<f64> = (0..n * k).map(|_| rng.gen::<f64>() - 0.5).collect();
    orthonormalize_columns(&mut v, n, k);

    let mut w = vec![0.0; m * k];
    for _ in 0..iterations.max(1) {
        multiply(&observed, &v, &mut w, k, false);
        let mut z = vec![0.0; n * k];
        multiply(&observed, &w, &mut z, k, true);
        orthonormalize_columns(&mut z, n, k);
        v = z;
    }
    multiply(&observed, &v, &mut w, k, false);

    LatentFactors {
        rank: k,
        user_factors: w,
        item_factors: v,
    }
}

/// Lee–Seung updates minimizing the Frobenius reconstruction error
fn nmf(data: &DatasetSplit, rank: usize, max_iter: usize, seed: u64) -> LatentFactors {
    let train = &data.train;
    let (m, n) = (train.n_users(), train.n_items());
    let k = effective_rank(data, rank);
    let observed = train.observed();

    let scale = (train.mean() / k as f64).sqrt();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut w: Vec<f64> = (0..m * k).map(|_| rng.gen::<f64>() * scale + EPSILON).collect();
    let mut h: Vec<f64> = (0..n * k).map(|_| rng.gen::<f64>() * scale + EPSILON).collect();

    let mut numer_h = vec![0.0; n * k];
    let mut numer_w = vec![0.0; m * k];
    for _ in 0..max_iter {
        // H ← H ∘ (WᵀM) / (WᵀW·H)
        multiply(&observed, &w, &mut numer_h, k, true);
        let gram_w = gram(&w, m, k);
        for col in 0..n {
            let h_col = &mut h[col * k..(col + 1) * k];
            let denom = times_gram(h_col, &gram_w, k);
            for j in 0..k {
                h_col[j] *= numer_h[col * k + j] / (denom[j] + EPSILON);
            }
        }

        // W ← W ∘ (M·Hᵀ) / (W·H·Hᵀ)
        multiply(&observed, &h, &mut numer_w, k, false);
        let gram_h = gram(&h, n, k);
        for row in 0..m {
            let w_row = &mut w[row * k..(row + 1) * k];
            let denom = times_gram(w_row, &gram_h, k);
            for j in 0..k {
                w_row[j] *= numer_w[row * k + j] / (denom[j] + EPSILON);
            }
        }
    }

    LatentFactors {
        rank: k,
        user_factors: w,
        item_factors: h,
    }
}

/// Sparse product over observed cells.
///
/// `transpose == false`: `out (users × k) = M · factors (items × k)`.
/// `transpose == true`: `out (items × k) = Mᵀ · factors (users × k)`.
fn multiply(
    observed: &[(usize, usize, f64)],
    factors: &[f64],
    out: &mut [f64],
    k: usize,
    transpose: bool,
) {
    out.iter_mut().for_each(|x| *x = 0.0);
    for &(row, col, value) in observed {
        let (dst, src) = if transpose { (col, row) } else { (row, col) };
        for j in 0..k {
            out[dst * k + j] += value * factors[src * k + j];
        }
    }
}

/// `Aᵀ·A` for a row-major `rows × k` matrix
fn gram(a: &[f64], rows: usize, k: usize) -> Vec<f64> {
    let mut g = vec![0.0; k * k];
    for r in 0..rows {
        let row = &a[r * k..(r + 1) * k];
        for p in 0..k {
            for q in 0..k {
                g[p * k + q] += row[p] * row[q];
            }
        }
    }
    g
}

/// `x · G` for a length-k row vector and a symmetric k × k matrix
fn times_gram(x: &[f64], g: &[f64], k: usize) -> Vec<f64> {
    (0..k)
        .map(|j| (0..k).map(|p| x[p] * g[p * k + j]).sum())
        .collect()
}

/// Modified Gram–Schmidt on the columns of a row-major `rows × k` matrix.
/// Degenerate columns are zeroed.
fn orthonormalize_columns(a: &mut [f64], rows: usize, k: usize) {
    for j in 0..k {
        for p in 0..j {
            let dot: f64 = (0..rows).map(|i| a[i * k + j] * a[i * k + p]).sum();
            for i in 0..rows {
                a[i * k + j] -= dot * a[i * k + p];
            }
        }
        let norm = (0..rows).map(|i| a[i * k + j].powi(2)).sum::<f64>().sqrt();
        for i in 0..rows {
            a[i * k + j] = if norm > 1e-12 { a[i * k + j] / norm } else { 0.0 };
        }
    }
}
