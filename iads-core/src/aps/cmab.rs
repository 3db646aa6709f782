//! Contextual multi-armed bandit (linear-Gaussian Thompson sampling)
//!
//! Four probing strategies compete as bandit arms. Each arm carries a
//! Gaussian posterior over a weight vector `θ ∈ ℝ⁴`; selection samples
//! every posterior and plays the arm whose sampled weights score the
//! current context highest. Rewards update only the selected arm.

use crate::types::ContextVector;
use crate::CONTEXT_DIM;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution as RandDistribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::Strategy;

/// Posterior over one arm's weight vector
#[derive(Debug, Clone)]
struct ArmPosterior {
    /// Posterior mean μ
    mu: Array1<f64>,
    /// Posterior covariance Σ
    sigma: Array2<f64>,
    /// Posterior precision Λ = Σ⁻¹, maintained incrementally
    precision: Array2<f64>,
    /// Times this arm was played
    selections: u64,
}

impl ArmPosterior {
    fn new() -> Self {
        Self {
            mu: Array1::zeros(CONTEXT_DIM),
            sigma: Array2::eye(CONTEXT_DIM),
            precision: Array2::eye(CONTEXT_DIM),
            selections: 0,
        }
    }

    /// Draw θ ~ N(μ, Σ) via the Cholesky factor of Σ
    fn sample(&self, rng: &mut StdRng) -> Array1<f64> {
        let chol = cholesky(&self.sigma);
        let z: Array1<f64> =
            Array1::from_iter((0..CONTEXT_DIM).map(|_| StandardNormal.sample(rng)));
        &self.mu + &chol.dot(&z)
    }

    /// Conjugate update with observed (context, reward).
    ///
    /// `Λ ← Λ + ccᵀ/ν`; Σ follows by the Sherman–Morrison rank-1
    /// identity, so no general matrix inversion is needed;
    /// `μ ← Σ_new (Λ_old μ_old + c·r/ν)`.
    fn update(&mut self, context: &Array1<f64>, reward: f64, noise_var: f64) {
        let precision_old = self.precision.clone();

        self.precision = &self.precision + &(outer(context, context) / noise_var);

        let sigma_c = self.sigma.dot(context);
        let denom = noise_var + context.dot(&sigma_c);
        self.sigma = &self.sigma - &(outer(&sigma_c, &sigma_c) / denom);

        let rhs = precision_old.dot(&self.mu) + context * (reward / noise_var);
        self.mu = self.sigma.dot(&rhs);
    }
}

/// Record of the last selection, kept for the reward update
#[derive(Debug, Clone)]
struct SelectionRecord {
    context: Array1<f64>,
    strategy: Strategy,
}

/// Per-arm posterior snapshot exposed through statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmSnapshot {
    pub selections: u64,
    pub mu: Vec<f64>,
    pub sigma_diagonal: Vec<f64>,
}

/// Bandit statistics for `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmabStatistics {
    pub total_selections: u64,
    pub arms: HashMap<String, ArmSnapshot>,
}

/// The Thompson sampler; see module docs
pub struct Cmab {
    arms: [ArmPosterior; Strategy::COUNT],
    noise_var: f64,
    rng: StdRng,
    pending: Option<SelectionRecord>,
    total_selections: u64,
}

impl Cmab {
    pub fn new(noise_var: f64) -> Self {
        Self::with_seed(noise_var, rand::random())
    }

    /// Deterministic sampler for tests and replayable runs
    pub fn with_seed(noise_var: f64, seed: u64) -> Self {
        Self {
            arms: std::array::from_fn(|_| ArmPosterior::new()),
            noise_var: noise_var.max(f64::EPSILON),
            rng: StdRng::seed_from_u64(seed),
            pending: None,
            total_selections: 0,
        }
    }

    /// Thompson-sample all arms against `context` and play the best.
    ///
    /// The (context, arm) pair is recorded; the following
    /// [`Cmab::update`] call applies the observed reward to it.
    #[instrument(skip_all)]
    pub fn select_strategy(&mut self, context: &ContextVector) -> Strategy {
        let c = Array1::from(context.as_array().to_vec());

        let mut best = Strategy::ALL[0];
        let mut best_score = f64::NEG_INFINITY;
        for strategy in Strategy::ALL {
            let theta = self.arms[strategy as usize].sample(&mut self.rng);
            let score = c.dot(&theta);
            if score > best_score {
                best_score = score;
                best = strategy;
            }
        }

        self.arms[best as usize].selections += 1;
        self.total_selections += 1;
        self.pending = Some(SelectionRecord {
            context: c,
            strategy: best,
        });

        debug!(strategy = %best, score = best_score, "strategy selected");
        best
    }

    /// Fold the round's reward into the arm recorded at selection time.
    /// A reward without a pending selection is dropped.
    #[instrument(skip(self))]
    pub fn update(&mut self, reward: f64) {
        let Some(record) = self.pending.take() else {
            debug!("reward with no pending selection, dropping");
            return;
        };
        self.arms[record.strategy as usize].update(&record.context, reward, self.noise_var);
        debug!(strategy = %record.strategy, reward, "arm posterior updated");
    }

    /// Strategy recorded by the most recent selection, if any
    pub fn pending_strategy(&self) -> Option<Strategy> {
        self.pending.as_ref().map(|record| record.strategy)
    }

    pub fn total_selections(&self) -> u64 {
        self.total_selections
    }

    /// Posterior snapshot per arm
    pub fn strategy_stats(&self) -> CmabStatistics {
        let arms = Strategy::ALL
            .iter()
            .map(|&strategy| {
                let arm = &self.arms[strategy as usize];
                (
                    strategy.as_str().to_string(),
                    ArmSnapshot {
                        selections: arm.selections,
                        mu: arm.mu.to_vec(),
                        sigma_diagonal: arm.sigma.diag().to_vec(),
                    },
                )
            })
            .collect();
        CmabStatistics {
            total_selections: self.total_selections,
            arms,
        }
    }

    /// Posterior-mean score of an arm against a context
    pub fn mean_score(&self, strategy: Strategy, context: &ContextVector) -> f64 {
        let c = Array1::from(context.as_array().to_vec());
        self.arms[strategy as usize].mu.dot(&c)
    }

    #[cfg(test)]
    fn set_arm_mean(&mut self, strategy: Strategy, mean: [f64; CONTEXT_DIM]) {
        self.arms[strategy as usize].mu = Array1::from(mean.to_vec());
    }

    #[cfg(test)]
    fn arm(&self, strategy: Strategy) -> (&Array1<f64>, &Array2<f64>, &Array2<f64>) {
        let arm = &self.arms[strategy as usize];
        (&arm.mu, &arm.sigma, &arm.precision)
    }
}

/// Outer product `a bᵀ`
fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((a.len(), b.len()));
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            out[(i, j)] = ai * bj;
        }
    }
    out
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite
/// matrix. Covariances here stay positive definite by construction; a
/// diagonal square-root fallback guards against numerical drift.
fn cholesky(matrix: &Array2<f64>) -> Array2<f64> {
    let n = matrix.nrows();
    let mut lower = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[(i, j)];
            for k in 0..j {
                sum -= lower[(i, k)] * lower[(j, k)];
            }
            if i == j {
                if sum <= 0.0 {
                    return diagonal_sqrt(matrix);
                }
                lower[(i, j)] = sum.sqrt();
            } else {
                lower[(i, j)] = sum / lower[(j, j)];
            }
        }
    }
    lower
}

fn diagonal_sqrt(matrix: &Array2<f64>) -> Array2<f64> {
    let n = matrix.nrows();
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        out[(i, i)] = matrix[(i, i)].max(0.0).sqrt();
    }
    out
}
