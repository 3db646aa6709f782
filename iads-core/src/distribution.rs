//! Posterior distributions over metric values
//!
//! One sum type covers both families the system tracks: Beta for the
//! Bernoulli liveness indicator and Gaussian for continuous metrics
//! (rtt, plr, bandwidth). Uncertainty is differential entropy; expected
//! information gain is the entropy reduction a single further
//! measurement would buy.

use crate::EPSILON_VARIANCE;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Posterior over one (entity, metric) value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum Distribution {
    /// Beta(α, β) over a Bernoulli success probability
    Beta { alpha: f64, beta: f64 },
    /// Gaussian(μ, σ²) over a continuous value
    Gaussian { mu: f64, sigma2: f64 },
}

impl Distribution {
    /// Beta posterior; parameters are floored at 1 to keep the density bounded
    pub fn beta(alpha: f64, beta: f64) -> Self {
        Self::Beta {
            alpha: alpha.max(1.0),
            beta: beta.max(1.0),
        }
    }

    /// Gaussian posterior; variance is floored at [`EPSILON_VARIANCE`]
    pub fn gaussian(mu: f64, sigma2: f64) -> Self {
        Self::Gaussian {
            mu,
            sigma2: sigma2.max(EPSILON_VARIANCE),
        }
    }

    /// Bayesian posterior update with one measurement.
    ///
    /// Beta treats the measurement as a Bernoulli indicator (`> 0.5` is a
    /// success); Gaussian performs the conjugate precision-weighted update
    /// with the metric's observation noise variance.
    pub fn update(&mut self, measurement: f64, noise_var: f64) {
        match self {
            Distribution::Beta { alpha, beta } => {
                if measurement > 0.5 {
                    *alpha += 1.0;
                } else {
                    *beta += 1.0;
                }
            }
            Distribution::Gaussian { mu, sigma2 } => {
                let noise = noise_var.max(EPSILON_VARIANCE);
                let posterior_sigma2 = 1.0 / (1.0 / *sigma2 + 1.0 / noise);
                let posterior_mu = posterior_sigma2 * (*mu / *sigma2 + measurement / noise);
                *mu = posterior_mu;
                if posterior_sigma2 < EPSILON_VARIANCE {
                    debug!(
                        sigma2 = posterior_sigma2,
                        "variance collapsed below floor, clamping"
                    );
                }
                *sigma2 = posterior_sigma2.max(EPSILON_VARIANCE);
            }
        }
    }

    /// Differential entropy of the posterior in nats.
    ///
    /// May be negative for sharply peaked densities; scheduling code
    /// clamps it into `[0, max_uncertainty]`.
    pub fn entropy(&self) -> f64 {
        match *self {
            Distribution::Beta { alpha, beta } => beta_entropy(alpha, beta),
            Distribution::Gaussian { sigma2, .. } => gaussian_entropy(sigma2),
        }
    }

    /// Expected posterior entropy after one further measurement.
    ///
    /// Beta averages both Bernoulli branches under the posterior
    /// predictive; Gaussian is deterministic in the noise variance.
    pub fn predictive_entropy(&self, noise_var: f64) -> f64 {
        match *self {
            Distribution::Beta { alpha, beta } => {
                let p_up = alpha / (alpha + beta);
                p_up * beta_entropy(alpha + 1.0, beta) + (1.0 - p_up) * beta_entropy(alpha, beta + 1.0)
            }
            Distribution::Gaussian { sigma2, .. } => {
                let noise = noise_var.max(EPSILON_VARIANCE);
                gaussian_entropy(1.0 / (1.0 / sigma2 + 1.0 / noise))
            }
        }
    }

    /// Expected information gain of one measurement, in nats.
    ///
    /// Gaussian has the closed form `½·ln(1 + σ²/σ²_noise)`; Beta is the
    /// expected entropy reduction over both observation branches. Never
    /// negative.
    pub fn expected_information_gain(&self, noise_var: f64) -> f64 {
        let gain = match *self {
            Distribution::Gaussian { sigma2, .. } => {
                let noise = noise_var.max(EPSILON_VARIANCE);
                0.5 * (1.0 + sigma2 / noise).ln()
            }
            Distribution::Beta { .. } => self.entropy() - self.predictive_entropy(noise_var),
        };
        gain.max(0.0)
    }

    /// Point confidence: Beta success probability, or a precision-shaped
    /// score for Gaussian states
    pub fn confidence(&self) -> f64 {
        match *self {
            Distribution::Beta { alpha, beta } => alpha / (alpha + beta),
            Distribution::Gaussian { sigma2, .. } => 1.0 / (1.0 + sigma2),
        }
    }

    /// Posterior mean
    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Beta { alpha, beta } => alpha / (alpha + beta),
            Distribution::Gaussian { mu, .. } => mu,
        }
    }

    /// Posterior variance
    pub fn variance(&self) -> f64 {
        match *self {
            Distribution::Beta { alpha, beta } => {
                let n = alpha + beta;
                alpha * beta / (n * n * (n + 1.0))
            }
            Distribution::Gaussian { sigma2, .. } => sigma2,
        }
    }

    /// Whether this is the Beta family
    pub fn is_beta(&self) -> bool {
        matches!(self, Distribution::Beta { .. })
    }
}

/// Differential entropy of a Gaussian with variance `sigma2`
fn gaussian_entropy(sigma2: f64) -> f64 {
    0.5 * (2.0 * PI * std::f64::consts::E * sigma2.max(EPSILON_VARIANCE)).ln()
}

/// Differential entropy of Beta(α, β):
/// `ln B(α,β) − (α−1)ψ(α) − (β−1)ψ(β) + (α+β−2)ψ(α+β)`
fn beta_entropy(alpha: f64, beta: f64) -> f64 {
    ln_beta(alpha, beta)
        - (alpha - 1.0) * digamma(alpha)
        - (beta - 1.0) * digamma(beta)
        + (alpha + beta - 2.0) * digamma(alpha + beta)
}

fn ln_beta(alpha: f64, beta: f64) -> f64 {
    ln_gamma(alpha) + ln_gamma(beta) - ln_gamma(alpha + beta)
}

/// Log-gamma via the Lanczos approximation (g = 7, 9 coefficients)
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // reflection for the left half-plane
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, &c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + G + 0.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Digamma ψ(x): recurrence into the asymptotic regime, then the
/// standard series expansion
fn digamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc -= 1.0 / x;
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + x.ln() - 0.5 * inv
        - inv2 * (1.0 / 12.0 - inv2 * (1.0 / 120.0 - inv2 / 252.0))
}
