//! Distribution families for generalized linear models.
//!
//! Gaussian, Binomial and Poisson with their canonical links (identity,
//! logit, log). Score and Hessian calculus is evaluated at unit scale so
//! that per-site sums remain comparable across sites.

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Lower clamp applied to probabilities/means that must stay off a boundary.
const BOUNDARY_EPS: f64 = 1e-10;

/// GLM distribution family, paired with its canonical link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    /// Gaussian with identity link.
    Gaussian,
    /// Binomial with logit link.
    Binomial,
    /// Poisson with log link.
    Poisson,
}

impl Family {
    /// Parse a family from its configuration name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "Gaussian" => Ok(Family::Gaussian),
            "Binomial" => Ok(Family::Binomial),
            "Poisson" => Ok(Family::Poisson),
            other => Err(Error::Configuration(format!(
                "unknown distribution family: {other}"
            ))),
        }
    }

    /// Starting value for the mean, used to seed IRLS before any
    /// coefficients exist.
    pub fn starting_mu(self, y: &[f64]) -> Vec<f64> {
        match self {
            Family::Gaussian | Family::Poisson => {
                let mean = y.iter().sum::<f64>() / y.len() as f64;
                y.iter().map(|v| (v + mean) / 2.0).collect()
            }
            Family::Binomial => y.iter().map(|v| (v + 0.5) / 2.0).collect(),
        }
    }

    /// Canonical link g(mu).
    pub fn link(self, mu: f64) -> f64 {
        match self {
            Family::Gaussian => mu,
            Family::Binomial => (mu / (1.0 - mu)).ln(),
            Family::Poisson => mu.ln(),
        }
    }

    /// Inverse link g^-1(eta), clamped away from boundary values.
    pub fn inverse_link(self, eta: f64) -> f64 {
        match self {
            Family::Gaussian => eta,
            Family::Binomial => {
                let mu = 1.0 / (1.0 + (-eta).exp());
                mu.clamp(BOUNDARY_EPS, 1.0 - BOUNDARY_EPS)
            }
            Family::Poisson => eta.exp().max(BOUNDARY_EPS),
        }
    }

    /// Derivative of the link, g'(mu).
    pub fn link_deriv(self, mu: f64) -> f64 {
        match self {
            Family::Gaussian => 1.0,
            Family::Binomial => 1.0 / (mu * (1.0 - mu)),
            Family::Poisson => 1.0 / mu,
        }
    }

    /// Variance function V(mu).
    pub fn variance(self, mu: f64) -> f64 {
        match self {
            Family::Gaussian => 1.0,
            Family::Binomial => mu * (1.0 - mu),
            Family::Poisson => mu,
        }
    }

    /// IRLS observation weight, 1 / (g'(mu)^2 V(mu)).
    ///
    /// For canonical links this coincides with d(mu)/d(eta).
    pub fn irls_weight(self, mu: f64) -> f64 {
        match self {
            Family::Gaussian => 1.0,
            Family::Binomial => mu * (1.0 - mu),
            Family::Poisson => mu,
        }
    }

    /// Per-observation log-likelihood at unit scale.
    pub fn log_likelihood_obs(self, y: f64, mu: f64) -> f64 {
        match self {
            Family::Gaussian => {
                let resid = y - mu;
                -0.5 * resid * resid - 0.5 * (2.0 * std::f64::consts::PI).ln()
            }
            Family::Binomial => y * mu.ln() + (1.0 - y) * (1.0 - mu).ln(),
            Family::Poisson => y * mu.ln() - mu - ln_factorial(y),
        }
    }

    /// Model deviance, used as the IRLS initialization sanity check.
    pub fn deviance(self, y: &[f64], mu: &[f64]) -> f64 {
        y.iter()
            .zip(mu.iter())
            .map(|(&yi, &mi)| match self {
                Family::Gaussian => (yi - mi).powi(2),
                Family::Binomial => {
                    let one = if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
                    let zero = if yi < 1.0 {
                        (1.0 - yi) * ((1.0 - yi) / (1.0 - mi)).ln()
                    } else {
                        0.0
                    };
                    2.0 * (one + zero)
                }
                Family::Poisson => {
                    let term = if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
                    2.0 * (term - (yi - mi))
                }
            })
            .sum()
    }
}

/// ln(y!) for non-negative integer-valued y (Poisson counts).
fn ln_factorial(y: f64) -> f64 {
    let n = y.round().max(0.0) as u64;
    (2..=n).map(|k| (k as f64).ln()).sum()
}
