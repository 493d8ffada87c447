//! Optimizer strategies for federated GLM fitting.
//!
//! Exactly two methods are supported, Newton-Raphson and IRLS, represented
//! as a closed enum: adding a method means implementing both the
//! local-statistics half and the aggregation half of the contract.

pub mod irls;
pub mod newton;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::glm::model::{GlmModel, IrlsWorking, NormalEquations};

/// Optimization method for one federation run.
///
/// Chosen once by the sites and bound by the coordinator on the first
/// contribution; immutable afterward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Newton-Raphson over summed score vectors and Hessians.
    NewtonRaphson,
    /// Iteratively reweighted least squares over summed normal equations.
    Irls,
}

impl Method {
    /// Parse a method from its wire key.
    pub fn from_key(key: &str) -> Result<Self> {
        match key {
            "NR" => Ok(Method::NewtonRaphson),
            "IRLS" => Ok(Method::Irls),
            other => Err(Error::Configuration(format!(
                "no optimizer found for method: {other}"
            ))),
        }
    }

    /// Wire key for this method.
    pub fn key(self) -> &'static str {
        match self {
            Method::NewtonRaphson => "NR",
            Method::Irls => "IRLS",
        }
    }

    /// Fresh accumulator for this method.
    pub fn new_accumulator(self) -> Accumulator {
        match self {
            Method::NewtonRaphson => Accumulator::Newton(newton::NewtonAccumulator::default()),
            Method::Irls => Accumulator::Irls(irls::IrlsAccumulator::default()),
        }
    }

    /// Compute this site's contribution for a round.
    ///
    /// Round 0 initializes (local fit for NR, zero coefficients plus the
    /// canonical feature ordering for IRLS); later rounds recompute local
    /// sufficient statistics at the shared coefficients. The per-site state
    /// from round t is passed back in at round t+1.
    pub fn local_round(
        self,
        round: u64,
        global_beta: Option<&Array1<f64>>,
        model: &GlmModel,
        state: Option<SiteState>,
    ) -> Result<(SiteContribution, SiteState)> {
        match self {
            Method::NewtonRaphson => newton::local_round(round, global_beta, model, state),
            Method::Irls => irls::local_round(round, global_beta, model, state),
        }
    }

    /// Fold one contribution into the round accumulator.
    pub fn accumulate(
        self,
        contribution: &SiteContribution,
        accumulator: &mut Accumulator,
        round: u64,
    ) -> Result<()> {
        match (self, accumulator) {
            (Method::NewtonRaphson, Accumulator::Newton(acc)) => {
                newton::accumulate(&contribution.payload, acc, round)
            }
            (Method::Irls, Accumulator::Irls(acc)) => {
                irls::accumulate(&contribution.payload, acc, round)
            }
            _ => Err(Error::BadContribution(
                "accumulator does not match the bound method".into(),
            )),
        }
    }

    /// Close the round: produce the next coefficient estimate, the
    /// convergence decision and the (NR-only) accuracy threshold, and reset
    /// the accumulator sums.
    pub fn round_result(
        self,
        accumulator: &mut Accumulator,
        round: u64,
        target_accuracy: f64,
        accuracy_threshold: Option<&Array1<f64>>,
        betas_list: &mut Vec<Array1<f64>>,
    ) -> Result<(Option<Array1<f64>>, ResultPayload)> {
        match (self, accumulator) {
            (Method::NewtonRaphson, Accumulator::Newton(acc)) => {
                newton::round_result(acc, round, target_accuracy, accuracy_threshold, betas_list)
            }
            (Method::Irls, Accumulator::Irls(acc)) => {
                irls::round_result(acc, target_accuracy)
            }
            _ => Err(Error::BadContribution(
                "accumulator does not match the bound method".into(),
            )),
        }
    }
}

/// Terminal signal carried in a round result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// The federation has converged; sites should stop issuing rounds.
    Abort,
}

/// One site's contribution for one round.
///
/// Created fresh at the site each round and consumed exactly once by the
/// aggregator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteContribution {
    /// Which optimizer produced the payload.
    pub method: Method,
    /// Canonical coefficient ordering as this site sees it, when reported.
    pub exog_names: Option<Vec<String>>,
    /// Method- and round-specific statistics.
    pub payload: ContributionPayload,
}

/// Method-specific payload of a contribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ContributionPayload {
    /// NR round 0: the site's unconstrained local fit.
    NrInit { beta: Array1<f64> },
    /// NR refinement: score and Hessian at the shared coefficients.
    NrDerivatives {
        score: Array1<f64>,
        hessian: Array2<f64>,
    },
    /// IRLS: partial normal equations plus the local Hessian; round 0 also
    /// carries the zero starting coefficients.
    IrlsRound {
        initial_beta: Option<Array1<f64>>,
        site_hessian: Array2<f64>,
        ols: NormalEquations,
    },
}

/// Result broadcast to the round driver after a round closes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Next global coefficient estimate.
    pub beta: Array1<f64>,
    /// Federated standard errors (zero-filled when not yet available).
    pub fed_stderror: Array1<f64>,
    /// Coefficient ordering, stamped by the aggregator when known.
    pub exog_names: Vec<String>,
    /// Present once the federation has converged.
    pub signal: Option<Signal>,
    /// AIC-style score attached on terminal replay when a log-likelihood
    /// sum was accumulated.
    pub aic: Option<f64>,
}

impl ResultPayload {
    /// Whether this payload carries the terminal abort signal.
    pub fn is_converged(&self) -> bool {
        self.signal == Some(Signal::Abort)
    }
}

/// Per-site state threaded across rounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SiteState {
    /// Last coefficient vector the NR site evaluated at.
    Newton { beta: Array1<f64> },
    /// IRLS working quantities for the next re-linearization.
    Irls { working: IrlsWorking },
}

/// Per-round running sums, keyed by method.
#[derive(Clone, Debug)]
pub enum Accumulator {
    Newton(newton::NewtonAccumulator),
    Irls(irls::IrlsAccumulator),
}

/// Sum an optional vector accumulator in place, establishing dimensions on
/// first use and rejecting mismatched contributions.
pub(crate) fn sum_vec(slot: &mut Option<Array1<f64>>, value: &Array1<f64>) -> Result<()> {
    match slot {
        None => {
            *slot = Some(value.clone());
            Ok(())
        }
        Some(current) if current.len() == value.len() => {
            *current += value;
            Ok(())
        }
        Some(current) => Err(Error::BadContribution(format!(
            "vector contribution has {} entries, accumulator has {}",
            value.len(),
            current.len()
        ))),
    }
}

/// Sum an optional matrix accumulator in place, establishing dimensions on
/// first use and rejecting mismatched contributions.
pub(crate) fn sum_mat(slot: &mut Option<Array2<f64>>, value: &Array2<f64>) -> Result<()> {
    match slot {
        None => {
            *slot = Some(value.clone());
            Ok(())
        }
        Some(current) if current.dim() == value.dim() => {
            *current += value;
            Ok(())
        }
        Some(current) => Err(Error::BadContribution(format!(
            "matrix contribution is {:?}, accumulator is {:?}",
            value.dim(),
            current.dim()
        ))),
    }
}
