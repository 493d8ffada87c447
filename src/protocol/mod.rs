//! Boundary message types exchanged with the external round driver.
//!
//! Transport and authentication are external concerns; these types only fix
//! the shape of what crosses the boundary.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::optimizer::SiteContribution;

/// Kind tag of an exchanged payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    /// Coefficient vectors and derived statistics.
    Weights,
    /// Evaluation metrics; never valid for a fitting round.
    Metrics,
}

/// Round-start message broadcast from the coordinator to every site.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundMessage {
    /// Declared kind of the payload; sites reject anything but `Weights`.
    pub data_kind: DataKind,
    /// Current shared coefficients; absent at round 0.
    pub beta: Option<Array1<f64>>,
    /// Round being started.
    pub current_round: u64,
    /// Upper bound on rounds for this run.
    pub total_rounds: u64,
}

impl RoundMessage {
    /// Round-0 initialization message.
    pub fn initial(total_rounds: u64) -> Self {
        Self {
            data_kind: DataKind::Weights,
            beta: None,
            current_round: 0,
            total_rounds,
        }
    }

    /// Refinement-round message carrying the current global coefficients.
    pub fn refinement(beta: Array1<f64>, current_round: u64, total_rounds: u64) -> Self {
        Self {
            data_kind: DataKind::Weights,
            beta: Some(beta),
            current_round,
            total_rounds,
        }
    }
}

/// A site's reply to a round-start message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteReply {
    /// Kind tag of the outgoing payload.
    pub data_kind: DataKind,
    /// The contribution for this round.
    pub contribution: SiteContribution,
    /// Number of local update steps performed this round; recorded by the
    /// coordinator as an optional weighting signal.
    pub num_local_steps: u64,
}
