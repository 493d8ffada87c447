//! Coordinator-side contribution aggregation.
//!
//! One aggregator instance serves a whole federation run. Every mutation
//! goes through a single exclusive lock: concurrent site submissions cannot
//! interleave with each other or with closing a round.

use std::sync::Mutex;

use ndarray::Array1;
use tracing::{info, warn};

use crate::core::{now, Error, Result, Timestamp};
use crate::optimizer::{Accumulator, Method, ResultPayload, SiteContribution};

/// Audit record for one accepted contribution.
#[derive(Clone, Debug)]
pub struct ContributionRecord {
    /// Site that contributed.
    pub contributor: String,
    /// Round the contribution belongs to.
    pub round: u64,
    /// Declared weight (number of local steps); recorded, not applied to
    /// the sums.
    pub weight: f64,
    /// When the contribution was accepted.
    pub timestamp: Timestamp,
}

/// Everything mutable, guarded by the aggregator's one lock.
struct AggregatorState {
    method: Option<Method>,
    accumulator: Option<Accumulator>,
    contribution_round: Option<u64>,
    betas_list: Vec<Array1<f64>>,
    accuracy_threshold: Option<Array1<f64>>,
    exog_names: Option<Vec<String>>,
    history: Vec<ContributionRecord>,
    abort_signal: bool,
    last_result: Option<ResultPayload>,
    /// Never populated by either strategy; kept so the terminal AIC
    /// computation stays total instead of failing on a missing sum.
    log_likelihood_sum: Option<f64>,
}

/// Coordinator aggregator for federated GLM rounds.
///
/// Collects one contribution per active site per round, closes the round on
/// demand, and replays a frozen terminal payload once the federation has
/// converged.
pub struct CoeffAggregator {
    state: Mutex<AggregatorState>,
    target_accuracy: f64,
}

impl CoeffAggregator {
    /// Create an aggregator with the externally supplied convergence
    /// tolerance.
    pub fn new(target_accuracy: f64) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                method: None,
                accumulator: None,
                contribution_round: None,
                betas_list: Vec::new(),
                accuracy_threshold: None,
                exog_names: None,
                history: Vec::new(),
                abort_signal: false,
                last_result: None,
                log_likelihood_sum: None,
            }),
            target_accuracy,
        }
    }

    /// Accept one site's contribution for a round.
    ///
    /// The first contribution binds the optimization method for the whole
    /// run; later contributions reporting a different method are rejected.
    /// Reported `exog_names` must agree across all sites.
    pub fn add(
        &self,
        contribution: &SiteContribution,
        weight: f64,
        contributor: &str,
        round: u64,
    ) -> Result<()> {
        let mut state = self.lock();

        match state.method {
            None => {
                state.method = Some(contribution.method);
                state.accumulator = Some(contribution.method.new_accumulator());
                info!(method = contribution.method.key(), "bound optimization method");
            }
            Some(method) if method != contribution.method => {
                return Err(Error::BadContribution(format!(
                    "contribution reports method {}, federation is bound to {}",
                    contribution.method.key(),
                    method.key()
                )));
            }
            Some(_) => {}
        }

        if let Some(reported) = &contribution.exog_names {
            match &state.exog_names {
                None => state.exog_names = Some(reported.clone()),
                Some(expected) if expected != reported => {
                    warn!(?expected, got = ?reported, "exog_names mismatch");
                    return Err(Error::SchemaMismatch {
                        expected: expected.clone(),
                        got: reported.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        state.contribution_round = Some(round);
        let method = state.method.expect("method bound above");
        let accumulator = state.accumulator.as_mut().expect("accumulator bound above");
        method.accumulate(contribution, accumulator, round)?;

        state.history.push(ContributionRecord {
            contributor: contributor.to_string(),
            round,
            weight,
            timestamp: now(),
        });
        Ok(())
    }

    /// Close the current round and produce the next global estimate.
    ///
    /// Once the run has converged, every further call replays the frozen
    /// terminal payload without recomputation; an AIC score is attached only
    /// when a log-likelihood sum was ever accumulated.
    pub fn get_result(&self) -> Result<ResultPayload> {
        let mut state = self.lock();

        if state.abort_signal {
            let mut result = state
                .last_result
                .clone()
                .ok_or_else(|| Error::BadContribution("aborted without a cached result".into()))?;
            match state.log_likelihood_sum {
                Some(ll_sum) => {
                    let k = result.beta.len() as f64;
                    result.aic = Some(2.0 * k - 2.0 * ll_sum);
                }
                None => {
                    warn!("no accumulated log-likelihood; terminal replay carries no AIC");
                }
            }
            return Ok(result);
        }

        let method = state
            .method
            .ok_or_else(|| Error::BadContribution("no contributions received yet".into()))?;
        let round = state.contribution_round.ok_or_else(|| {
            Error::BadContribution("closing a round before any contribution".into())
        })?;
        let target_accuracy = self.target_accuracy;

        // Split the borrow so the strategy can mutate the accumulator and
        // the beta history at the same time.
        let AggregatorState {
            accumulator,
            betas_list,
            accuracy_threshold,
            ..
        } = &mut *state;
        let accumulator = accumulator.as_mut().expect("accumulator exists once bound");
        let (threshold, mut result) = method.round_result(
            accumulator,
            round,
            target_accuracy,
            accuracy_threshold.as_ref(),
            betas_list,
        )?;

        // Threshold caching is only meaningful for NR; IRLS returns None
        // and keeps comparing against target_accuracy.
        if threshold.is_some() {
            state.accuracy_threshold = threshold;
        }
        if let Some(names) = &state.exog_names {
            result.exog_names = names.clone();
        }
        if result.is_converged() {
            info!(round, "federation converged, freezing terminal result");
            state.abort_signal = true;
            state.last_result = Some(result.clone());
        }
        Ok(result)
    }

    /// Whether the run has converged and further results are replays.
    pub fn is_aborted(&self) -> bool {
        self.lock().abort_signal
    }

    /// The method bound for this run, if any contribution arrived yet.
    pub fn method(&self) -> Option<Method> {
        self.lock().method
    }

    /// Audit history of accepted contributions.
    pub fn history(&self) -> Vec<ContributionRecord> {
        self.lock().history.clone()
    }

    /// Number of accepted contributions over the whole run.
    pub fn contribution_count(&self) -> usize {
        self.lock().history.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AggregatorState> {
        // A poisoned lock means a panic mid-mutation; the sums cannot be
        // trusted, so propagate the panic.
        self.state.lock().expect("aggregator lock poisoned")
    }
}
