//! Newton-Raphson strategy.
//!
//! Round 0 fits each site's model locally and averages the resulting
//! coefficients; later rounds sum score vectors and Hessians across sites
//! and take a Newton step from the previous global estimate.

use ndarray::{Array1, Array2};
use tracing::{debug, info};

use crate::core::{Error, Result};
use crate::glm::linalg;
use crate::glm::model::GlmModel;
use crate::optimizer::{
    sum_mat, sum_vec, ContributionPayload, Method, ResultPayload, Signal, SiteContribution,
    SiteState,
};

/// Running sums for one NR round.
#[derive(Clone, Debug, Default)]
pub struct NewtonAccumulator {
    /// Sum of round-0 local fits, averaged over `count_clients`.
    beta_sum: Option<Array1<f64>>,
    count_clients: usize,
    score_sum: Option<Array1<f64>>,
    hessian_sum: Option<Array2<f64>>,
}

/// Compute the local NR contribution for one round.
pub fn local_round(
    round: u64,
    global_beta: Option<&Array1<f64>>,
    model: &GlmModel,
    _state: Option<SiteState>,
) -> Result<(SiteContribution, SiteState)> {
    if round == 0 {
        let beta = model.fit()?;
        debug!(round, "local maximum-likelihood fit complete");
        let contribution = SiteContribution {
            method: Method::NewtonRaphson,
            exog_names: Some(model.exog_names().to_vec()),
            payload: ContributionPayload::NrInit { beta: beta.clone() },
        };
        Ok((contribution, SiteState::Newton { beta }))
    } else {
        let beta = global_beta.ok_or_else(|| {
            Error::BadContribution(format!(
                "round {round} NR task carries no shared coefficients"
            ))
        })?;
        let score = model.score(beta)?;
        let hessian = model.hessian(beta)?;
        let contribution = SiteContribution {
            method: Method::NewtonRaphson,
            exog_names: Some(model.exog_names().to_vec()),
            payload: ContributionPayload::NrDerivatives { score, hessian },
        };
        Ok((contribution, SiteState::Newton { beta: beta.clone() }))
    }
}

/// Fold one NR contribution into the accumulator.
pub fn accumulate(
    payload: &ContributionPayload,
    acc: &mut NewtonAccumulator,
    round: u64,
) -> Result<()> {
    match (round, payload) {
        (0, ContributionPayload::NrInit { beta }) => {
            sum_vec(&mut acc.beta_sum, beta)?;
            acc.count_clients += 1;
            Ok(())
        }
        (_, ContributionPayload::NrDerivatives { score, hessian }) if round > 0 => {
            sum_vec(&mut acc.score_sum, score)?;
            sum_mat(&mut acc.hessian_sum, hessian)?;
            Ok(())
        }
        _ => Err(Error::BadContribution(format!(
            "unexpected NR payload for round {round}"
        ))),
    }
}

/// Close an NR round.
///
/// Round 0 averages the local fits and fixes the accuracy threshold at
/// `|target_accuracy * beta|`; later rounds take the Newton step
/// `beta_{t+1} = beta_t - H^-1 score` and test `|delta| < threshold`
/// element-wise. The sums are cleared regardless of convergence.
pub fn round_result(
    acc: &mut NewtonAccumulator,
    round: u64,
    target_accuracy: f64,
    accuracy_threshold: Option<&Array1<f64>>,
    betas_list: &mut Vec<Array1<f64>>,
) -> Result<(Option<Array1<f64>>, ResultPayload)> {
    if round == 0 {
        let beta_sum = acc.beta_sum.take().ok_or_else(|| {
            Error::BadContribution("round 0 closed with no site contributions".into())
        })?;
        let next_beta = beta_sum / acc.count_clients as f64;
        acc.count_clients = 0;
        acc.score_sum = None;
        acc.hessian_sum = None;

        let threshold = next_beta.mapv(|b| (target_accuracy * b).abs());
        let fed_stderror = Array1::zeros(next_beta.len());
        betas_list.push(next_beta.clone());
        info!(round, "initial federated estimate from averaged local fits");
        return Ok((
            Some(threshold),
            ResultPayload {
                beta: next_beta,
                fed_stderror,
                exog_names: Vec::new(),
                signal: None,
                aic: None,
            },
        ));
    }

    let score_sum = acc.score_sum.take().ok_or_else(|| {
        Error::BadContribution(format!("round {round} closed with no site contributions"))
    })?;
    let hessian_sum = acc
        .hessian_sum
        .take()
        .ok_or_else(|| Error::BadContribution("round closed without Hessian sums".into()))?;
    acc.beta_sum = None;
    acc.count_clients = 0;

    let prev_beta = betas_list
        .last()
        .ok_or_else(|| Error::BadContribution("no previous coefficient estimate".into()))?
        .clone();
    let threshold = accuracy_threshold.ok_or_else(|| {
        Error::BadContribution("refinement round closed before round 0 set the threshold".into())
    })?;

    // Hessian of the log-likelihood is negative semi-definite near the
    // optimum, so subtracting H^-1 score ascends the likelihood.
    let hessian_inv = linalg::inv(&hessian_sum)?;
    let step = -hessian_inv.dot(&score_sum);
    let next_beta = &prev_beta + &step;
    let accuracy = (&next_beta - &prev_beta).mapv(f64::abs);

    let fisher = hessian_sum.mapv(|v| -v);
    let fed_stderror = linalg::inv_diag_sqrt(&fisher)?;

    let converged = accuracy
        .iter()
        .zip(threshold.iter())
        .all(|(a, t)| a < t);

    if converged {
        info!(round, "reached accuracy threshold");
        return Ok((
            Some(threshold.clone()),
            ResultPayload {
                beta: next_beta,
                fed_stderror,
                exog_names: Vec::new(),
                signal: Some(Signal::Abort),
                aic: None,
            },
        ));
    }

    betas_list.push(next_beta.clone());
    debug!(round, "advanced federated NR estimate");
    Ok((
        Some(threshold.clone()),
        ResultPayload {
            beta: next_beta,
            fed_stderror,
            exog_names: Vec::new(),
            signal: None,
            aic: None,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::dataset::{Column, Dataset};
    use crate::glm::family::Family;
    use crate::glm::spec::GlmSpec;
    use crate::optimizer::Accumulator;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn site_model(x: Vec<f64>, y: Vec<f64>) -> GlmModel {
        let data = Dataset::from_columns(vec![
            ("y".into(), Column::Float(y)),
            ("x".into(), Column::Float(x)),
        ])
        .unwrap();
        let spec = GlmSpec::with_formula(Family::Gaussian, "y ~ x");
        GlmModel::new(&spec, &data).unwrap()
    }

    #[test]
    fn test_round_zero_contribution_is_local_fit() {
        // y = 2 + 3x exactly
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 + 3.0 * v).collect();
        let model = site_model(x, y);
        let (contribution, state) = local_round(0, None, &model, None).unwrap();
        match contribution.payload {
            ContributionPayload::NrInit { beta } => {
                assert_abs_diff_eq!(beta[0], 2.0, epsilon = 1e-8);
                assert_abs_diff_eq!(beta[1], 3.0, epsilon = 1e-8);
            }
            _ => panic!("expected an NrInit payload"),
        }
        assert!(matches!(state, SiteState::Newton { .. }));
    }

    #[test]
    fn test_refinement_round_requires_shared_beta() {
        let model = site_model(vec![0.0, 1.0], vec![1.0, 2.0]);
        assert!(matches!(
            local_round(1, None, &model, None),
            Err(Error::BadContribution(_))
        ));
    }

    #[test]
    fn test_round_zero_averages_local_fits() {
        let mut acc = NewtonAccumulator::default();
        accumulate(
            &ContributionPayload::NrInit {
                beta: array![1.0, 2.0],
            },
            &mut acc,
            0,
        )
        .unwrap();
        accumulate(
            &ContributionPayload::NrInit {
                beta: array![3.0, 4.0],
            },
            &mut acc,
            0,
        )
        .unwrap();
        let mut betas = Vec::new();
        let (threshold, payload) = round_result(&mut acc, 0, 0.1, None, &mut betas).unwrap();
        assert_eq!(payload.beta, array![2.0, 3.0]);
        assert_eq!(payload.fed_stderror, array![0.0, 0.0]);
        assert!(payload.signal.is_none());
        let threshold = threshold.unwrap();
        assert_abs_diff_eq!(threshold[0], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(threshold[1], 0.3, epsilon = 1e-12);
        assert_eq!(betas.len(), 1);
    }

    #[test]
    fn test_wrong_round_payload_rejected() {
        let mut acc = NewtonAccumulator::default();
        let err = accumulate(
            &ContributionPayload::NrDerivatives {
                score: array![0.0],
                hessian: array![[1.0]],
            },
            &mut acc,
            0,
        );
        assert!(matches!(err, Err(Error::BadContribution(_))));
    }

    #[test]
    fn test_newton_step_and_convergence() {
        // One-parameter quadratic likelihood: score = -(beta - 5), H = -1.
        // From beta = 0 a single step lands on 5.
        let mut acc = NewtonAccumulator::default();
        accumulate(
            &ContributionPayload::NrDerivatives {
                score: array![5.0],
                hessian: array![[-1.0]],
            },
            &mut acc,
            1,
        )
        .unwrap();
        let mut betas = vec![array![0.0]];
        let threshold = array![0.01];
        let (_, payload) =
            round_result(&mut acc, 1, 0.1, Some(&threshold), &mut betas).unwrap();
        assert_abs_diff_eq!(payload.beta[0], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(payload.fed_stderror[0], 1.0, epsilon = 1e-12);
        assert!(payload.signal.is_none());

        // At the optimum the score vanishes and the step is below threshold.
        accumulate(
            &ContributionPayload::NrDerivatives {
                score: array![0.0],
                hessian: array![[-1.0]],
            },
            &mut acc,
            2,
        )
        .unwrap();
        let (_, payload) =
            round_result(&mut acc, 2, 0.1, Some(&threshold), &mut betas).unwrap();
        assert_eq!(payload.signal, Some(Signal::Abort));
    }

    #[test]
    fn test_singular_hessian_is_fatal() {
        let mut acc = NewtonAccumulator::default();
        accumulate(
            &ContributionPayload::NrDerivatives {
                score: array![1.0, 1.0],
                hessian: array![[1.0, 2.0], [2.0, 4.0]],
            },
            &mut acc,
            1,
        )
        .unwrap();
        let mut betas = vec![array![0.0, 0.0]];
        let threshold = array![0.1, 0.1];
        assert!(matches!(
            round_result(&mut acc, 1, 0.1, Some(&threshold), &mut betas),
            Err(Error::Numerical(_))
        ));
    }

    #[test]
    fn test_sums_reset_after_round() {
        let mut acc = NewtonAccumulator::default();
        accumulate(
            &ContributionPayload::NrInit { beta: array![4.0] },
            &mut acc,
            0,
        )
        .unwrap();
        let mut betas = Vec::new();
        round_result(&mut acc, 0, 0.1, None, &mut betas).unwrap();
        assert!(acc.beta_sum.is_none());
        assert_eq!(acc.count_clients, 0);

        // A fresh contribution after the reset behaves as if the accumulator
        // had just been created.
        accumulate(
            &ContributionPayload::NrInit { beta: array![6.0] },
            &mut acc,
            0,
        )
        .unwrap();
        let (_, payload) = round_result(&mut acc, 0, 0.1, None, &mut betas).unwrap();
        assert_eq!(payload.beta, array![6.0]);
    }

    #[test]
    fn test_accumulator_via_method_dispatch() {
        let mut acc = Method::NewtonRaphson.new_accumulator();
        let contribution = SiteContribution {
            method: Method::NewtonRaphson,
            exog_names: None,
            payload: ContributionPayload::NrInit { beta: array![1.0] },
        };
        Method::NewtonRaphson
            .accumulate(&contribution, &mut acc, 0)
            .unwrap();
        match acc {
            Accumulator::Newton(inner) => assert_eq!(inner.count_clients, 1),
            _ => panic!("expected a Newton accumulator"),
        }
    }
}
