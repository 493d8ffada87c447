//! IRLS strategy.
//!
//! Each round every site re-linearizes its model locally and ships the
//! partial weighted normal-equation matrices; the coordinator solves
//! `(sum A)^-1 (sum B)`, which equals the centralized weighted-least-squares
//! solution on the pooled design at the same re-linearization point.

use ndarray::{Array1, Array2};
use tracing::{debug, info};

use crate::core::{Error, Result};
use crate::glm::linalg;
use crate::glm::model::GlmModel;
use crate::optimizer::{
    sum_mat, sum_vec, ContributionPayload, Method, ResultPayload, Signal, SiteContribution,
    SiteState,
};

/// Running sums for one IRLS round.
#[derive(Clone, Debug, Default)]
pub struct IrlsAccumulator {
    /// Coefficients the current round was evaluated at; seeded by the
    /// round-0 initial beta and advanced by every solve.
    beta_opt: Option<Array1<f64>>,
    a_sum: Option<Array2<f64>>,
    b_sum: Option<Array1<f64>>,
    combined_hessian: Option<Array2<f64>>,
}

/// Compute the local IRLS contribution for one round.
pub fn local_round(
    round: u64,
    global_beta: Option<&Array1<f64>>,
    model: &GlmModel,
    state: Option<SiteState>,
) -> Result<(SiteContribution, SiteState)> {
    let (working, initial_beta, eval_beta) = if round == 0 {
        let working = model.irls_init()?;
        let zero = Array1::zeros(model.num_params());
        debug!(round, "IRLS initialization from the family starting mean");
        (working, Some(zero.clone()), zero)
    } else {
        let beta = global_beta.ok_or_else(|| {
            Error::BadContribution(format!(
                "round {round} IRLS task carries no shared coefficients"
            ))
        })?;
        let mut working = match state {
            Some(SiteState::Irls { working }) => working,
            Some(SiteState::Newton { .. }) => {
                return Err(Error::BadContribution(
                    "IRLS round received Newton-Raphson site state".into(),
                ))
            }
            None => {
                return Err(Error::BadContribution(
                    "IRLS refinement round without prior working state".into(),
                ))
            }
        };
        working.params = Some(beta.clone());
        (working, None, beta.clone())
    };

    // Hessian at the shared coefficients, for standard-error reporting.
    let site_hessian = model.hessian(&eval_beta)?;
    let (ols, next_working) = model.irls_step(&working)?;

    let contribution = SiteContribution {
        method: Method::Irls,
        exog_names: Some(model.exog_names().to_vec()),
        payload: ContributionPayload::IrlsRound {
            initial_beta,
            site_hessian,
            ols,
        },
    };
    Ok((
        contribution,
        SiteState::Irls {
            working: next_working,
        },
    ))
}

/// Fold one IRLS contribution into the accumulator.
///
/// Sites contribute unweighted: the normal-equation matrices already encode
/// per-row weights, so no per-site sample-size factor is applied.
pub fn accumulate(
    payload: &ContributionPayload,
    acc: &mut IrlsAccumulator,
    _round: u64,
) -> Result<()> {
    match payload {
        ContributionPayload::IrlsRound {
            initial_beta,
            site_hessian,
            ols,
        } => {
            if acc.beta_opt.is_none() {
                if let Some(beta) = initial_beta {
                    acc.beta_opt = Some(beta.clone());
                }
            }
            sum_mat(&mut acc.a_sum, &ols.a)?;
            sum_vec(&mut acc.b_sum, &ols.b)?;
            sum_mat(&mut acc.combined_hessian, site_hessian)?;
            Ok(())
        }
        _ => Err(Error::BadContribution(
            "expected an IRLS payload".into(),
        )),
    }
}

/// Close an IRLS round: solve the federated normal equations, test
/// `|delta| < target_accuracy` element-wise, and clear the sums.
///
/// IRLS never sets an accuracy threshold of its own; the first element of
/// the returned pair is always `None`.
pub fn round_result(
    acc: &mut IrlsAccumulator,
    target_accuracy: f64,
) -> Result<(Option<Array1<f64>>, ResultPayload)> {
    let a_sum = acc.a_sum.take().ok_or_else(|| {
        Error::BadContribution("IRLS round closed with no site contributions".into())
    })?;
    let b_sum = acc
        .b_sum
        .take()
        .ok_or_else(|| Error::BadContribution("IRLS round closed without B sums".into()))?;
    let combined_hessian = acc
        .combined_hessian
        .take()
        .ok_or_else(|| Error::BadContribution("IRLS round closed without Hessian sums".into()))?;

    let prev_beta = acc.beta_opt.take().ok_or_else(|| {
        Error::BadContribution("IRLS round closed before any site sent its initial beta".into())
    })?;

    let next_beta = linalg::solve(&a_sum, &b_sum)?;
    let accuracy = (&next_beta - &prev_beta).mapv(f64::abs);

    let fisher = combined_hessian.mapv(|v| -v);
    let fed_stderror = linalg::inv_diag_sqrt(&fisher)?;

    acc.beta_opt = Some(next_beta.clone());

    let converged = accuracy.iter().all(|a| *a < target_accuracy);
    if converged {
        info!("reached accuracy threshold");
    } else {
        debug!("advanced federated IRLS estimate");
    }

    Ok((
        None,
        ResultPayload {
            beta: next_beta,
            fed_stderror,
            exog_names: Vec::new(),
            signal: converged.then_some(Signal::Abort),
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
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn gaussian_model(x: Vec<f64>, y: Vec<f64>) -> GlmModel {
        let data = Dataset::from_columns(vec![
            ("y".into(), Column::Float(y)),
            ("x".into(), Column::Float(x)),
        ])
        .unwrap();
        let spec = GlmSpec::with_formula(Family::Gaussian, "y ~ x");
        GlmModel::new(&spec, &data).unwrap()
    }

    #[test]
    fn test_round_zero_emits_zero_beta_and_names() {
        let model = gaussian_model(vec![0.0, 1.0, 2.0], vec![1.0, 3.0, 5.0]);
        let (contribution, state) = local_round(0, None, &model, None).unwrap();
        assert_eq!(
            contribution.exog_names.as_deref(),
            Some(&["Intercept".to_string(), "x".to_string()][..])
        );
        match contribution.payload {
            ContributionPayload::IrlsRound { initial_beta, .. } => {
                assert_eq!(initial_beta.unwrap(), array![0.0, 0.0]);
            }
            _ => panic!("expected an IrlsRound payload"),
        }
        assert!(matches!(state, SiteState::Irls { .. }));
    }

    #[test]
    fn test_refinement_requires_state_and_beta() {
        let model = gaussian_model(vec![0.0, 1.0], vec![1.0, 2.0]);
        assert!(matches!(
            local_round(1, None, &model, None),
            Err(Error::BadContribution(_))
        ));
        let beta = array![0.0, 0.0];
        assert!(matches!(
            local_round(1, Some(&beta), &model, None),
            Err(Error::BadContribution(_))
        ));
    }

    #[test]
    fn test_federated_solve_matches_pooled_wls() {
        // Two sites, Gaussian: the aggregated (A1+A2)^-1 (B1+B2) must equal
        // the centralized least-squares fit on the pooled rows.
        let x1 = vec![0.0, 1.0, 2.0, 3.0];
        let y1: Vec<f64> = x1.iter().map(|v| 1.0 + 2.0 * v + 0.1).collect();
        let x2 = vec![4.0, 5.0, 6.0, 7.0];
        let y2: Vec<f64> = x2.iter().map(|v| 1.0 + 2.0 * v - 0.1).collect();

        let site1 = gaussian_model(x1.clone(), y1.clone());
        let site2 = gaussian_model(x2.clone(), y2.clone());
        let pooled = gaussian_model(
            x1.iter().chain(x2.iter()).cloned().collect(),
            y1.iter().chain(y2.iter()).cloned().collect(),
        );

        let mut acc = IrlsAccumulator::default();
        for model in [&site1, &site2] {
            let (contribution, _) = local_round(0, None, model, None).unwrap();
            accumulate(&contribution.payload, &mut acc, 0).unwrap();
        }
        let (threshold, payload) = round_result(&mut acc, 1e-8).unwrap();
        assert!(threshold.is_none());

        let centralized = pooled.fit().unwrap();
        for (a, b) in payload.beta.iter().zip(centralized.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_convergence_against_target_accuracy() {
        // Feed the solve a system whose solution equals the previous beta.
        let mut acc = IrlsAccumulator::default();
        accumulate(
            &ContributionPayload::IrlsRound {
                initial_beta: Some(array![2.0]),
                site_hessian: array![[-4.0]],
                ols: crate::glm::model::NormalEquations {
                    a: array![[2.0]],
                    b: array![4.0],
                },
            },
            &mut acc,
            0,
        )
        .unwrap();
        let (_, payload) = round_result(&mut acc, 1e-4).unwrap();
        assert_abs_diff_eq!(payload.beta[0], 2.0, epsilon = 1e-12);
        assert_eq!(payload.signal, Some(Signal::Abort));
        assert_abs_diff_eq!(payload.fed_stderror[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_sums_cleared_but_beta_carried() {
        let mut acc = IrlsAccumulator::default();
        accumulate(
            &ContributionPayload::IrlsRound {
                initial_beta: Some(array![0.0]),
                site_hessian: array![[-1.0]],
                ols: crate::glm::model::NormalEquations {
                    a: array![[1.0]],
                    b: array![3.0],
                },
            },
            &mut acc,
            0,
        )
        .unwrap();
        round_result(&mut acc, 1e-8).unwrap();
        assert!(acc.a_sum.is_none());
        assert!(acc.b_sum.is_none());
        assert!(acc.combined_hessian.is_none());
        // The advanced coefficients stay for the next round's delta.
        assert_eq!(acc.beta_opt.as_ref().unwrap(), &array![3.0]);
    }

    #[test]
    fn test_singular_normal_equations_are_fatal() {
        let mut acc = IrlsAccumulator::default();
        accumulate(
            &ContributionPayload::IrlsRound {
                initial_beta: Some(array![0.0, 0.0]),
                site_hessian: array![[-1.0, 0.0], [0.0, -1.0]],
                ols: crate::glm::model::NormalEquations {
                    a: array![[1.0, 2.0], [2.0, 4.0]],
                    b: array![1.0, 2.0],
                },
            },
            &mut acc,
            0,
        )
        .unwrap();
        assert!(matches!(
            round_result(&mut acc, 1e-8),
            Err(Error::Numerical(_))
        ));
    }

    #[test]
    fn test_wrong_payload_rejected() {
        let mut acc = IrlsAccumulator::default();
        assert!(matches!(
            accumulate(
                &ContributionPayload::NrInit { beta: array![1.0] },
                &mut acc,
                0
            ),
            Err(Error::BadContribution(_))
        ));
    }
}
