//! Local GLM model: design matrix plus likelihood calculus.
//!
//! Built once per site from the spec and the local dataset. Exposes the
//! score/Hessian evaluations used by Newton-Raphson and the per-site IRLS
//! re-linearization used by the federated weighted-least-squares solve.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{Error, Result};
use crate::glm::dataset::{Column, Dataset};
use crate::glm::family::Family;
use crate::glm::linalg;
use crate::glm::spec::GlmSpec;

/// Small constant keeping a zero offset column out of `ln`.
const OFFSET_EPS: f64 = 1e-10;

/// Iteration cap for the local maximum-likelihood fit.
const LOCAL_FIT_MAX_ITER: usize = 25;

/// Convergence tolerance for the local maximum-likelihood fit.
const LOCAL_FIT_TOL: f64 = 1e-8;

/// Partial weighted normal-equation matrices for one site:
/// `a` = XᵂᵗXᵂ and `b` = Xᵂᵗzᵂ for the locally re-weighted design.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalEquations {
    pub a: Array2<f64>,
    pub b: Array1<f64>,
}

/// Cross-round IRLS working state for one site.
///
/// Returned from round t and passed back in at round t+1; the coordinator's
/// β for the next round goes into `params` before the next step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IrlsWorking {
    /// Coefficients received from the coordinator; `None` on the first
    /// re-linearization, which runs from the family's starting mean.
    pub params: Option<Array1<f64>>,
    /// Linear predictor at the last re-linearization point.
    pub lin_pred: Array1<f64>,
    /// Fitted mean at the last re-linearization point.
    pub mu: Array1<f64>,
}

/// A GLM bound to one site's data.
#[derive(Clone, Debug)]
pub struct GlmModel {
    family: Family,
    endog: Array1<f64>,
    exog: Array2<f64>,
    offset: Array1<f64>,
    exog_names: Vec<String>,
}

impl GlmModel {
    /// Materialize the design matrix for a spec against a dataset.
    ///
    /// The spec is validated first, so every configuration error surfaces
    /// here, before any round executes.
    pub fn new(spec: &GlmSpec, data: &Dataset) -> Result<Self> {
        spec.validate(data)?;
        let mut data = data.clone();
        data.cast_to_string(&spec.cast_to_string)?;

        let (target, features) = spec.terms()?;
        let endog = Array1::from_vec(data.float_column(&target)?.to_vec());
        let rows = data.num_rows();
        if rows == 0 {
            return Err(Error::Configuration("dataset has no rows".into()));
        }

        let mut columns: Vec<(String, Vec<f64>)> = Vec::new();
        if spec.add_intercept {
            columns.push(("Intercept".to_string(), vec![1.0; rows]));
        }
        for feature in &features {
            match data.column(feature)? {
                Column::Float(values) => columns.push((feature.clone(), values.clone())),
                Column::Text(values) => {
                    columns.extend(encode_categorical(feature, values));
                }
            }
        }
        if columns.is_empty() {
            return Err(Error::Configuration(
                "design matrix has no columns; add features or an intercept".into(),
            ));
        }

        let exog_names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
        let mut exog = Array2::zeros((rows, columns.len()));
        for (j, (_, values)) in columns.iter().enumerate() {
            for (i, v) in values.iter().enumerate() {
                exog[[i, j]] = *v;
            }
        }

        let offset = match &spec.offset_column {
            Some(name) => Array1::from_iter(
                data.float_column(name)?
                    .iter()
                    .map(|v| (v + OFFSET_EPS).ln()),
            ),
            None => Array1::zeros(rows),
        };

        Ok(Self {
            family: spec.family,
            endog,
            exog,
            offset,
            exog_names,
        })
    }

    /// The distribution family.
    pub fn family(&self) -> Family {
        self.family
    }

    /// Canonical ordered coefficient names.
    pub fn exog_names(&self) -> &[String] {
        &self.exog_names
    }

    /// Number of coefficients.
    pub fn num_params(&self) -> usize {
        self.exog.ncols()
    }

    /// Number of local observations.
    pub fn num_obs(&self) -> usize {
        self.exog.nrows()
    }

    /// Linear predictor eta = X beta + offset.
    pub fn linear_predictor(&self, beta: &Array1<f64>) -> Result<Array1<f64>> {
        if beta.len() != self.num_params() {
            return Err(Error::Numerical(format!(
                "coefficient vector has {} entries, design has {} columns",
                beta.len(),
                self.num_params()
            )));
        }
        Ok(self.exog.dot(beta) + &self.offset)
    }

    /// Fitted mean mu = g^-1(eta).
    pub fn fitted(&self, beta: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(self
            .linear_predictor(beta)?
            .mapv(|eta| self.family.inverse_link(eta)))
    }

    /// Score vector dlogL/dbeta = X'(y - mu), unit scale.
    pub fn score(&self, beta: &Array1<f64>) -> Result<Array1<f64>> {
        let mu = self.fitted(beta)?;
        let resid = &self.endog - &mu;
        Ok(self.exog.t().dot(&resid))
    }

    /// Hessian d2logL/dbeta2 = -X' diag(dmu/deta) X, unit scale.
    ///
    /// Negative semi-definite near the optimum; its negation is the Fisher
    /// information.
    pub fn hessian(&self, beta: &Array1<f64>) -> Result<Array2<f64>> {
        let mu = self.fitted(beta)?;
        let weights = mu.mapv(|m| self.family.irls_weight(m));
        let weighted = &self.exog * &weights.view().insert_axis(Axis(1));
        Ok(-self.exog.t().dot(&weighted))
    }

    /// Log-likelihood at the given coefficients, unit scale.
    pub fn log_likelihood(&self, beta: &Array1<f64>) -> Result<f64> {
        let mu = self.fitted(beta)?;
        Ok(self
            .endog
            .iter()
            .zip(mu.iter())
            .map(|(&y, &m)| self.family.log_likelihood_obs(y, m))
            .sum())
    }

    /// Unconstrained local maximum-likelihood fit via IRLS on this site's
    /// data alone. Used to seed the federated Newton-Raphson run.
    pub fn fit(&self) -> Result<Array1<f64>> {
        let mut working = self.irls_init()?;
        let mut beta = Array1::zeros(self.num_params());
        for _ in 0..LOCAL_FIT_MAX_ITER {
            let (normal, next_working) = self.irls_step(&working)?;
            let next_beta = linalg::solve(&normal.a, &normal.b)?;
            let delta = (&next_beta - &beta).mapv(f64::abs);
            let converged = delta.iter().all(|d| *d < LOCAL_FIT_TOL);
            working = next_working;
            working.params = Some(next_beta.clone());
            beta = next_beta;
            if converged {
                break;
            }
        }
        Ok(beta)
    }

    /// Initialize IRLS from the family's starting mean.
    pub fn irls_init(&self) -> Result<IrlsWorking> {
        let endog = self.endog.to_vec();
        let mu_vec = self.family.starting_mu(&endog);
        let deviance = self.family.deviance(&endog, &mu_vec);
        let mu = Array1::from_vec(mu_vec);
        let lin_pred = mu.mapv(|m| self.family.link(m));
        if deviance.is_nan() {
            return Err(Error::Numerical(
                "the first guess on the deviance function returned a NaN; \
                 this could be a boundary problem"
                    .into(),
            ));
        }
        Ok(IrlsWorking {
            params: None,
            lin_pred,
            mu,
        })
    }

    /// One IRLS re-linearization: refresh weights and the working response,
    /// and emit the partial normal-equation matrices for the federated WLS
    /// solve. Runs locally; only `NormalEquations` leaves the site.
    pub fn irls_step(&self, working: &IrlsWorking) -> Result<(NormalEquations, IrlsWorking)> {
        let (lin_pred, mu) = match &working.params {
            None => (working.lin_pred.clone(), working.mu.clone()),
            Some(params) => {
                let lin_pred = self.linear_predictor(params)?;
                let mu = lin_pred.mapv(|eta| self.family.inverse_link(eta));
                let max_resid = (&mu - &self.endog)
                    .iter()
                    .fold(0.0f64, |acc, v| acc.max(v.abs()));
                if max_resid < 1e-8 {
                    warn!(
                        "perfect separation or prediction detected, \
                         parameter may not be identified"
                    );
                }
                (lin_pred, mu)
            }
        };

        let weights = mu.mapv(|m| self.family.irls_weight(m));
        let working_response = &lin_pred
            + &(mu.mapv(|m| self.family.link_deriv(m)) * (&self.endog - &mu))
            - &self.offset;

        let w_half = weights.mapv(f64::sqrt);
        let wexog = &self.exog * &w_half.view().insert_axis(Axis(1));
        let wendog = &w_half * &working_response;

        let normal = NormalEquations {
            a: wexog.t().dot(&wexog),
            b: wexog.t().dot(&wendog),
        };
        let next = IrlsWorking {
            params: working.params.clone(),
            lin_pred,
            mu,
        };
        Ok((normal, next))
    }
}

/// Drop-first one-hot encoding for a categorical column, with deterministic
/// level ordering.
fn encode_categorical(name: &str, values: &[String]) -> Vec<(String, Vec<f64>)> {
    let mut levels: Vec<&String> = values.iter().collect();
    levels.sort();
    levels.dedup();
    levels
        .into_iter()
        .skip(1)
        .map(|level| {
            let indicator = values
                .iter()
                .map(|v| if v == level { 1.0 } else { 0.0 })
                .collect();
            (format!("{name}[T.{level}]"), indicator)
        })
        .collect()
}
