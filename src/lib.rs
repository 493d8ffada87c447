//! # fedglm - Federated GLM coefficient fitting
//!
//! Fits generalized linear models across multiple data-holding sites that
//! never share raw records, exchanging only aggregate statistics through a
//! coordinator over synchronized rounds:
//! - **glm**: model specification, families, design matrix and likelihood
//!   calculus
//! - **optimizer**: the two fitting strategies, Newton-Raphson and IRLS
//! - **coordinator**: locked per-round aggregation and convergence
//! - **site**: per-participant round executor with cancellation and
//!   local-state persistence
//!
//! Transport, authentication and the outer round-driving loop are external
//! collaborators; this crate owns the computation and the round protocol
//! semantics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedglm::core::CancellationToken;
//! use fedglm::glm::{Column, Dataset, Family, GlmSpec};
//! use fedglm::optimizer::Method;
//! use fedglm::protocol::RoundMessage;
//! use fedglm::site::{SiteRoundExecutor, SiteTask};
//!
//! #[tokio::main]
//! async fn main() {
//!     let data = Dataset::from_columns(vec![
//!         ("y".into(), Column::Float(vec![1.0, 2.0, 3.0])),
//!         ("x".into(), Column::Float(vec![0.1, 0.9, 2.1])),
//!     ])
//!     .unwrap();
//!     let spec = GlmSpec::with_formula(Family::Gaussian, "y ~ x");
//!     let mut site =
//!         SiteRoundExecutor::new(&spec, &data, Method::NewtonRaphson, "/tmp/site-a", "site-a")
//!             .unwrap();
//!     let reply = site
//!         .execute(
//!             SiteTask::Train(RoundMessage::initial(10)),
//!             &CancellationToken::new(),
//!         )
//!         .await
//!         .unwrap();
//!     println!("contribution: {:?}", reply.contribution.method);
//! }
//! ```

pub mod coordinator;
pub mod core;
pub mod glm;
pub mod optimizer;
pub mod protocol;
pub mod site;

pub use crate::core::error::{Error, Result};
