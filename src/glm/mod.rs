//! Generalized linear model specification, data access and calculus.

pub mod dataset;
pub mod family;
pub mod linalg;
pub mod model;
pub mod spec;

pub use dataset::{Column, Dataset};
pub use family::Family;
pub use model::{GlmModel, IrlsWorking, NormalEquations};
pub use spec::GlmSpec;
