//! Site-side round execution and local state persistence.

pub mod executor;
pub mod state;

pub use executor::{SiteRoundExecutor, SiteTask};
pub use state::{LocalStateStore, PersistedState};
