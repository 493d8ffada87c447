//! Per-site round executor.
//!
//! Drives one participant through the federation: decode the round-start
//! message, compute the local contribution via the bound optimizer, persist
//! the working state, and emit the reply. Cancellation is polled between
//! every major step, never mid-computation.

use std::path::PathBuf;

use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{now, CancellationToken, Error, Result};
use crate::glm::dataset::Dataset;
use crate::glm::model::GlmModel;
use crate::glm::spec::GlmSpec;
use crate::optimizer::{Method, SiteState};
use crate::protocol::{DataKind, RoundMessage, SiteReply};
use crate::site::state::{LocalStateStore, PersistedState};

/// Task kinds a site executor handles.
#[derive(Clone, Debug)]
pub enum SiteTask {
    /// Run one optimization round.
    Train(RoundMessage),
    /// Republish the last persisted local state as a final artifact.
    SubmitModel,
}

/// Driver for one participant.
///
/// The dataset is loaded and the design matrix materialized once, at
/// construction; every configuration error surfaces here, before any round.
pub struct SiteRoundExecutor {
    site_id: String,
    run_id: Uuid,
    method: Method,
    model: GlmModel,
    store: LocalStateStore,
    state: Option<SiteState>,
}

impl SiteRoundExecutor {
    /// Build an executor for a site.
    pub fn new(
        spec: &GlmSpec,
        data: &Dataset,
        method: Method,
        state_dir: impl Into<PathBuf>,
        site_id: &str,
    ) -> Result<Self> {
        let model = GlmModel::new(spec, data)?;
        info!(
            site = site_id,
            method = method.key(),
            params = model.num_params(),
            rows = model.num_obs(),
            "initialized site executor"
        );
        Ok(Self {
            site_id: site_id.to_string(),
            run_id: Uuid::new_v4(),
            method,
            model,
            store: LocalStateStore::new(state_dir),
            state: None,
        })
    }

    /// Site identity used in coordinator history.
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Handle one task.
    pub async fn execute(
        &mut self,
        task: SiteTask,
        cancel: &CancellationToken,
    ) -> Result<SiteReply> {
        match task {
            SiteTask::Train(message) => self.train(message, cancel).await,
            SiteTask::SubmitModel => self.submit_model(cancel).await,
        }
    }

    async fn train(
        &mut self,
        message: RoundMessage,
        cancel: &CancellationToken,
    ) -> Result<SiteReply> {
        if message.data_kind != DataKind::Weights {
            return Err(Error::BadContribution(format!(
                "round payload must be of kind Weights, got {:?}",
                message.data_kind
            )));
        }
        info!(
            site = %self.site_id,
            round = message.current_round,
            total_rounds = message.total_rounds,
            "starting round"
        );

        // Checkpoint before the local computation.
        if cancel.is_cancelled() {
            return Err(Error::TaskAborted);
        }

        let (contribution, next_state) = self.method.local_round(
            message.current_round,
            message.beta.as_ref(),
            &self.model,
            self.state.clone(),
        )?;

        // Checkpoint before persistence.
        if cancel.is_cancelled() {
            return Err(Error::TaskAborted);
        }

        self.state = Some(next_state.clone());
        let snapshot = PersistedState {
            run_id: self.run_id,
            method: self.method,
            round: message.current_round,
            state: next_state,
            contribution: contribution.clone(),
            saved_at: now(),
        };
        // A failed save is reported but does not fail the round; the
        // contribution is still valid.
        if let Err(err) = self.store.save(&snapshot) {
            warn!(site = %self.site_id, %err, "failed to save local state");
        }

        // Checkpoint before emitting the contribution.
        if cancel.is_cancelled() {
            return Err(Error::TaskAborted);
        }

        Ok(SiteReply {
            data_kind: DataKind::Weights,
            contribution,
            num_local_steps: 1,
        })
    }

    async fn submit_model(&self, cancel: &CancellationToken) -> Result<SiteReply> {
        let snapshot = self.store.load()?;
        if cancel.is_cancelled() {
            return Err(Error::TaskAborted);
        }
        info!(
            site = %self.site_id,
            round = snapshot.round,
            "republishing persisted local model"
        );
        Ok(SiteReply {
            data_kind: DataKind::Weights,
            contribution: snapshot.contribution,
            num_local_steps: 0,
        })
    }
}
