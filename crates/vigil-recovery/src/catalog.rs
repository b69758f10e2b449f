//! Strategy catalog keyed by failure mode.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use vigil_core::config::RecoverySettings;
use vigil_core::{ErrorKind, PolicyConfig};

use crate::strategy::{
    CrashRecovery, FailureMode, JsErrorRecovery, MemoryPressureRecovery, NetworkRecovery,
    RateLimitRecovery, RecoveryAction, RecoveryContext, RecoveryOutcome, RecoveryStrategy,
    TimeoutRecovery,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    pub strategies_available: usize,
    pub strategies: Vec<FailureMode>,
}

/// One strategy per [`FailureMode`].
pub struct RecoveryCatalog {
    pub(crate) settings: RecoverySettings,
    strategies: BTreeMap<FailureMode, Arc<dyn RecoveryStrategy>>,
}

impl RecoveryCatalog {
    /// The six built-in strategies, tuned by `settings`.
    pub fn new(settings: RecoverySettings) -> Self {
        let builtin: [Arc<dyn RecoveryStrategy>; 6] = [
            Arc::new(TimeoutRecovery::new(&settings)),
            Arc::new(NetworkRecovery::new(&settings)),
            Arc::new(CrashRecovery),
            Arc::new(RateLimitRecovery::new(&settings)),
            Arc::new(JsErrorRecovery),
            Arc::new(MemoryPressureRecovery),
        ];
        let strategies = builtin.into_iter().map(|s| (s.mode(), s)).collect();
        Self {
            settings,
            strategies,
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(config.snapshot().recovery)
    }

    /// Replace the strategy for its mode.
    pub fn with_strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.strategies.insert(strategy.mode(), strategy);
        self
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    pub fn strategy(&self, mode: FailureMode) -> Option<&Arc<dyn RecoveryStrategy>> {
        self.strategies.get(&mode)
    }

    pub async fn recover(&self, mode: FailureMode, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        let Some(strategy) = self.strategies.get(&mode) else {
            return RecoveryOutcome::failed(RecoveryAction::None, format!("no {mode} strategy"));
        };
        let outcome = strategy.recover(ctx).await;
        debug!(%mode, recovered = outcome.recovered, action = ?outcome.action, "recovery attempted");
        outcome
    }

    /// Recover from a classified error; `None` when the kind has no mode.
    pub async fn recover_error_kind(
        &self,
        kind: ErrorKind,
        ctx: &RecoveryContext<'_>,
    ) -> Option<RecoveryOutcome> {
        let mode = FailureMode::from_error_kind(kind)?;
        Some(self.recover(mode, ctx).await)
    }

    pub fn status(&self) -> CatalogStatus {
        CatalogStatus {
            strategies_available: self.strategies.len(),
            strategies: self.strategies.keys().copied().collect(),
        }
    }
}
