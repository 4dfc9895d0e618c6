//! Outcome log for best-effort steps.
//!
//! A failed profile sync or email never fails its workflow, but every
//! attempt lands in `side_effect_log`, in the trace, and (with the `metrics`
//! feature) in an OpenTelemetry counter so failure rates can be alerted on.

use tracing::{info, warn};

use crate::storage::AppDatabase;

pub const PROFILE_SYNC: &str = "profile_sync";
pub const CREDENTIAL_EMAIL: &str = "credential_email";
pub const BACKUP_EMAIL: &str = "backup_email";

/// Every kind recorded, for reporting.
pub const ALL_KINDS: [&str; 3] = [PROFILE_SYNC, CREDENTIAL_EMAIL, BACKUP_EMAIL];

#[derive(Clone)]
pub struct SideEffectRecorder {
    db: AppDatabase,
}

impl SideEffectRecorder {
    pub const fn new(db: AppDatabase) -> Self {
        Self { db }
    }

    /// Record the outcome of `kind`. `Err` carries the failure detail.
    pub async fn record(
        &self,
        kind: &'static str,
        user_id: &str,
        sponsorship_id: Option<&str>,
        outcome: Result<Option<&str>, &str>,
    ) {
        let (succeeded, detail) = match outcome {
            Ok(detail) => {
                info!(kind, user_id, sponsorship_id, detail, "Side effect succeeded");
                (true, detail)
            }
            Err(detail) => {
                warn!(kind, user_id, sponsorship_id, detail, "Side effect failed");
                (false, Some(detail))
            }
        };

        #[cfg(feature = "metrics")]
        hivelink_core::metrics::record_side_effect(kind, succeeded);

        if let Err(e) = self
            .db
            .record_side_effect(kind, Some(user_id), sponsorship_id, succeeded, detail)
            .await
        {
            warn!(kind, user_id, error = %e, "Failed to write side-effect log");
        }
    }
}
