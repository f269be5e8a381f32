use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{ApiClient, BandwidthReport};
use crate::state::RunState;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Pushes accrued usage to the service and credits points locally only on a
/// confirmed acceptance, so local and server totals never drift apart on
/// failure.
pub struct UsageReporter {
    api: ApiClient,
    state: Arc<RunState>,
    points_per_report: f64,
}

impl UsageReporter {
    pub fn new(api: ApiClient, state: Arc<RunState>, points_per_hour: f64) -> Self {
        // The extension advertises a points-per-hour rate but credits a
        // constant slice per report event, so in practice accrual follows the
        // report cadence. Kept as-is.
        Self {
            api,
            state,
            points_per_report: points_per_hour / SECONDS_PER_HOUR,
        }
    }

    /// Submit one usage report. Never propagates an error past this boundary;
    /// failures are logged and the point credit is withheld.
    pub async fn report(&self) {
        let report = BandwidthReport {
            added_point: self.points_per_report,
            total_bytes: self.state.total_bytes(),
        };

        match self.api.submit(&report).await {
            Ok(()) => {
                let total = self.state.credit_points(self.points_per_report);
                info!(
                    total_points = total,
                    total_bytes = report.total_bytes,
                    "bandwidth reported"
                );
            }
            Err(err) => {
                warn!(error = %err, "bandwidth report failed");
            }
        }
    }
}
