//! Alert sinks provided by the service.

use tracing::{debug, warn};

use atmos_core::{Alert, AlertSink};

/// Logs alerts through `tracing`.
///
/// The first alert of an episode is logged at `warn`, the rest at `debug`,
/// so a long episode does not flood the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: &Alert) {
        if alert.onset {
            warn!(
                "Air quality alert ({}): {}",
                alert.sample.iaq_level(),
                alert
            );
        } else {
            debug!("Alert continues: {}", alert);
        }
    }
}
