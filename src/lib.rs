pub mod adherence; // Day summaries + month grid
pub mod alarms; // Reminder triggers
pub mod catalog; // Medication definitions
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod expansion; // Daily schedule expansion
pub mod identity;
pub mod ledger; // Intake ledger
pub mod models;
pub mod slots; // Slot time config
pub mod sync; // Sync reconciliation
pub mod tracker; // Service facade + worker

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EmptyDayPolicy, TrackerConfig};
pub use db::Database;
pub use error::AdherenceError;
pub use identity::{IdentityProvider, StaticIdentity};
pub use tracker::{CommandReply, MedicationTracker, TrackerCommand, TrackerWorker};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` wins over `PILLBOX_LOG`.
/// Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    tracing::info!("Pillbox starting v{}", config::APP_VERSION);
}
