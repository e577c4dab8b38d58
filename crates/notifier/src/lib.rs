pub mod delivery;
mod dispatcher;
pub mod notifier;
pub mod stats;

pub use delivery::DeliveryError;
pub use notifier::{DelayPolicy, Notifier, NotifierConfig, NotifierError, NotifierTaskHandle};
pub use stats::DeliveryStatsSnapshot;
