//! Policy constants shared across the engine

use std::time::Duration;

/// Fixed delay applied to every transient tracker failure before the owning
/// workflow instance is re-entered. Transient classifications retry
/// indefinitely on this cadence; there is no attempt cap.
pub const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(10 * 60);

/// Grace window between soft-deleting an integration setting and purging it,
/// giving the fanned-out deletion workflows time to clear external entries.
pub const PURGE_GRACE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default cap on simultaneously running creation workflow instances.
pub const MAX_CONCURRENT_CREATE: usize = 200;

/// Default cap on simultaneously running deletion workflow instances.
pub const MAX_CONCURRENT_DELETE: usize = 200;

/// Default cap on simultaneously running integration purge instances.
pub const MAX_CONCURRENT_PURGE: usize = 20;

/// Error text recorded when a deletion is requested for a record that never
/// obtained an external item id.
pub const ERR_CANCELED_OR_DECLINED: &str = "Canceled or Declined Request";
