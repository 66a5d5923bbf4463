pub mod prune;
pub mod scan;
pub mod usage;

pub use prune::{emergency_prune, prune_by_age, PruneOutcome};
pub use scan::scan;
pub use usage::{usage, UsageStats};
