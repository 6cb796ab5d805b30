pub mod coherence;
pub mod expiration;
pub mod feedback;
pub mod position_manager;
pub mod tuner;

pub use coherence::CoherenceMonitor;
pub use expiration::{ExpirationManager, ExpirationStats};
pub use feedback::ClosureIngestor;
pub use position_manager::{PositionAction, PositionManager, PositionManagerConfig};
pub use tuner::{Tuner, TuningAdjustment, TuningDirection};
