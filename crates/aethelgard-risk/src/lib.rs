pub mod confluence;
pub mod governor;
pub mod limiter;
pub mod lockdown;
pub mod models;
pub mod safety_governor;
pub mod sizing;

pub use governor::RiskGovernor;
pub use models::{RejectionAudit, SizingResult};
