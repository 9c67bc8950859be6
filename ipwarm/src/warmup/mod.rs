//! IP warmup: volume schedule, thresholds, recipient tiers and the tick scheduler.

pub mod lifecycle;
pub mod recipients;
pub mod schedule;
pub mod scheduler;
pub mod thresholds;

pub use lifecycle::IpLifecycle;
pub use recipients::{RecipientThresholds, WarmupRecipient, select_warmup_recipients};
pub use schedule::{WarmupStage, stage_for_day, volume_for_day};
pub use scheduler::{TickReport, WarmupConfig, WarmupScheduler};
pub use thresholds::{Breach, Thresholds};
