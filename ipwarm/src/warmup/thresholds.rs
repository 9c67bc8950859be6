//! Auto-pause thresholds for warming IPs.

use serde::{Deserialize, Serialize};

/// Limits applied to a warming IP's daily counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Fraction of sent, e.g. `0.03` for 3%.
    pub max_bounce_rate: f64,
    /// Fraction of sent, e.g. `0.001` for 0.1%.
    pub max_complaint_rate: f64,
    /// Days with `sent <= min_sent` are not evaluated.
    pub min_sent: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_bounce_rate: 0.03,
            max_complaint_rate: 0.001,
            min_sent: 10,
        }
    }
}

/// Why a day's counters breached the thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub bounce_rate: f64,
    pub complaint_rate: f64,
    pub bounce_exceeded: bool,
    pub complaint_exceeded: bool,
}

impl Breach {
    /// Operator-facing note stored on the failed warmup log row.
    pub fn reason(&self, thresholds: &Thresholds) -> String {
        let mut parts = Vec::with_capacity(2);
        if self.bounce_exceeded {
            parts.push(format!(
                "bounce rate {:.2}% exceeds {:.2}%",
                self.bounce_rate * 100.0,
                thresholds.max_bounce_rate * 100.0
            ));
        }
        if self.complaint_exceeded {
            parts.push(format!(
                "complaint rate {:.3}% exceeds {:.3}%",
                self.complaint_rate * 100.0,
                thresholds.max_complaint_rate * 100.0
            ));
        }
        format!("Auto-paused: {}", parts.join("; "))
    }
}

/// Evaluate one day's counters. Both comparisons are strict, so a rate exactly
/// at its limit does not breach.
pub fn evaluate(
    thresholds: &Thresholds,
    sent: i64,
    bounced: i64,
    complained: i64,
) -> Option<Breach> {
    if sent <= thresholds.min_sent {
        return None;
    }

    let bounce_rate = bounced as f64 / sent as f64;
    let complaint_rate = complained as f64 / sent as f64;
    let bounce_exceeded = bounce_rate > thresholds.max_bounce_rate;
    let complaint_exceeded = complaint_rate > thresholds.max_complaint_rate;

    (bounce_exceeded || complaint_exceeded).then_some(Breach {
        bounce_rate,
        complaint_rate,
        bounce_exceeded,
        complaint_exceeded,
    })
}
