// Site visit statistics types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The singleton visit counters.
///
/// `total_visits` is monotonic non-decreasing; `today_visits` is reset to
/// zero once per server-local calendar day by the hub loop's periodic check,
/// independent of request traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteStats {
    pub total_visits: i64,
    pub today_visits: i64,
    pub last_reset_date: NaiveDate,
}

impl SiteStats {
    /// Whether the daily counter is due for a reset on `today`.
    pub fn needs_reset(&self, today: NaiveDate) -> bool {
        self.last_reset_date != today
    }
}
