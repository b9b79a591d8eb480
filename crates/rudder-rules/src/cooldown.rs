//! Minimum elapsed time between successful deployments

use crate::engine::{Candidate, FilterRule, RejectionReason, RuleContext, RuleResult};
use chrono::{DateTime, Duration, Utc};

/// Blocks every candidate until the cooldown after the last success expires
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownRule {
    minutes: u32,
    last_success: Option<DateTime<Utc>>,
}

impl CooldownRule {
    pub const NAME: &'static str = "version-cooldown";

    pub fn new(minutes: u32, last_success: Option<DateTime<Utc>>) -> Self {
        Self {
            minutes,
            last_success,
        }
    }

    /// Instant the cooldown ends, if a success is on record
    pub fn cooldown_end(&self) -> Option<DateTime<Utc>> {
        self.last_success
            .map(|at| at + Duration::minutes(i64::from(self.minutes)))
    }

    pub fn passing(&self, now: DateTime<Utc>) -> bool {
        match self.cooldown_end() {
            Some(end) => now > end,
            None => true,
        }
    }
}

impl<C: Candidate> FilterRule<C> for CooldownRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn filter(&self, context: &RuleContext<C::Id>, candidates: &[C]) -> RuleResult<C> {
        match self.cooldown_end() {
            Some(end) if context.now <= end => {
                let reason = RejectionReason::new(
                    Self::NAME,
                    format!("please wait {}", humanize(end - context.now)),
                )
                .with_retry_at(end);
                RuleResult::reject_all(candidates, reason)
            }
            _ => RuleResult::pass(candidates),
        }
    }
}

/// "2 hours 15 minutes", rounding up to the next whole minute
pub fn humanize(remaining: Duration) -> String {
    let seconds = remaining.num_seconds().max(0);
    let minutes = (seconds + 59) / 60;
    let (hours, minutes) = (minutes / 60, minutes % 60);

    match (hours, minutes) {
        (0, m) => plural(m, "minute"),
        (h, 0) => plural(h, "hour"),
        (h, m) => format!("{} {}", plural(h, "hour"), plural(m, "minute")),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}
