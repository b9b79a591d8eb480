//! Recurring deny windows (maintenance and blackout periods)

use crate::engine::{Candidate, FilterRule, RejectionReason, RuleContext, RuleResult};
use crate::error::Result;
use crate::recurrence::Recurrence;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rudder_types::RecurrenceSpec;

/// Blocks every candidate while a recurrence window is open
#[derive(Debug, Clone)]
pub struct DenyWindowRule {
    recurrence: Recurrence,
}

impl DenyWindowRule {
    pub const NAME: &'static str = "deny-window";

    pub fn new(spec: RecurrenceSpec) -> Result<Self> {
        Ok(Self {
            recurrence: Recurrence::new(spec)?,
        })
    }

    pub fn passing(&self, now: DateTime<Utc>) -> bool {
        self.open_window(now).is_none()
    }

    /// End of the window containing `now`, in UTC
    ///
    /// With a duration the window is `[occurrence, occurrence + duration)`;
    /// without one it covers the rest of the occurrence's local day.
    pub fn open_window(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_now = self.recurrence.to_local(now);
        let duration = self.recurrence.duration();
        let lookback = duration.map_or(0, |d| d.num_days()) + 1;

        let occurrence = self.recurrence.previous_occurrence(local_now, lookback)?;
        let end = match duration {
            Some(duration) => occurrence + duration,
            None => next_midnight(occurrence)?,
        };

        (local_now < end).then(|| self.recurrence.to_utc(end))
    }
}

fn next_midnight(local: NaiveDateTime) -> Option<NaiveDateTime> {
    local.date().succ_opt()?.and_hms_opt(0, 0, 0)
}

impl<C: Candidate> FilterRule<C> for DenyWindowRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn filter(&self, context: &RuleContext<C::Id>, candidates: &[C]) -> RuleResult<C> {
        match self.open_window(context.now) {
            None => RuleResult::pass(candidates),
            Some(end) => {
                let remaining = end - context.now;
                let reason = RejectionReason::new(
                    Self::NAME,
                    format!(
                        "Deployment denied by deny window, ends in {}",
                        crate::cooldown::humanize(remaining.max(Duration::zero()))
                    ),
                )
                .with_retry_at(end);
                RuleResult::reject_all(candidates, reason)
            }
        }
    }
}
