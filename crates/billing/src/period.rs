//! Trial and grace-period rules
//!
//! Trial checks compare the start of today (UTC) with the trial end, grace
//! period checks compare the current instant. The two granularities differ on
//! purpose and must stay that way.

use time::{Date, OffsetDateTime};

use crate::resources::Subscription;

/// When the subscription stops granting access, if it has been cancelled.
///
/// A subscription that renews has no end, so this is `None` unless
/// `cancel_at_period_end` is set, in which case it is `current_period_end`.
pub fn subscription_ends_at(subscription: &Subscription) -> Option<OffsetDateTime> {
    if subscription.cancel_at_period_end {
        subscription.current_period_end
    } else {
        None
    }
}

/// Whether the start of `today` (UTC midnight) is strictly before the trial end
pub fn is_on_trial_at(trial_end: Option<OffsetDateTime>, today: Date) -> bool {
    trial_end.is_some_and(|end| today.midnight().assume_utc() < end)
}

/// Whether `now` is strictly before the subscription end
pub fn is_on_grace_period_at(ends_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    ends_at.is_some_and(|end| now < end)
}

pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}
