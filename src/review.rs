use chrono::{Months, NaiveDate};

use crate::models::{DocumentStatus, ReviewFrequency, ReviewStatus};

/// Review-date classification thresholds, in days before the due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warning_days: i64,
    pub upcoming_days: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_days: 30,
            upcoming_days: 90,
        }
    }
}

/// Next review date after a review on `last`, using calendar months so an
/// annual document reviewed on 10 Jan is due again on 10 Jan. AdHoc has no
/// automatic schedule.
pub fn next_review_date(last: NaiveDate, frequency: ReviewFrequency) -> Option<NaiveDate> {
    let months = frequency.months()?;
    last.checked_add_months(Months::new(months))
}

/// Buckets a document by how close its next review is. Due today counts as
/// due soon, not overdue.
pub fn review_status(next: NaiveDate, as_of: NaiveDate, thresholds: &Thresholds) -> ReviewStatus {
    let days = (next - as_of).num_days();
    if days < 0 {
        ReviewStatus::Overdue
    } else if days <= thresholds.warning_days {
        ReviewStatus::DueSoon
    } else if days <= thresholds.upcoming_days {
        ReviewStatus::Upcoming
    } else {
        ReviewStatus::OnTrack
    }
}

/// Allowed status transitions when enforcement is switched on.
pub fn is_valid_transition(from: DocumentStatus, to: DocumentStatus) -> bool {
    use DocumentStatus::*;
    matches!(
        (from, to),
        (Draft, Active)
            | (Active, UnderReview)
            | (Active, Archived)
            | (UnderReview, Active)
            | (UnderReview, Superseded)
            | (Superseded, Archived)
    )
}
