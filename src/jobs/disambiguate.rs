//! Picking the job this run triggered out of a candidate list.
//!
//! Neither backend returns a correlation id from its trigger call, and jobs can
//! be enqueued for unrelated reasons (manual re-runs, retries, a colleague
//! pushing at the same moment). Any job created before the trigger request
//! cannot be ours; of the rest, the most recently created one is.

use chrono::{DateTime, Utc};

use super::JobRecord;

/// Selects the job started by a trigger issued at `requested_at`.
///
/// Returns `None` while no candidate was created at or after `requested_at`,
/// which the start-detection poll treats as "not started yet".
pub fn select_run(candidates: &[JobRecord], requested_at: DateTime<Utc>) -> Option<&JobRecord> {
    candidates
        .iter()
        .filter(|job| job.created_at >= requested_at)
        .max_by_key(|job| job.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobOutcome;
    use crate::types::JobId;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn job(id: u64, created_at: DateTime<Utc>) -> JobRecord {
        JobRecord {
            id: JobId::from(id),
            created_at,
            status: "queued".to_string(),
            terminal: false,
            outcome: JobOutcome::Unknown,
            web_url: None,
        }
    }

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2029, 12, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn ignores_jobs_created_before_the_request() {
        let t = instant();
        let candidates = vec![job(1, t - Duration::seconds(10)), job(2, t + Duration::seconds(1))];
        assert_eq!(select_run(&candidates, t).map(|j| j.id.clone()), Some(JobId::from(2)));
    }

    #[test]
    fn only_stale_jobs_means_no_match_yet() {
        let t = instant();
        let candidates = vec![job(1, t - Duration::seconds(10))];
        assert_eq!(select_run(&candidates, t), None);
    }

    #[test]
    fn job_created_at_the_request_instant_is_eligible() {
        let t = instant();
        let candidates = vec![job(7, t)];
        assert_eq!(select_run(&candidates, t).map(|j| j.id.clone()), Some(JobId::from(7)));
    }

    #[test]
    fn most_recent_wins_regardless_of_list_order() {
        let t = instant();
        let candidates = vec![
            job(3, t + Duration::seconds(5)),
            job(4, t + Duration::seconds(30)),
            job(5, t + Duration::seconds(2)),
        ];
        assert_eq!(select_run(&candidates, t).map(|j| j.id.clone()), Some(JobId::from(4)));
    }

    #[test]
    fn empty_list_has_no_match() {
        assert_eq!(select_run(&[], instant()), None);
    }

    proptest! {
        #[test]
        fn selection_is_newest_eligible(offsets in prop::collection::vec(-600i64..600, 0..12)) {
            let t = instant();
            let candidates: Vec<_> = offsets
                .iter()
                .enumerate()
                .map(|(i, off)| job(i as u64, t + Duration::seconds(*off)))
                .collect();

            let newest_eligible = offsets.iter().copied().filter(|off| *off >= 0).max();
            match select_run(&candidates, t) {
                Some(selected) => {
                    prop_assert!(selected.created_at >= t);
                    prop_assert_eq!(
                        Some(selected.created_at),
                        newest_eligible.map(|off| t + Duration::seconds(off))
                    );
                }
                None => prop_assert!(newest_eligible.is_none()),
            }
        }
    }
}
