//! Availability computation

use calmesh_types::{Availability, Interval, Result};

use crate::actor::UserGraph;
use crate::dto::AvailabilityQuery;

/// Merge overlapping and adjacent intervals into a sorted disjoint set,
/// clamped to `[window_start, window_end)`.
pub(crate) fn merge_busy(mut intervals: Vec<Interval>, window_start: i64, window_end: i64) -> Vec<Interval> {
    intervals.retain(|i| i.start < window_end && i.end > window_start);
    for interval in &mut intervals {
        interval.start = interval.start.max(window_start);
        interval.end = interval.end.min(window_end);
    }
    intervals.sort_by_key(|i| (i.start, i.end));

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            // Adjacent intervals (end == next.start) merge too
            Some(last) if interval.start <= last.end => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Complement of a disjoint sorted busy set over the window
pub(crate) fn complement(busy: &[Interval], window_start: i64, window_end: i64) -> Vec<Interval> {
    let mut free = Vec::with_capacity(busy.len() + 1);
    let mut cursor = window_start;
    for interval in busy {
        if interval.start > cursor {
            free.push(Interval::new(cursor, interval.start));
        }
        cursor = cursor.max(interval.end);
    }
    if cursor < window_end {
        free.push(Interval::new(cursor, window_end));
    }
    free
}

impl UserGraph {
    /// Busy = opaque, non-cancelled canonical events on the listed accounts.
    /// Output intervals are sorted, non-overlapping, adjacency-merged, and
    /// `busy ∪ free` exactly covers `[start, end)`.
    pub(crate) async fn compute_availability(
        &self,
        query: AvailabilityQuery,
    ) -> Result<Availability> {
        if query.end <= query.start {
            return Err(calmesh_types::CalError::validation(
                "availability window must satisfy start < end",
            ));
        }
        let accounts = match query.accounts {
            Some(accounts) if !accounts.is_empty() => accounts,
            _ => self.known_origin_accounts().await?,
        };
        let raw = self
            .ctx
            .store
            .events()
            .busy_intervals(self.ctx.user_id, &accounts, query.start, query.end)
            .await?;
        let busy_intervals = merge_busy(raw, query.start, query.end);
        let free_intervals = complement(&busy_intervals, query.start, query.end);
        Ok(Availability {
            busy_intervals,
            free_intervals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overlapping_and_adjacent() {
        let merged = merge_busy(
            vec![
                Interval::new(10, 20),
                Interval::new(15, 25),
                Interval::new(25, 30),
                Interval::new(40, 50),
            ],
            0,
            100,
        );
        assert_eq!(merged, vec![Interval::new(10, 30), Interval::new(40, 50)]);
    }

    #[test]
    fn test_complement_covers_window() {
        let busy = vec![Interval::new(10, 30), Interval::new(40, 50)];
        let free = complement(&busy, 0, 100);
        assert_eq!(
            free,
            vec![
                Interval::new(0, 10),
                Interval::new(30, 40),
                Interval::new(50, 100)
            ]
        );

        // busy ∪ free covers the window exactly
        let mut all: Vec<Interval> = busy.iter().chain(free.iter()).copied().collect();
        all.sort_by_key(|i| i.start);
        let mut cursor = 0;
        for interval in all {
            assert_eq!(interval.start, cursor);
            cursor = interval.end;
        }
        assert_eq!(cursor, 100);
    }

    #[test]
    fn test_clamping_to_window() {
        let merged = merge_busy(vec![Interval::new(-10, 5), Interval::new(95, 200)], 0, 100);
        assert_eq!(merged, vec![Interval::new(0, 5), Interval::new(95, 100)]);
    }

    #[test]
    fn test_fully_busy_window_has_no_free() {
        let merged = merge_busy(vec![Interval::new(0, 100)], 0, 100);
        assert!(complement(&merged, 0, 100).is_empty());
    }
}
