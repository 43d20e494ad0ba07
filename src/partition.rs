//! Period partitioner: snapshot dates to analysis windows.
//!
//! Key invariants:
//! - Every window starts on a snapshot date.
//! - Windows are contiguous and non-overlapping; the last ends at the
//!   requested end.
//! - A location with no snapshots has no windows.

use chrono::NaiveDate;

use crate::error::MissingAnchorError;
use crate::ids::LocationId;
use crate::model::AnalysisWindow;
use crate::time::DateRange;

/// Derives the windows covering `requested` for one location.
///
/// Snapshot dates may be unsorted and contain duplicates. Snapshots after
/// `requested.end` are ignored. Snapshots before `requested.start` are
/// ignored too, except the latest of them, which anchors the first window
/// (so that window starts before the requested range).
///
/// # Errors
///
/// Returns `MissingAnchorError` if `requested.start` precedes the earliest
/// usable snapshot.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use stockroll::{partition_windows, DateRange, LocationId};
///
/// let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
/// let windows = partition_windows(
///     &LocationId::from("1"),
///     &[d(1), d(8)],
///     DateRange::new(d(1), d(20)).unwrap(),
/// )
/// .unwrap();
///
/// assert_eq!(windows.len(), 2);
/// assert_eq!(windows[0].end, d(7));
/// assert_eq!(windows[1].end, d(20));
/// ```
pub fn partition_windows(
    location: &LocationId,
    snapshot_dates: &[NaiveDate],
    requested: DateRange,
) -> Result<Vec<AnalysisWindow>, MissingAnchorError> {
    if snapshot_dates.is_empty() {
        return Ok(Vec::new());
    }

    let mut dates: Vec<NaiveDate> = snapshot_dates
        .iter()
        .copied()
        .filter(|d| *d <= requested.end)
        .collect();
    dates.sort_unstable();
    dates.dedup();

    let earliest = snapshot_dates.iter().copied().min();
    let missing = || MissingAnchorError {
        location: location.clone(),
        item: None,
        requested: requested.start,
        earliest,
    };

    // Latest snapshot on or before the requested start anchors the first window.
    let first = dates.partition_point(|d| *d <= requested.start);
    if first == 0 {
        return Err(missing());
    }
    let anchors = &dates[first - 1..];

    let mut windows = Vec::with_capacity(anchors.len());
    for (idx, start) in anchors.iter().enumerate() {
        let end = match anchors.get(idx + 1).and_then(|next| next.pred_opt()) {
            Some(day_before_next) => day_before_next,
            None => requested.end,
        };
        windows.push(AnalysisWindow {
            location: location.clone(),
            start: *start,
            end,
        });
    }
    Ok(windows)
}

/// Checks that `windows` tile `[first.start, expected_end]` exactly.
///
/// Used by the engine in debug builds and by tests.
#[must_use]
pub fn windows_are_contiguous(windows: &[AnalysisWindow], expected_end: NaiveDate) -> bool {
    let Some(last) = windows.last() else {
        return true;
    };
    if last.end != expected_end {
        return false;
    }
    windows.iter().all(|w| w.start <= w.end)
        && windows
            .windows(2)
            .all(|pair| pair[0].end.succ_opt() == Some(pair[1].start))
}
