//! Two-phase seek planning for segment requests.
//!
//! Seeking straight to a late timestamp with an input-side `-ss` is fast but
//! only keyframe accurate; an output-side `-ss` is frame accurate but decodes
//! everything before it. The plan combines both: a coarse input seek to
//! `start - THRESHOLD` followed by a short fine seek of `THRESHOLD`.

use std::time::Duration;

/// Maximum length of the fine (decode-and-discard) seek.
pub const THRESHOLD: Duration = Duration::from_secs(5);

/// A time range requested by the client, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentRequest {
    pub start: f64,
    pub duration: f64,
}

/// Seek and duration arguments for one transcode.
///
/// All values are whole milliseconds, so `pre_seek + fine_seek` renders as
/// exactly the requested start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekPlan {
    /// Input-side seek, placed before `-i`.
    pub pre_seek: Option<Duration>,
    /// Output-side seek, placed after `-i`.
    pub fine_seek: Option<Duration>,
    /// Output duration limit.
    pub duration: Option<Duration>,
}

impl SeekPlan {
    /// Total offset into the source.
    pub fn start(&self) -> Duration {
        self.pre_seek.unwrap_or_default() + self.fine_seek.unwrap_or_default()
    }
}

/// Build the plan for an optional segment.
///
/// # Errors
///
/// [`mb_core::Error::InvalidSegment`] when the duration is not positive, the
/// start is negative, or either value is not finite. Durations that round to
/// zero milliseconds count as not positive.
pub fn plan(segment: Option<SegmentRequest>) -> mb_core::Result<SeekPlan> {
    let Some(segment) = segment else {
        return Ok(SeekPlan::default());
    };

    if !segment.duration.is_finite() || segment.duration <= 0.0 {
        return Err(mb_core::Error::InvalidSegment(format!(
            "duration must be positive, got {}",
            segment.duration
        )));
    }
    if !segment.start.is_finite() || segment.start < 0.0 {
        return Err(mb_core::Error::InvalidSegment(format!(
            "start must be non-negative, got {}",
            segment.start
        )));
    }

    let start = millis(segment.start)?;
    let duration = millis(segment.duration)?;
    if duration.is_zero() {
        return Err(mb_core::Error::InvalidSegment(format!(
            "duration {} is shorter than a millisecond",
            segment.duration
        )));
    }

    let plan = if start <= THRESHOLD {
        SeekPlan {
            pre_seek: None,
            fine_seek: Some(start),
            duration: Some(duration),
        }
    } else {
        SeekPlan {
            pre_seek: Some(start - THRESHOLD),
            fine_seek: Some(THRESHOLD),
            duration: Some(duration),
        }
    };

    Ok(plan)
}

/// Seconds to a duration rounded to the nearest millisecond.
fn millis(value: f64) -> mb_core::Result<Duration> {
    let d = Duration::try_from_secs_f64(value)
        .map_err(|e| mb_core::Error::InvalidSegment(format!("{value}: {e}")))?;
    let ms = u64::try_from(round_millis(d))
        .map_err(|_| mb_core::Error::InvalidSegment(format!("{value} is out of range")))?;
    Ok(Duration::from_millis(ms))
}

fn round_millis(d: Duration) -> u128 {
    (d.as_nanos() + 500_000) / 1_000_000
}

/// Render a duration as seconds, rounded to the millisecond (`7.000`).
pub fn format_seconds(d: Duration) -> String {
    let ms = round_millis(d);
    format!("{}.{:03}", ms / 1000, ms % 1000)
}
