use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_OFFSET_SECONDS: f64 = 30.0;
pub const FIRST_RUN_WINDOW_SECONDS: f64 = 86_400.0;
pub const FREE_USER_WINDOW_SECONDS: f64 = 3_600.0;
pub const PRO_USER_WINDOW_SECONDS: f64 = 300.0;
pub const DYNAMIC_SECONDS_PER_TRACK: f64 = 240.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("cannot distribute timestamps over an empty batch")]
    EmptyBatch,
    #[error("index {index} is outside a batch of {batch_size}")]
    IndexOutOfRange { index: usize, batch_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    Linear,
    Logarithmic,
}

/// How a batch of scrobbles is spread over the recent past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    FirstRun,
    FreeUser,
    ProUser,
    Dynamic { first_run: bool },
}

impl TimestampPolicy {
    pub fn window_seconds(self, batch_size: usize) -> f64 {
        match self {
            TimestampPolicy::FirstRun => FIRST_RUN_WINDOW_SECONDS,
            TimestampPolicy::FreeUser => FREE_USER_WINDOW_SECONDS,
            TimestampPolicy::ProUser => PRO_USER_WINDOW_SECONDS,
            TimestampPolicy::Dynamic { first_run: true } => FIRST_RUN_WINDOW_SECONDS,
            TimestampPolicy::Dynamic { first_run: false } => {
                (batch_size as f64 * DYNAMIC_SECONDS_PER_TRACK)
                    .clamp(PRO_USER_WINDOW_SECONDS, FIRST_RUN_WINDOW_SECONDS)
            }
        }
    }

    pub fn curve(self) -> Curve {
        match self {
            TimestampPolicy::FirstRun | TimestampPolicy::FreeUser => Curve::Logarithmic,
            TimestampPolicy::ProUser | TimestampPolicy::Dynamic { .. } => Curve::Linear,
        }
    }
}

/// Configured choice between the fixed per-account windows and the batch-sized window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimestampMode {
    Fixed {
        #[serde(default)]
        pro_user: bool,
    },
    Dynamic,
}

impl Default for TimestampMode {
    fn default() -> Self {
        TimestampMode::Fixed { pro_user: false }
    }
}

impl TimestampMode {
    pub fn policy_for(self, is_first_run: bool) -> TimestampPolicy {
        match self {
            TimestampMode::Fixed { .. } if is_first_run => TimestampPolicy::FirstRun,
            TimestampMode::Fixed { pro_user: true } => TimestampPolicy::ProUser,
            TimestampMode::Fixed { pro_user: false } => TimestampPolicy::FreeUser,
            TimestampMode::Dynamic => TimestampPolicy::Dynamic {
                first_run: is_first_run,
            },
        }
    }
}

/// Seconds before `now` for the `index`-th submission (0 = submitted first, placed newest).
pub fn offset_seconds(
    index: usize,
    batch_size: usize,
    policy: TimestampPolicy,
) -> Result<f64, TimestampError> {
    if batch_size == 0 {
        return Err(TimestampError::EmptyBatch);
    }
    if index >= batch_size {
        return Err(TimestampError::IndexOutOfRange { index, batch_size });
    }
    if batch_size == 1 {
        return Ok(MIN_OFFSET_SECONDS);
    }
    let window = policy.window_seconds(batch_size);
    let offset = match policy.curve() {
        Curve::Linear => MIN_OFFSET_SECONDS + (window / batch_size as f64) * index as f64,
        Curve::Logarithmic => {
            let ratio = index as f64 / (batch_size - 1) as f64;
            let scale = (1.0 + ratio * (std::f64::consts::E - 1.0)).ln();
            MIN_OFFSET_SECONDS + (window - MIN_OFFSET_SECONDS) * scale
        }
    };
    Ok(offset)
}

pub fn compute_timestamp(
    index: usize,
    batch_size: usize,
    policy: TimestampPolicy,
    now: i64,
) -> Result<i64, TimestampError> {
    let offset = offset_seconds(index, batch_size, policy)?;
    Ok((now as f64 - offset) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    const ALL_POLICIES: [TimestampPolicy; 5] = [
        TimestampPolicy::FirstRun,
        TimestampPolicy::FreeUser,
        TimestampPolicy::ProUser,
        TimestampPolicy::Dynamic { first_run: true },
        TimestampPolicy::Dynamic { first_run: false },
    ];

    #[test]
    fn singleton_batch_is_thirty_seconds_ago() {
        for policy in ALL_POLICIES {
            assert_eq!(compute_timestamp(0, 1, policy, NOW), Ok(NOW - 30));
        }
    }

    #[test]
    fn linear_spacing_over_five_minutes() {
        let stamps: Vec<i64> = (0..5)
            .map(|i| compute_timestamp(i, 5, TimestampPolicy::ProUser, NOW).unwrap())
            .collect();
        assert_eq!(
            stamps,
            vec![NOW - 30, NOW - 90, NOW - 150, NOW - 210, NOW - 270]
        );
    }

    #[test]
    fn logarithmic_offsets_never_decrease() {
        for policy in [TimestampPolicy::FirstRun, TimestampPolicy::FreeUser] {
            for batch_size in [2, 3, 10, 57] {
                let mut previous = 0.0;
                for index in 0..batch_size {
                    let offset = offset_seconds(index, batch_size, policy).unwrap();
                    assert!(offset >= previous, "{policy:?} {batch_size} {index}");
                    previous = offset;
                }
            }
        }
    }

    #[test]
    fn logarithmic_spans_the_whole_window() {
        let first = offset_seconds(0, 10, TimestampPolicy::FreeUser).unwrap();
        let last = offset_seconds(9, 10, TimestampPolicy::FreeUser).unwrap();
        assert_eq!(first, 30.0);
        assert!((last - 3_600.0).abs() < 1e-6);
    }

    #[test]
    fn dynamic_window_scales_with_batch() {
        let policy = TimestampPolicy::Dynamic { first_run: false };
        assert_eq!(policy.window_seconds(1), 300.0);
        assert_eq!(policy.window_seconds(10), 2_400.0);
        assert_eq!(policy.window_seconds(1_000), 86_400.0);
        assert_eq!(
            TimestampPolicy::Dynamic { first_run: true }.window_seconds(2),
            86_400.0
        );
        assert_eq!(compute_timestamp(3, 10, policy, NOW), Ok(NOW - 30 - 720));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            compute_timestamp(0, 0, TimestampPolicy::ProUser, NOW),
            Err(TimestampError::EmptyBatch)
        );
        assert_eq!(
            compute_timestamp(4, 4, TimestampPolicy::ProUser, NOW),
            Err(TimestampError::IndexOutOfRange {
                index: 4,
                batch_size: 4
            })
        );
    }

    #[test]
    fn mode_selects_policy() {
        let free = TimestampMode::default();
        assert_eq!(free.policy_for(true), TimestampPolicy::FirstRun);
        assert_eq!(free.policy_for(false), TimestampPolicy::FreeUser);
        let pro = TimestampMode::Fixed { pro_user: true };
        assert_eq!(pro.policy_for(true), TimestampPolicy::FirstRun);
        assert_eq!(pro.policy_for(false), TimestampPolicy::ProUser);
        assert_eq!(
            TimestampMode::Dynamic.policy_for(true),
            TimestampPolicy::Dynamic { first_run: true }
        );
    }

    #[test]
    fn mode_reads_from_json() {
        let mode: TimestampMode = serde_json::from_str(r#"{"mode":"dynamic"}"#).unwrap();
        assert_eq!(mode, TimestampMode::Dynamic);
        let mode: TimestampMode =
            serde_json::from_str(r#"{"mode":"fixed","pro_user":true}"#).unwrap();
        assert_eq!(mode, TimestampMode::Fixed { pro_user: true });
    }
}
