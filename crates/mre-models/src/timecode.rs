//! Frame-based timecode utilities.
//!
//! Renderers address clip boundaries as `HH:MM:SS:FF` timecodes, where `FF`
//! is a frame index within the second. Timecodes are zero-padded so that
//! string order matches time order.

/// Default frame rate used when an event does not report one.
pub const DEFAULT_FRAME_RATE: u32 = 25;

/// Convert seconds to a whole frame count, rounding down.
pub fn seconds_to_frames(secs: f64, fps: u32) -> u64 {
    if secs <= 0.0 || fps == 0 {
        return 0;
    }
    // Nudge before flooring so 0.2 * 25 lands on frame 5, not 4.999...
    (secs * fps as f64 + 1e-6).floor() as u64
}

/// Format a frame count as `HH:MM:SS:FF`.
pub fn frames_to_timecode(frames: u64, fps: u32) -> String {
    let fps = fps.max(1) as u64;
    let total_secs = frames / fps;
    let ff = frames % fps;
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{:02}:{:02}:{:02}:{:02}", hours, mins, secs, ff)
}

/// Format seconds as an `HH:MM:SS:FF` timecode.
///
/// # Examples
/// ```
/// use mre_models::timecode::seconds_to_timecode;
/// assert_eq!(seconds_to_timecode(0.0, 25), "00:00:00:00");
/// assert_eq!(seconds_to_timecode(3661.2, 25), "01:01:01:05");
/// ```
pub fn seconds_to_timecode(secs: f64, fps: u32) -> String {
    frames_to_timecode(seconds_to_frames(secs, fps), fps)
}

/// Timecode of the last frame shown for a clip ending at `secs`.
///
/// Clip end markers are inclusive, so the end lands one frame before the
/// exclusive end time (never below frame zero).
pub fn end_timecode(secs: f64, fps: u32) -> String {
    frames_to_timecode(seconds_to_frames(secs, fps).saturating_sub(1), fps)
}

/// Parse an `HH:MM:SS:FF` timecode back to seconds.
pub fn parse_timecode(tc: &str, fps: u32) -> Result<f64, TimecodeError> {
    let tc = tc.trim();
    if tc.is_empty() {
        return Err(TimecodeError::Empty);
    }
    if fps == 0 {
        return Err(TimecodeError::InvalidFrameRate);
    }

    let parts: Vec<&str> = tc.split(':').collect();
    if parts.len() != 4 {
        return Err(TimecodeError::InvalidFormat(tc.to_string()));
    }

    let field = |name: &'static str, raw: &str| -> Result<u64, TimecodeError> {
        raw.parse::<u64>()
            .map_err(|_| TimecodeError::InvalidValue(name, raw.to_string()))
    };
    let hours = field("hours", parts[0])?;
    let minutes = field("minutes", parts[1])?;
    let seconds = field("seconds", parts[2])?;
    let frames = field("frames", parts[3])?;

    if minutes >= 60 || seconds >= 60 {
        return Err(TimecodeError::InvalidFormat(tc.to_string()));
    }
    if frames >= fps as u64 {
        return Err(TimecodeError::FrameOutOfRange { frames, fps });
    }

    let whole = (hours * 3600 + minutes * 60 + seconds) as f64;
    Ok(whole + frames as f64 / fps as f64)
}

/// Timecode parsing error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimecodeError {
    #[error("Timecode cannot be empty")]
    Empty,

    #[error("Frame rate must be positive")]
    InvalidFrameRate,

    #[error("Invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid timecode format '{0}'. Use HH:MM:SS:FF")]
    InvalidFormat(String),

    #[error("Frame {frames} out of range for {fps} fps")]
    FrameOutOfRange { frames: u64, fps: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_to_timecode() {
        assert_eq!(seconds_to_timecode(0.0, 25), "00:00:00:00");
        assert_eq!(seconds_to_timecode(10.5, 25), "00:00:10:12");
        assert_eq!(seconds_to_timecode(3599.96, 25), "00:59:59:24");
        assert_eq!(seconds_to_timecode(-1.0, 25), "00:00:00:00");
    }

    #[test]
    fn test_end_timecode_is_inclusive() {
        assert_eq!(end_timecode(10.0, 25), "00:00:09:24");
        assert_eq!(end_timecode(0.0, 25), "00:00:00:00");
    }

    #[test]
    fn test_string_order_matches_time_order() {
        let a = seconds_to_timecode(59.9, 25);
        let b = seconds_to_timecode(60.0, 25);
        assert!(a < b);
    }

    #[test]
    fn test_parse_timecode() {
        assert_eq!(parse_timecode("00:01:30:00", 25).unwrap(), 90.0);
        let secs = parse_timecode("00:00:10:12", 25).unwrap();
        assert!((secs - 10.48).abs() < 1e-9);
    }

    #[test]
    fn test_parse_timecode_errors() {
        assert!(matches!(parse_timecode("", 25), Err(TimecodeError::Empty)));
        assert!(matches!(parse_timecode("00:00:10", 25), Err(TimecodeError::InvalidFormat(_))));
        assert!(matches!(parse_timecode("00:aa:10:00", 25), Err(TimecodeError::InvalidValue("minutes", _))));
        assert!(matches!(
            parse_timecode("00:00:10:25", 25),
            Err(TimecodeError::FrameOutOfRange { .. })
        ));
        assert!(matches!(parse_timecode("00:00:10:00", 0), Err(TimecodeError::InvalidFrameRate)));
    }
}
