//! `mm:ss` timecode parsing for query windows.

use crate::error::{Error, Result};

/// Parse an `mm:ss` timecode into seconds.
///
/// Minutes are a non-negative integer, seconds a non-negative number
/// (fractional seconds allowed), separated by a single colon.
///
/// # Examples
///
/// ```
/// use waveprint_core::timecode::parse_mmss;
///
/// assert_eq!(parse_mmss("0:30").unwrap(), 30.0);
/// assert_eq!(parse_mmss("02:05.5").unwrap(), 125.5);
/// assert!(parse_mmss("1:02:03").is_err());
/// ```
pub fn parse_mmss(input: &str) -> Result<f64> {
    let trimmed = input.trim();
    let bad = || {
        Error::InvalidInput(format!(
            "invalid timecode '{input}': expected mm:ss with non-negative values"
        ))
    };

    let (minutes_str, seconds_str) = trimmed.split_once(':').ok_or_else(bad)?;
    if seconds_str.contains(':') {
        return Err(bad());
    }

    let minutes: u32 = minutes_str.parse().map_err(|_| bad())?;
    let seconds: f64 = seconds_str.parse().map_err(|_| bad())?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(bad());
    }

    Ok(f64::from(minutes) * 60.0 + seconds)
}
