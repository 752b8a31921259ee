//! core::duration
//!
//! Human time-text parsing for wait budgets.
//!
//! Merge options express wait budgets as short time texts: `"1h30m15s"`,
//! `"90m"`, `"45s"`. Whitespace between components is tolerated. Text that
//! does not parse resolves to zero, so an unparseable budget never waits.

use std::time::Duration;

/// Parse a time text like `"1h30m15s"` into a [`Duration`].
///
/// Unknown or empty text yields `Duration::ZERO`.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gitu::core::duration::time_text_to_duration;
///
/// assert_eq!(time_text_to_duration("1h 30m"), Duration::from_secs(5400));
/// assert_eq!(time_text_to_duration("test value"), Duration::ZERO);
/// ```
pub fn time_text_to_duration(text: &str) -> Duration {
    Duration::from_millis(time_text_to_millis(text))
}

/// Parse a time text into milliseconds.
///
/// The accepted grammar is a sequence of `<number><unit>` components with
/// units `h`, `m`, `s`, optionally separated by whitespace. Any deviation
/// makes the whole text resolve to `0`.
pub fn time_text_to_millis(text: &str) -> u64 {
    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut saw_component = false;

    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if ch.is_whitespace() && digits.is_empty() {
            continue;
        }
        let per_unit: u64 = match ch {
            'h' => 3_600_000,
            'm' => 60_000,
            's' => 1_000,
            _ => return 0,
        };
        let Ok(value) = digits.parse::<u64>() else {
            return 0;
        };
        total = total.saturating_add(value.saturating_mul(per_unit));
        digits.clear();
        saw_component = true;
    }

    // Trailing digits without a unit invalidate the text.
    if !digits.is_empty() || !saw_component {
        return 0;
    }
    total
}
