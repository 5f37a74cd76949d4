//! Utility functions used by Webbench.

use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;

use crate::CANCELED;

/// Length of a multipart boundary token returned by [`boundary_token`].
pub const BOUNDARY_SIZE: usize = BOUNDARY_DASHES + 32;

const BOUNDARY_DASHES: usize = 25;

lazy_static! {
    static ref TIMESPAN: Regex =
        Regex::new(r"((?P<hours>\d+?)h)?((?P<minutes>\d+?)m)?((?P<seconds>\d+?)s)?").unwrap();
}

/// Parse a string representing a time span and return the number of seconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", and "s", in that order, indicating
/// "hours", "minutes", and "seconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc.
///
/// # Example
/// ```rust
/// use webbench::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), 3_723);
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45"), 45);
///
/// // Invalid value is 0 seconds.
/// assert_eq!(util::parse_timespan("foo"), 0);
/// ```
pub fn parse_timespan(time_str: &str) -> usize {
    if let Ok(t) = usize::from_str(time_str) {
        trace!("{} is integer: {} seconds", time_str, t);
        return t;
    }

    let time_matches = match TIMESPAN.captures(time_str) {
        Some(time_matches) => time_matches,
        None => return 0,
    };
    // A missing unit is zero, one too large for a usize is invalid.
    let unit = |name: &str| match time_matches.name(name) {
        Some(value) => usize::from_str(value.as_str()).ok(),
        None => Some(0),
    };
    let (hours, minutes, seconds) = match (unit("hours"), unit("minutes"), unit("seconds")) {
        (Some(hours), Some(minutes), Some(seconds)) => (hours, minutes, seconds),
        _ => return 0,
    };
    let total = match total_seconds(hours, minutes, seconds) {
        Some(total) => total,
        None => {
            trace!("{} overflows", time_str);
            return 0;
        }
    };
    trace!(
        "{} hours {} minutes {} seconds: {} seconds",
        hours,
        minutes,
        seconds,
        total
    );
    total
}

fn total_seconds(hours: usize, minutes: usize, seconds: usize) -> Option<usize> {
    hours
        .checked_mul(60 * 60)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes extra
/// the characters and replaces the last two with a double-period ellipsis.
///
/// # Example
/// ```rust
/// use webbench::util;
///
/// // All but 7 characters are truncated, with ".." appended.
/// assert_eq!(util::truncate_string("this is a long string", 9), "this is..");
///
/// // All characters are returned as the string is less than 15 characters long.
/// assert_eq!(util::truncate_string("shorter string", 15), "shorter string");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length.saturating_sub(2)) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Generate a fresh `multipart/form-data` boundary.
///
/// The token is a run of dashes followed by the 32 hex digits of a random
/// version 4 UUID, [`BOUNDARY_SIZE`] characters in all.
///
/// # Example
/// ```rust
/// use webbench::util;
///
/// let boundary = util::boundary_token();
/// assert_eq!(boundary.len(), util::BOUNDARY_SIZE);
/// assert!(boundary.starts_with("-------------------------"));
/// ```
pub fn boundary_token() -> String {
    let uuid = uuid::Builder::from_random_bytes(rand::random()).into_uuid();
    format!("{}{}", "-".repeat(BOUNDARY_DASHES), uuid.simple())
}

// Internal helper to configure the control-c handler. Stop every client on the
// first ctrl-c, still reporting what was measured. Exit abruptly on the second.
pub(crate) fn setup_ctrlc_handler() {
    match ctrlc::set_handler(move || {
        // We've caught a ctrl-c, determine if it's the first time or an additional time.
        if *CANCELED.borrow() {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
            CANCELED.send_replace(true);
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // The handler can only be installed once per process, so running more
            // than one benchmark (as tests do) resets the flag instead.
            CANCELED.send_replace(false);
            info!("reset ctrl-c handler: {}", e);
        }
    }
}
