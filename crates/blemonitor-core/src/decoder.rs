//! Frame decoding for the sensor's UART text stream.
//!
//! Every notification payload is interpreted as UTF-8 text and classified by
//! substring. The first matching label wins, in the order
//! `Idle`, `Normal Cutting`, `Warning`, `Danger`. Firmware revisions append
//! punctuation (`"Warning!"`) or prefixes, so the match is not anchored.

use tracing::trace;

use crate::types::Status;

/// Decodes a raw notification payload into a status.
///
/// Returns `None` when the payload is not valid UTF-8 or names no known
/// status. Neither case is an error: the frame is simply dropped.
#[must_use]
pub fn decode(payload: &[u8]) -> Option<Status> {
    let Ok(text) = std::str::from_utf8(payload) else {
        trace!(len = payload.len(), "dropping non UTF-8 frame");
        return None;
    };
    classify(text)
}

/// Classifies already-decoded text.
#[must_use]
pub fn classify(text: &str) -> Option<Status> {
    let status = Status::TRACKED
        .into_iter()
        .find(|status| text.contains(status.label()));
    if status.is_none() {
        trace!(frame = text, "frame carries no status");
    }
    status
}
