use tracing::warn;

use crate::tutor::types::TutorReply;

const FENCE: &str = "```";

/// Turns raw provider output into a [`TutorReply`].
///
/// Never fails: text that does not decode as a JSON object becomes a plain
/// reply carrying the whole trimmed input, empty feedback and level `beginner`.
pub fn parse_response(raw: &str) -> TutorReply {
    let trimmed = raw.trim();
    let body = strip_fence(trimmed);

    match decode_record(body) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, raw_len = trimmed.len(), "provider output is not a structured record, using plain reply");
            TutorReply::plain(trimmed)
        }
    }
}

/// Drops an opening fence line and, when present, a bare closing fence line.
pub fn strip_fence(text: &str) -> &str {
    if !text.starts_with(FENCE) {
        return text;
    }

    let Some(first_break) = text.find('\n') else {
        // Only the opening fence line exists.
        return "";
    };
    let rest = &text[first_break + 1..];

    let last_start = rest.trim_end_matches(['\n', '\r']).rfind('\n').map_or(0, |i| i + 1);
    if rest[last_start..].trim() == FENCE {
        &rest[..last_start]
    } else {
        rest
    }
}

fn decode_record(body: &str) -> Result<TutorReply, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    if !value.is_object() {
        return Err(serde::de::Error::custom("expected a JSON object"));
    }
    serde_json::from_value(value)
}
