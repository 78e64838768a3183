//! Channel naming and payload encoding.

pub fn last_used_channel(id: &str) -> String {
    format!("last_used_{id}")
}

pub fn is_running_channel(id: &str) -> String {
    format!("is_running_{id}")
}

pub fn encode_last_used(last_used: u64) -> String {
    last_used.to_string()
}

pub fn decode_last_used(payload: &str) -> Option<u64> {
    payload.trim().parse().ok()
}

pub fn encode_is_running(is_running: bool) -> String {
    is_running.to_string()
}

/// Accepts the spellings other publishers use for booleans.
pub fn decode_is_running(payload: &str) -> Option<bool> {
    match payload.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
