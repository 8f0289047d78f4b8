//! Common utilities and helper functions

pub mod retry;

/// Generate an instance identifier when none is configured.
///
/// The random suffix keeps ids unique across hosts sharing one Redis bus,
/// since instances drop envelopes carrying their own id.
pub fn generate_instance_id(port: u16) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("node-{port}-{}", &suffix[..8])
}

/// Truncate text to a maximum number of characters for log output
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
