//! Recipient address validation

use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::warn;

// local-part@domain.tld with a final label of at least two characters
static ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)*\.[^@\s.]{2,}$").expect("address pattern")
});

pub fn is_valid_address(address: &str) -> bool {
    ADDRESS.is_match(address)
}

/// Trim every entry and keep the well-formed ones, in order
pub fn valid_recipients<S: AsRef<str>>(entries: &[S]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| {
            let trimmed = entry.as_ref().trim();
            if trimmed.is_empty() {
                warn!("Skipping empty recipient entry");
                None
            } else if !is_valid_address(trimmed) {
                warn!("Skipping invalid recipient address: {}", trimmed);
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}
