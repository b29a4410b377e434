//! Sanitisation for peer-supplied strings before they reach the logs.

/// Renders untrusted bytes as printable ASCII.
///
/// Anything outside the printable range is replaced with `?` so a malicious
/// peer cannot smuggle control sequences into terminal output.
pub fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if (0x20..=0x7e).contains(&b) {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}
