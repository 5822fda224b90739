//! MUME talks ISO-8859-1 unless told otherwise.

/// Every byte is the code point of the same value.
pub fn decode(b: &[u8]) -> String {
    b.iter().map(|&c| char::from(c)).collect()
}

/// Characters outside Latin-1 become `?`.
pub fn encode(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
