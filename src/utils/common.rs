/// Extract a string from a fixed-size field, stopping at the first NUL and
/// trimming trailing whitespace (header fields are NUL/space padded).
pub fn string_from_bytes(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).trim_end().to_string()
}
