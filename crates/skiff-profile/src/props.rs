//! The properties codec: `key = value` lines, insertion-ordered.

use indexmap::IndexMap;

/// Parse property bytes into an ordered key-value map.
///
/// Blank lines and lines starting with `#` or `!` are ignored; everything
/// before the first `=` is the key. A line without `=` maps the whole
/// trimmed line to the empty string.
pub fn parse(bytes: &[u8]) -> IndexMap<String, String> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = IndexMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                out.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                out.insert(line.to_string(), String::new());
            }
        }
    }
    out
}

/// Serialize an ordered key-value map to property bytes.
pub fn to_bytes(props: &IndexMap<String, String>) -> Vec<u8> {
    let mut out = String::new();
    for (key, value) in props {
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(value);
        out.push('\n');
    }
    out.into_bytes()
}
