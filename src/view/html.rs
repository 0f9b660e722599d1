//! Escaping and attribute helpers.

/// Escape text for use in HTML content and quoted attribute values.
pub fn escape(source: &str) -> String {
    let mut escaped = String::with_capacity(source.len());
    for c in source.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render `name="value"` pairs separated by spaces. Values are escaped.
pub fn implode_attributes(attributes: &[(&str, String)]) -> String {
    attributes
        .iter()
        .map(|(name, value)| format!("{}=\"{}\"", name, escape(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove tags, keeping text content.
pub fn strip_tags(source: &str) -> String {
    let mut text = String::with_capacity(source.len());
    let mut in_tag = false;
    for c in source.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text
}
