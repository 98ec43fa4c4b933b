use crate::store::WaitlistEntry;

pub const CSV_HEADER: &str = "email,createdAt";

// Quote a field holding a separator, quote or line break; double inner quotes
pub fn escape_csv(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_csv(entries: &[WaitlistEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 1);
    lines.push(CSV_HEADER.to_string());
    lines.extend(entries.iter().map(|entry| {
        format!(
            "{},{}",
            escape_csv(&entry.email),
            escape_csv(&entry.created_at_string())
        )
    }));
    lines.join("\n")
}
