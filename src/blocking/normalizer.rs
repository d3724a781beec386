/// Turn user-entered text into a canonical blocklist domain.
///
/// Lowercases, strips an `http://`/`https://` scheme and any leading `www.`,
/// then cuts at the first `/` or `?`. Returns `None` when nothing is left.
/// The output never starts with `www.` and never contains `/` or `?`, so a
/// second pass is a no-op.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let value = raw.trim().to_lowercase();
    let mut value = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(&value)
        .trim_start();
    while let Some(rest) = value.strip_prefix("www.") {
        value = rest.trim_start();
    }
    let end = value.find(|c: char| c == '/' || c == '?').unwrap_or(value.len());
    let domain = value[..end].trim_end();

    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}

/// Normalize every entry, dropping invalid ones and later duplicates.
pub fn normalize_all<I, S>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for entry in entries {
        if let Some(domain) = normalize_domain(entry.as_ref()) {
            if !out.contains(&domain) {
                out.push(domain);
            }
        }
    }
    out
}
