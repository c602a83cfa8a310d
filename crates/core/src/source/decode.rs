use std::sync::OnceLock;

use regex_lite::{Captures, Regex};

use super::SourceError;

fn entity() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(?:(amp|lt|gt|quot|apos)|#([xX][0-9a-fA-F]{1,6}|[0-9]{1,7}));")
            .expect("valid regex")
    })
}

/// Decode the HTML entities indexers put into download links.
///
/// Named entities `&amp; &lt; &gt; &quot; &apos;` and numeric entities
/// (`&#39;`, `&#x27;`) are decoded in one pass, so "&amp;lt;" stays "&lt;".
/// Anything else is left as is.
pub fn decode_html(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    entity()
        .replace_all(input, |caps: &Captures<'_>| {
            if let Some(name) = caps.get(1) {
                return match name.as_str() {
                    "amp" => "&",
                    "lt" => "<",
                    "gt" => ">",
                    "quot" => "\"",
                    _ => "'",
                }
                .to_string();
            }
            let digits = &caps[2];
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => digits.parse::<u32>().ok(),
            };
            match code.and_then(char::from_u32) {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Check that a fetched body is an XML/NZB document.
pub fn validate_document(body: &[u8]) -> Result<(), SourceError> {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    let head: String = trimmed.chars().take(5).collect::<String>().to_ascii_lowercase();

    if head.starts_with("<?xml") || head.starts_with("<nzb") {
        Ok(())
    } else {
        Err(SourceError::NotAnNzb {
            preview: trimmed.chars().take(40).collect(),
        })
    }
}

/// File name handed to the daemon for the submitted document.
pub fn nzb_file_name(release_title: &str) -> String {
    let cleaned: String = release_title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');

    if cleaned.is_empty() {
        "download.nzb".to_string()
    } else if cleaned.to_ascii_lowercase().ends_with(".nzb") {
        cleaned.to_string()
    } else {
        format!("{}.nzb", cleaned)
    }
}
