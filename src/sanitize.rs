use regex::Regex;
use std::sync::OnceLock;

const MAX_FILENAME_LEN: usize = 200;
const EMPTY_PLACEHOLDER: &str = "unnamed_video";

fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("illegal chars pattern"))
}

/// Maps a raw suggested filename to a filesystem-safe, length-bounded name.
/// Never fails and never returns an empty string.
pub fn sanitize_filename(raw: &str) -> String {
    let clean = illegal_chars().replace_all(raw, "_");
    let clean = clean.trim();

    if clean.is_empty() {
        return EMPTY_PLACEHOLDER.to_string();
    }

    let chars: Vec<char> = clean.chars().collect();
    if chars.len() <= MAX_FILENAME_LEN {
        return clean.to_string();
    }

    // Truncate the stem, keep the extension.
    let (stem, ext) = match clean.rfind('.') {
        Some(idx) if idx > 0 => clean.split_at(idx),
        _ => (clean, ""),
    };
    let ext_len = ext.chars().count();
    let keep = MAX_FILENAME_LEN.saturating_sub(ext_len);
    let stem: String = stem.chars().take(keep).collect();
    let truncated = format!("{stem}{ext}");
    if truncated.trim().is_empty() {
        EMPTY_PLACEHOLDER.to_string()
    } else {
        truncated
    }
}
