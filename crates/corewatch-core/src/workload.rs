//! Workload and engine identity normalization.
//!
//! The workload descriptor is the emulator's argument list, the last path
//! segment of which is the ROM. Region and dump tags such as `(USA)` or
//! `[!]` are dropped so different dumps of one game share an identity.

use std::sync::LazyLock;

use regex::Regex;

/// Sentinel the remote side prints when no engine process is running.
pub const NO_ENGINE: &str = "none";

const ENGINE_SUFFIX: &str = "_libretro";
const MAX_EXTENSION_LEN: usize = 5;

static PARENTHESIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid pattern"));
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("valid pattern"));

/// Reduce a free-text workload descriptor to a stable identifier.
///
/// Returns an empty string when nothing identifiable remains.
pub fn normalize_workload(descriptor: &str) -> String {
    let segment = descriptor.rsplit('/').next().unwrap_or_default().trim();
    let stem = strip_extension(segment);
    let bare = strip_annotations(stem);
    bare.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reduce an engine token (`snes9x_libretro`) to its short name.
///
/// Returns `None` for the "no engine" sentinel or a blank line.
pub fn normalize_engine(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case(NO_ENGINE) {
        return None;
    }
    let name = raw.strip_suffix(ENGINE_SUFFIX).unwrap_or(raw);
    (!name.is_empty()).then(|| name.to_string())
}

fn strip_extension(segment: &str) -> &str {
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => segment,
    }
}

fn strip_annotations(text: &str) -> String {
    let text = PARENTHESIZED.replace_all(text, "");
    BRACKETED.replace_all(&text, "").into_owned()
}
