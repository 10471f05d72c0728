/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Display titles for stored images.
//!
//! Stored titles look like `<hex token>-<name>.<ext>`, often with stock-site
//! prefixes and numeric ids baked into `<name>`. The display title keeps only
//! the descriptive dash-separated segments of the part before the first `.`.

const KNOWN_PREFIXES: &[&str] = &["pexels", "unsplash", "img", "image"];

fn is_numeric(seg: &str) -> bool {
    !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit())
}

fn is_hex_like(seg: &str) -> bool {
    seg.len() >= 3 && seg.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Returns `None` when nothing descriptive is left.
pub fn display_title(stored: &str) -> Option<String> {
    let name = stored.split('.').next().unwrap_or_default();
    let kept = name
        .split('-')
        .filter(|seg| {
            !seg.is_empty()
                && !is_numeric(seg)
                && !KNOWN_PREFIXES.contains(&seg.to_lowercase().as_str())
                && !is_hex_like(seg)
        })
        .collect::<Vec<_>>();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_token_ids_and_stock_prefixes() {
        assert_eq!(display_title("sunset-beach.jpg").as_deref(), Some("sunset-beach"));
        assert_eq!(
            display_title("3fa9-pexels-sunset-beach-1234567.jpg").as_deref(),
            Some("sunset-beach")
        );
        assert_eq!(
            display_title("9c0e21d4aa01b7f3-IMG-mountain.png").as_deref(),
            Some("mountain")
        );
    }

    #[test]
    fn nothing_descriptive_yields_none() {
        assert_eq!(display_title("a1b2-12345.jpg"), None);
        assert_eq!(display_title(".hidden"), None);
        assert_eq!(display_title("--.png"), None);
    }

    #[test]
    fn doubled_dashes_do_not_leave_gaps() {
        assert_eq!(display_title("ab12--sea--sky.jpg").as_deref(), Some("sea-sky"));
    }

    #[test]
    fn short_hex_words_survive() {
        // Two-character segments are below the hex-token threshold.
        assert_eq!(display_title("ab12-be-kind.gif").as_deref(), Some("be-kind"));
    }
}
