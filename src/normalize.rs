//! Title/album cleanup before a scrobble goes over the wire.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static TOPIC_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*-\s*topic\s*$").unwrap());

static VIEW_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\s,·•|-]*\b\d+(?:[.,]\d+)?\s*[kmb]?\s+views?\s*$").unwrap()
});

static VIDEO_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[\(\[][^\(\)\[\]]*\b(?:official|video|audio|lyrics?|visuali[sz]er|clip|4k|hd|hq)\b[^\(\)\[\]]*[\)\]]",
    )
    .unwrap()
});

static MARKETING_BRACKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[\(\[][^\(\)\[\]]*\b(?:remaster(?:ed)?|deluxe|edition|anniversary|expanded|mastered)\b[^\(\)\[\]]*[\)\]]",
    )
    .unwrap()
});

static MARKETING_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s+-\s+[^-]*\b(?:remaster(?:ed)?|deluxe|edition|anniversary|expanded|mastered)\b[^-]*$",
    )
    .unwrap()
});

static MARKETING_TRAILING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s+(?:\d{4}\s+)?(?:remaster(?:ed)?|deluxe(?:\s+edition)?|expanded\s+edition|anniversary\s+edition)(?:\s+\d{4})?\s*$",
    )
    .unwrap()
});

static FEATURE_BRACKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[\(\[]\s*(?:feat\.?|ft\.?|featuring|with|prod\.?)\s[^\(\)\[\]]*[\)\]]",
    )
    .unwrap()
});

static FEATURE_TRAILING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring|with|prod\.?)\s.*$").unwrap()
});

static VERSION_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[\(\[]\s*(?:radio edit|single edit|album version|explicit|clean|mono|stereo)(?:\s+(?:version|edit|mix))?\s*[\)\]]",
    )
    .unwrap()
});

static LIVE_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*[\(\[]\s*live\b[^\(\)\[\]]*[\)\]]").unwrap());

static LIVE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+-\s+live\b.*$").unwrap());

static LIVE_TRAILING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+live(?:\s+(?:at|from|in)\s.*)?\s*$").unwrap());

static RELEASE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+-\s+(?:single|ep)\s*$").unwrap());

static DANGLING_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+-\s*$").unwrap());

static UNICODE_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\u([0-9A-Fa-f]{4})").unwrap());

static EMPTY_BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\s*\)|\[\s*\]").unwrap());

static REPEATED_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Strips release noise from a title or album and sanitizes what is left.
///
/// Repeats until the text stops changing, so `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    settle(text, |current| sanitize_once(&strip_tags(current)))
}

/// Artist names only lose the "- Topic" channel suffix and view counts.
pub fn normalize_artist(text: &str) -> String {
    settle(text, |current| {
        let stripped = TOPIC_SUFFIX.replace(current, "");
        let stripped = VIEW_COUNT.replace(&stripped, "");
        sanitize_once(&stripped)
    })
}

/// Character-level cleanup only; no tag stripping.
pub fn sanitize(text: &str) -> String {
    settle(text, sanitize_once)
}

fn settle(text: &str, pass: impl Fn(&str) -> String) -> String {
    let mut current = pass(text);
    loop {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_tags(text: &str) -> String {
    let mut value = TOPIC_SUFFIX.replace(text, "").into_owned();
    value = VIEW_COUNT.replace(&value, "").into_owned();
    for pattern in [
        &*VIDEO_TAG,
        &*MARKETING_BRACKET,
        &*VERSION_TAG,
        &*LIVE_BRACKET,
        &*FEATURE_BRACKET,
    ] {
        value = pattern.replace_all(&value, "").into_owned();
    }
    for pattern in [
        &*MARKETING_SUFFIX,
        &*LIVE_SUFFIX,
        &*LIVE_TRAILING,
        &*FEATURE_TRAILING,
        &*RELEASE_SUFFIX,
        &*MARKETING_TRAILING,
        &*DANGLING_SEPARATOR,
    ] {
        value = pattern.replace(&value, "").into_owned();
    }
    value
}

fn sanitize_once(text: &str) -> String {
    let decoded = UNICODE_ESCAPE.replace_all(text, |caps: &Captures| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map_or_else(|| caps[0].to_string(), String::from)
    });
    let mut plain = String::with_capacity(decoded.len());
    for ch in decoded.chars() {
        match ch {
            '\u{2026}' => plain.push_str("..."),
            '\u{2013}' | '\u{2014}' => plain.push('-'),
            '\u{2018}' | '\u{2019}' => plain.push('\''),
            '\u{201C}' | '\u{201D}' => plain.push('"'),
            c if c.is_control() && c.is_whitespace() => plain.push(' '),
            c if c.is_control() || is_noncharacter(c) => {}
            c => plain.push(c),
        }
    }
    let collapsed = EMPTY_BRACKETS.replace_all(&plain, "");
    let collapsed = REPEATED_SPACE.replace_all(&collapsed, " ");
    collapsed.trim().to_string()
}

fn is_noncharacter(ch: char) -> bool {
    let code = u32::from(ch);
    (0xFDD0..=0xFDEF).contains(&code) || code & 0xFFFE == 0xFFFE
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_video_and_edition_tags() {
        assert_eq!(normalize("Song Title (Official Music Video)"), "Song Title");
        assert_eq!(normalize("Album [Deluxe Edition]"), "Album");
        assert_eq!(normalize("Artist, 509K views"), "Artist");
        assert_eq!(normalize("Song [4K]"), "Song");
        assert_eq!(normalize("Song (Lyric Video)"), "Song");
    }

    #[test]
    fn strips_marketing_suffixes() {
        assert_eq!(normalize("Yesterday - Remastered 2009"), "Yesterday");
        assert_eq!(normalize("Help! - 2015 Remaster"), "Help!");
        assert_eq!(normalize("Abbey Road (Super Deluxe Edition)"), "Abbey Road");
        assert_eq!(normalize("Rumours Deluxe Edition"), "Rumours");
        assert_eq!(normalize("Purple Rain - Single"), "Purple Rain");
        assert_eq!(normalize("Demo Tape - EP"), "Demo Tape");
    }

    #[test]
    fn strips_feature_credits() {
        assert_eq!(normalize("Lean On (feat. MØ)"), "Lean On");
        assert_eq!(normalize("Lean On feat. MØ & DJ Snake"), "Lean On");
        assert_eq!(normalize("Track ft. Somebody"), "Track");
        assert_eq!(normalize("Track [prod. Someone]"), "Track");
        assert_eq!(normalize("Track (with Friend)"), "Track");
        assert_eq!(normalize("Track - with Friend"), "Track");
        assert_eq!(normalize("Dance With Me"), "Dance");
        assert_eq!(normalize("Without You"), "Without You");
        assert_eq!(normalize("Defeat the Purpose"), "Defeat the Purpose");
    }

    #[test]
    fn strips_version_and_live_markers() {
        assert_eq!(normalize("Song (Radio Edit)"), "Song");
        assert_eq!(normalize("Song [Explicit]"), "Song");
        assert_eq!(normalize("Song (Mono)"), "Song");
        assert_eq!(normalize("Song (Live at Wembley 1986)"), "Song");
        assert_eq!(normalize("Song - Live"), "Song");
        assert_eq!(normalize("Song Live"), "Song");
        assert_eq!(normalize("Song Live at Wembley 1986"), "Song");
        assert_eq!(normalize("Lively Tune"), "Lively Tune");
        assert_eq!(normalize("Alive"), "Alive");
    }

    #[test]
    fn strips_stacked_tags() {
        assert_eq!(
            normalize("Song (Official Video) [Remastered] (feat. Guest)"),
            "Song"
        );
        assert_eq!(normalize("Song \u{2013} Remastered"), "Song");
    }

    #[test]
    fn sanitizes_text() {
        assert_eq!(normalize("Don\u{2019}t Stop"), "Don't Stop");
        assert_eq!(normalize("\u{201C}Quoted\u{201D}"), "\"Quoted\"");
        assert_eq!(normalize("Wait\u{2026}"), "Wait...");
        assert_eq!(normalize("Caf\\u00e9"), "Café");
        assert_eq!(normalize("Tab\there"), "Tab here");
        assert_eq!(normalize("Bell\u{7}\u{FFFF}"), "Bell");
        assert_eq!(normalize("  lots   of   space  "), "lots of space");
        assert_eq!(normalize("Empty () [ ] pair"), "Empty pair");
    }

    #[test]
    fn artist_keeps_credits() {
        assert_eq!(normalize_artist("Queen - Topic"), "Queen");
        assert_eq!(normalize_artist("Queen, 1.2M views"), "Queen");
        assert_eq!(
            normalize_artist("Earth, Wind & Fire"),
            "Earth, Wind & Fire"
        );
        assert_eq!(normalize_artist("Live"), "Live");
    }

    #[test]
    fn normalizes_already_clean_text_unchanged() {
        for text in ["Bohemian Rhapsody", "A Night at the Opera", "AC/DC", ""] {
            assert_eq!(normalize(text), text);
        }
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(text in ".{0,64}") {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalize_is_idempotent_on_tagged_titles(
            base in "[A-Za-z ]{1,20}",
            tag in prop::sample::select(vec![
                " (Official Video)", " [Deluxe Edition]", " - Remastered 2011",
                " feat. Someone", " (Live)", " - Single", ", 12K views",
                " \u{2013} Remaster", " (Radio Edit)", " \\u2019",
            ]),
        ) {
            let once = normalize(&format!("{base}{tag}"));
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn sanitize_is_idempotent(text in ".{0,64}") {
            let once = sanitize(&text);
            prop_assert_eq!(sanitize(&once), once);
        }
    }
}
