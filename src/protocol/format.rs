//! Normalisation of message bodies before decoding.
//!
//! The server encodes emoji as `<span class="emoji emojiXXXX"></span>`,
//! line breaks as `<br/>`, and escapes markup as HTML entities.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    // Some spans arrive without their closing bracket.
    static ref EMOJI_RE: Regex =
        Regex::new(r#"<span class="emoji emoji(.{1,10}?)"></span>?"#).expect("valid emoji regex");
    static ref ENTITY_RE: Regex =
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("valid entity regex");
}

/// Code points the server reports for the wrong face.
const EMOJI_REMAP: [(&str, &str); 9] = [
    ("1f63c", "1f601"),
    ("1f639", "1f602"),
    ("1f63a", "1f603"),
    ("1f4ab", "1f616"),
    ("1f64d", "1f614"),
    ("1f63b", "1f60d"),
    ("1f63d", "1f618"),
    ("1f64e", "1f621"),
    ("1f63f", "1f622"),
];

/// Full pipeline: emoji spans, line breaks, then entities.
pub fn format_message_text(text: &str) -> String {
    let text = format_emoji(text);
    let text = text.replace("<br/>", "\n");
    unescape_html(&text).into_owned()
}

/// Replace emoji spans with the characters they stand for.
pub fn format_emoji(text: &str) -> String {
    EMOJI_RE
        .replace_all(text, |caps: &Captures| {
            let code = &caps[1];
            let code = EMOJI_REMAP
                .iter()
                .find(|(from, _)| *from == code)
                .map(|(_, to)| *to)
                .unwrap_or(code);
            emoji_chars(code).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn emoji_chars(code: &str) -> Option<String> {
    if !code.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let parts: Vec<&str> = match code.len() {
        6 => vec![&code[..2], &code[2..]],
        10 => vec![&code[..5], &code[5..]],
        _ => vec![code],
    };
    parts
        .into_iter()
        .map(|hex| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32))
        .collect()
}

/// Decode HTML character references. Unknown named entities are left intact.
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    ENTITY_RE.replace_all(text, |caps: &Captures| {
        let entity = &caps[1];
        let decoded = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = entity.strip_prefix('#') {
            dec.parse().ok().and_then(char::from_u32)
        } else {
            named_entity(entity)
        };
        decoded
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    })
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ensp" => '\u{2002}',
        "emsp" => '\u{2003}',
        "thinsp" => '\u{2009}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emoji_span_to_unicode() {
        assert_eq!(format_emoji(r#"hi <span class="emoji emoji1f604"></span>"#), "hi \u{1f604}");
    }

    #[test]
    fn test_emoji_mismatch_table() {
        assert_eq!(
            format_emoji(r#"<span class="emoji emoji1f639"></span>"#),
            "\u{1f602}"
        );
    }

    #[test]
    fn test_emoji_unterminated_span() {
        assert_eq!(
            format_emoji(r#"<span class="emoji emoji1f450"></span!"#),
            "\u{1f450}!"
        );
    }

    #[test]
    fn test_emoji_pair_codes() {
        // flag sequences arrive as two concatenated code points
        assert_eq!(
            format_emoji(r#"<span class="emoji emoji1f1e81f1f3"></span>"#),
            "\u{1f1e8}\u{1f1f3}"
        );
    }

    #[test]
    fn test_full_pipeline() {
        assert_eq!(
            format_message_text("a &lt;b&gt;<br/>c &amp;amp; &#39;d&#x27; &foo;"),
            "a <b>\nc &amp; 'd' &foo;"
        );
    }

    #[test]
    fn test_numeric_entities() {
        assert_eq!(unescape_html("it&#39;s"), "it's");
        assert_eq!(unescape_html("&#x1F604; &#X1f604;"), "\u{1f604} \u{1f604}");
        assert_eq!(unescape_html("&#128516;"), "\u{1f604}");
        // surrogates and out-of-range values are not characters
        assert_eq!(unescape_html("&#xD800; &#9999999;"), "&#xD800; &#9999999;");
    }
}
