//! Turning subtitle payloads (SRT, WebVTT, or plain text) into prose.

use regex::Regex;
use std::sync::LazyLock;

/// Two time tokens around an arrow, e.g. `00:00:01,000 --> 00:00:02,000` (SRT) or
/// `00:01.000 --> 00:02.000 align:start` (WebVTT). Each token needs at least two
/// `:`/`.`/`,` separators.
static TIMESTAMP_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(?:[:.,]\d+){2,}\s*(?:-->|->|→)\s*\d+(?:[:.,]\d+){2,}(?:\s.*)?$")
        .expect("timestamp pattern is valid")
});

const FORMAT_HEADER: &str = "WEBVTT";

/// Strips cue numbering, timing, and headers from a caption payload.
///
/// Blank lines, all-digit lines, the `WEBVTT` header line, and timestamp-range lines
/// are dropped. Every remaining line is trimmed and emitted in order, each followed by
/// a single space. Nothing is reordered or deduplicated.
///
/// `normalize(normalize(x)) == normalize(x)` for any `x`.
pub fn normalize(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    for line in raw.lines().map(str::trim) {
        if is_noise(line) {
            continue;
        }
        text.push_str(line);
        text.push(' ');
    }

    // kept fragments can line up into something that is itself noise
    if is_noise(text.trim()) {
        return String::new();
    }
    text
}

fn is_noise(line: &str) -> bool {
    line.is_empty()
        || line.chars().all(|c| c.is_ascii_digit())
        || line == FORMAT_HEADER
        || TIMESTAMP_RANGE.is_match(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srt() {
        let raw = "1\n00:00:01,000 --> 00:00:02,000\nHello world\n\n2\n00:00:02,000 --> 00:00:03,000\nGoodbye\n";
        assert_eq!(normalize(raw), "Hello world Goodbye ");
    }

    #[test]
    fn webvtt_with_cue_settings_and_crlf() {
        let raw = "WEBVTT\r\n\r\n00:01.000 --> 00:04.000 align:start position:10%\r\n\
                   First line\r\n  second line  \r\n\r\n00:00:05.500 --> 00:00:07.250\r\nThird\r\n";
        assert_eq!(normalize(raw), "First line second line Third ");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(
            normalize("Today we discuss monads.\nThey are burritos."),
            "Today we discuss monads. They are burritos. "
        );
    }

    #[test]
    fn keeps_lines_that_merely_mention_arrows_or_times() {
        assert_eq!(
            normalize("see slide 3 --> next\nmeet at 10:30\n"),
            "see slide 3 --> next meet at 10:30 "
        );
    }

    #[test]
    fn preserves_order_and_duplicates() {
        assert_eq!(normalize("b\na\nb\n"), "b a b ");
    }

    #[test]
    fn empty_and_noise_only_inputs() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("\n\n   \n"), "");
        assert_eq!(normalize("WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\n"), "");
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "1\n00:00:01,000 --> 00:00:02,000\nHello world\n\n2\n00:00:02,000 --> 00:00:03,000\nGoodbye\n",
            "WEBVTT\n\nNOTE hi\n\n00:01.000 --> 00:02.000\n- Speaker one\n",
            "plain",
            "   leading and trailing   ",
            "",
            "12\n34 56\nWEB\nVTT",
            // fragments that only form a timestamp range once joined
            "00:00:01.000\n-->\n00:00:02.000\n",
            "weird\r\rcarriage\ttabs\n",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input: {input:?}");
        }
    }
}
