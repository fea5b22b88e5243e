//! # Timestamp Normalizer
//! Best-effort conversion of the free-form "as on ..." text a feed shows into a
//! local `NaiveDateTime`.
//!
//! Input is split into a date candidate and a time candidate, the time is
//! zero-padded, and the result is tried against an ordered pattern table.
//! Anything that does not match is `None`: an unreadable timestamp only turns
//! off the lag check, it never fails a sample.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// Label prefixes that sources print in front of the reported time.
static RE_LABELS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:as\s*(?:on|of|at)|last\s+updated(?:\s+(?:on|at))?|updated(?:\s+(?:on|at))?)\b\s*:?")
        .expect("label regex")
});

static RE_WIDE_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("gap regex"));

static RE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?\s*(am|pm)?$").expect("time regex")
});

/// Date+time patterns, most specific first. Two-digit years come before
/// four-digit ones: `%Y` would happily read "25" as year 25.
const DATETIME_FORMATS: &[&str] = &[
    "%d %b %y %H:%M:%S",
    "%d %b %y %I:%M:%S %p",
    "%d %b %y %H:%M",
    "%d %b %y %I:%M %p",
    "%d %b %Y %H:%M:%S",
    "%d %b %Y %I:%M:%S %p",
    "%d %b %Y %H:%M",
    "%d %b %Y %I:%M %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d-%b-%Y %H:%M:%S",
    "%d-%b-%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Date-only fallbacks (midnight).
const DATE_FORMATS: &[&str] = &["%d %b %y", "%d %b %Y", "%Y-%m-%d", "%d-%b-%Y", "%d/%m/%Y"];

/// Parse the reported time embedded in `raw`. Never panics; `None` means
/// "unparseable".
pub fn parse_reported(raw: &str) -> Option<NaiveDateTime> {
    let txt = clean(raw);
    if txt.is_empty() {
        return None;
    }

    let (date_part, time_part) = split_parts(&txt)?;
    let time_part = time_part.map(|t| normalize_time(&t));

    let mut candidates = Vec::with_capacity(3);
    if let (Some(d), Some(t)) = (&date_part, &time_part) {
        candidates.push(format!("{d} {t}"));
    }
    if let Some(d) = &date_part {
        candidates.push(d.clone());
    }
    // Whole text with commas dropped, for "19 Nov, 2025 12:05" style inputs.
    candidates.push(txt.clone());

    candidates
        .iter()
        .map(|c| compact(c))
        .find_map(|c| parse_candidate(&c))
}

fn clean(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    let stripped = RE_LABELS.replace_all(&decoded, "");
    stripped
        .replace('\u{00A0}', " ")
        .replace(['\u{200B}', '\u{FEFF}'], "")
        .trim()
        .to_string()
}

/// Split into (date, time). Pipe first, then a wide whitespace gap, then the
/// "last token has a colon" rule for a single chunk.
fn split_parts(txt: &str) -> Option<(Option<String>, Option<String>)> {
    let mut parts: Vec<String> = if txt.contains('|') {
        txt.split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        RE_WIDE_GAP
            .split(txt)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };
    if parts.is_empty() {
        parts = txt.split_whitespace().map(str::to_string).collect();
    }
    if parts.is_empty() {
        return None;
    }

    if parts.len() >= 2 {
        let mut it = parts.into_iter();
        return Some((it.next(), it.next()));
    }

    let single = parts.remove(0);
    let tokens: Vec<&str> = single.split_whitespace().collect();
    match tokens.split_last() {
        Some((last, rest)) if last.contains(':') => {
            let date = (!rest.is_empty()).then(|| rest.join(" "));
            Some((date, Some((*last).to_string())))
        }
        _ => Some((Some(single), None)),
    }
}

/// "9:5" -> "09:05", "9:5:3 PM" -> "09:05:03 pm". Unrecognized input is
/// returned trimmed.
fn normalize_time(t: &str) -> String {
    let t = t.trim();
    let Some(caps) = RE_TIME.captures(t) else {
        return t.to_string();
    };
    let mut out = format!("{:0>2}:{:0>2}", &caps[1], &caps[2]);
    if let Some(sec) = caps.get(3) {
        out.push_str(&format!(":{:0>2}", sec.as_str()));
    }
    if let Some(ampm) = caps.get(4) {
        out.push(' ');
        out.push_str(&ampm.as_str().to_ascii_lowercase());
    }
    out
}

fn compact(s: &str) -> String {
    s.replace(',', " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_candidate(c: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(c, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(c, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
