//! Minimal XML helpers for storage service payloads
//!
//! Blob listings and queue messages are flat documents; pulling the few
//! elements we need with regular expressions is enough.

use once_cell::sync::Lazy;
use regex::Regex;

fn element_pattern(tag: &str) -> Regex {
    Regex::new(&format!(r"(?s)<{0}>(.*?)</{0}>", regex::escape(tag))).unwrap()
}

pub(crate) static CODE: Lazy<Regex> = Lazy::new(|| element_pattern("Code"));
pub(crate) static NAME: Lazy<Regex> = Lazy::new(|| element_pattern("Name"));
pub(crate) static NEXT_MARKER: Lazy<Regex> = Lazy::new(|| element_pattern("NextMarker"));
pub(crate) static QUEUE_MESSAGE: Lazy<Regex> = Lazy::new(|| element_pattern("QueueMessage"));
pub(crate) static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| element_pattern("MessageId"));
pub(crate) static POP_RECEIPT: Lazy<Regex> = Lazy::new(|| element_pattern("PopReceipt"));
pub(crate) static DEQUEUE_COUNT: Lazy<Regex> = Lazy::new(|| element_pattern("DequeueCount"));
pub(crate) static INSERTION_TIME: Lazy<Regex> = Lazy::new(|| element_pattern("InsertionTime"));
pub(crate) static MESSAGE_TEXT: Lazy<Regex> = Lazy::new(|| element_pattern("MessageText"));

/// Inner text of the first matching element
pub(crate) fn first(pattern: &Regex, xml: &str) -> Option<String> {
    pattern
        .captures(xml)
        .and_then(|captures| captures.get(1))
        .map(|m| unescape(m.as_str()))
}

/// Inner text of every matching element
pub(crate) fn all(pattern: &Regex, xml: &str) -> Vec<String> {
    pattern
        .captures_iter(xml)
        .filter_map(|captures| captures.get(1))
        .map(|m| unescape(m.as_str()))
        .collect()
}

/// Raw inner markup of every matching element, without unescaping
pub(crate) fn fragments<'a>(pattern: &Regex, xml: &'a str) -> Vec<&'a str> {
    pattern
        .captures_iter(xml)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str())
        .collect()
}

pub(crate) fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
