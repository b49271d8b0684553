//! Source format detection.
//!
//! An explicit hint always wins. Otherwise the checks run in a fixed order:
//!
//! 1. structural parse: rule-set source shape, then `payload`/`rules` lists
//! 2. first content line in clash `TYPE,VALUE` form
//! 3. sampled line statistics (CIDR share, then domain share)
//! 4. fallback to clash

use crate::parser::{
    clean_item, content_lines, looks_like_cidr, looks_like_domain, parse_rule_line, Document,
};
use crate::types::{FormatHint, SourceFormat};

/// Maximum number of content lines sampled for line statistics
pub const SAMPLE_LINES: usize = 50;

/// Minimum absolute number of hits for a line-statistics match
pub const MIN_SAMPLE_HITS: usize = 3;

/// Minimum share of sampled lines, in percent, for a line-statistics match
pub const MIN_SAMPLE_PERCENT: usize = 60;

/// Classify raw source text.
pub fn detect(hint: FormatHint, text: &str) -> SourceFormat {
    detect_document(hint, &Document::parse(text), text)
}

/// Classify raw source text using an already parsed document.
pub fn detect_document(hint: FormatHint, doc: &Document, text: &str) -> SourceFormat {
    if let FormatHint::Fixed(format) = hint {
        return format;
    }

    match doc {
        Document::RuleSet(_) => return SourceFormat::SingboxJson,
        Document::Keyed { .. } => return SourceFormat::Clash,
        _ => {}
    }

    let mut lines = content_lines(text).map(clean_item).filter(|l| !l.is_empty());

    if let Some(first) = lines.next() {
        if parse_rule_line(first).is_some() {
            return SourceFormat::Clash;
        }
    }

    let mut sampled = 0usize;
    let mut cidr_hits = 0usize;
    let mut domain_hits = 0usize;

    let sample = content_lines(text)
        .map(clean_item)
        .filter(|l| !l.is_empty())
        .take(SAMPLE_LINES);

    for line in sample {
        sampled += 1;
        if looks_like_cidr(line) {
            cidr_hits += 1;
        } else if looks_like_domain(line) {
            domain_hits += 1;
        }
    }

    if meets_threshold(cidr_hits, sampled) {
        return SourceFormat::IpText;
    }
    if meets_threshold(domain_hits, sampled) {
        return SourceFormat::DomainText;
    }

    SourceFormat::Clash
}

/// `hits >= max(3, 60% of sampled)`
fn meets_threshold(hits: usize, sampled: usize) -> bool {
    hits >= MIN_SAMPLE_HITS && hits * 100 >= sampled * MIN_SAMPLE_PERCENT
}
