//! Text normalisation and edit-distance similarity for record fields.
//!
//! All comparison in the rule catalog happens on normalised text so that
//! "ACME Corp." and "acme corp" compare equal.
//!
//! # Conventions
//!
//! - Base form: lowercase, every non-alphanumeric character becomes a space,
//!   runs of whitespace collapse to one space, ends trimmed.
//! - Names additionally drop trailing legal-entity suffixes ("Inc", "GmbH").
//!   At least one token is always kept.
//! - Addresses additionally drop street-type words and their abbreviations
//!   anywhere in the string ("Street", "St", "Ave").
//! - Phones keep digits only, truncated to the last 10 (national number).

use serde::{Deserialize, Serialize};

use crate::EntityRecord;

/// Legal-entity suffixes removed from the end of normalised names.
pub const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "corp", "corporation", "co", "company", "ltd", "limited", "llc",
    "llp", "lp", "plc", "gmbh", "ag", "sa", "sas", "sarl", "srl", "spa", "bv", "nv", "pty",
    "kg", "oy", "ab", "as", "pte",
];

/// Street-type words removed from normalised addresses.
pub const STREET_TYPES: &[&str] = &[
    "street", "st", "avenue", "ave", "av", "road", "rd", "boulevard", "blvd", "drive", "dr",
    "lane", "ln", "court", "ct", "place", "pl", "way", "highway", "hwy", "parkway", "pkwy",
    "terrace", "ter", "square", "sq", "circle", "cir",
];

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalise a company name and strip trailing legal-entity suffixes.
pub fn normalize_name(s: &str) -> String {
    let base = normalize_text(s);
    let mut tokens: Vec<&str> = base.split(' ').filter(|t| !t.is_empty()).collect();
    while tokens.len() > 1 && tokens.last().is_some_and(|t| LEGAL_SUFFIXES.contains(t)) {
        tokens.pop();
    }
    tokens.join(" ")
}

/// Normalise an address and strip street-type words.
pub fn normalize_address(s: &str) -> String {
    normalize_text(s)
        .split(' ')
        .filter(|t| !t.is_empty() && !STREET_TYPES.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Digits only, last 10 kept so country prefixes don't break equality.
pub fn normalize_phone(s: &str) -> String {
    let digits: Vec<char> = s.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(10);
    digits[start..].iter().collect()
}

/// Identifier (VAT / tax id) comparison form: uppercase alphanumerics only.
pub fn normalize_identifier(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Normalised edit-distance ratio: `1 - levenshtein / max_len`.
///
/// Two empty strings are identical (1.0).
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / max_len as f64
}

/// Leading street number of a normalised address ("123 main" → 123).
pub fn street_number(normalized_address: &str) -> Option<u32> {
    let first = normalized_address.split(' ').next()?;
    let digit_end = first
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(first.len());
    if digit_end == 0 {
        return None;
    }
    first[..digit_end].parse().ok()
}

/// Street name of a normalised address: everything after the leading number.
pub fn street_name(normalized_address: &str) -> &str {
    match normalized_address.split_once(' ') {
        Some((first, rest)) if first.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => normalized_address,
    }
}

/// Whether an address is a post-office box ("PO Box 12", "P.O. Box", "Postbox").
pub fn is_po_box(address: &str) -> bool {
    let text = format!(" {} ", normalize_text(address));
    [" po box ", " p o box ", " post office box ", " pobox ", " postbox "]
        .iter()
        .any(|marker| text.contains(marker))
}

/// Blocking key used to bucket records before pairwise comparison.
///
/// First four characters of the normalised name (or `xxxx`) plus the first
/// character of the normalised city (or `y`).
pub fn block_key(name: Option<&str>, city: Option<&str>) -> String {
    let name = name.map(normalize_text).unwrap_or_default();
    let city = city.map(normalize_text).unwrap_or_default();
    let prefix: String = name.chars().take(4).collect();
    let prefix = if prefix.is_empty() { "xxxx".to_string() } else { prefix };
    let city_initial = city.chars().next().unwrap_or('y');
    format!("{prefix}_{city_initial}")
}

/// Pre-computed normalised forms of the comparison fields of one pair.
///
/// Built once per evaluation and shared by every detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPair {
    pub name1: String,
    pub name2: String,
    /// Names without suffix stripping, to tell suffix variations apart.
    pub raw_name1: String,
    pub raw_name2: String,
    pub address1: String,
    pub address2: String,
    pub raw_address1: String,
    pub raw_address2: String,
    pub city1: String,
    pub city2: String,
    pub phone1: String,
    pub phone2: String,
    pub industry1: String,
    pub industry2: String,
    pub identifier1: String,
    pub identifier2: String,
    pub name_similarity: f64,
    pub address_similarity: f64,
}

impl NormalizedPair {
    pub fn from_records(r1: &EntityRecord, r2: &EntityRecord) -> Self {
        let text = |v: Option<&str>| v.map(normalize_text).unwrap_or_default();
        let name1 = r1.name().map(normalize_name).unwrap_or_default();
        let name2 = r2.name().map(normalize_name).unwrap_or_default();
        let address1 = r1.address().map(normalize_address).unwrap_or_default();
        let address2 = r2.address().map(normalize_address).unwrap_or_default();
        let name_similarity = similarity(&name1, &name2);
        let address_similarity = similarity(&address1, &address2);

        Self {
            raw_name1: text(r1.name()),
            raw_name2: text(r2.name()),
            raw_address1: text(r1.address()),
            raw_address2: text(r2.address()),
            city1: text(r1.city()),
            city2: text(r2.city()),
            phone1: r1.phone().map(normalize_phone).unwrap_or_default(),
            phone2: r2.phone().map(normalize_phone).unwrap_or_default(),
            industry1: text(r1.industry()),
            industry2: text(r2.industry()),
            identifier1: r1.identifier().map(normalize_identifier).unwrap_or_default(),
            identifier2: r2.identifier().map(normalize_identifier).unwrap_or_default(),
            name1,
            name2,
            address1,
            address2,
            name_similarity,
            address_similarity,
        }
    }

    /// Addresses are the same location: both present, equal or ≥ `threshold` similar.
    pub fn same_address(&self, threshold: f64) -> bool {
        !self.address1.is_empty()
            && !self.address2.is_empty()
            && (self.address1 == self.address2 || self.address_similarity >= threshold)
    }

    pub fn same_city(&self) -> bool {
        self.city1 == self.city2
    }

    pub fn same_phone(&self) -> bool {
        !self.phone1.is_empty() && self.phone1 == self.phone2
    }
}
