//! Heuristic rule catalog.
//!
//! Each [`Detector`] is an independent, stateless check over one record pair
//! and its [`NormalizedPair`]. A detector either stays silent or emits one
//! [`RuleResult`]. The catalog runs every enabled detector, in priority order,
//! and returns all verdicts; combining them is the synthesis engine's job.
//!
//! Detectors read their vocabularies and thresholds from
//! [`RuleConfiguration`], so business users can tune keywords without code
//! changes. Regex patterns are compiled once when the [`Catalog`] is built.

use mergewise_core::normalize::{self, LEGAL_SUFFIXES};
use mergewise_core::{
    CatalogConfig, ConfidenceBand, ConfigError, EntityRecord, NormalizedPair, Recommendation,
    RuleConfiguration, RuleResult, RuleType,
};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("rule {rule}: invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        source: regex::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Parent-company indicators used by the joint-venture detector.
pub const PARENT_INDICATORS: &[&str] = &["corp", "group", "holdings", "international", "global"];

/// Words that mark a name as a business rather than a person.
const BUSINESS_WORDS: &[&str] = &[
    "group", "holdings", "international", "global", "services", "service", "solutions",
    "systems", "industries", "industrial", "manufacturing", "chemical", "chemicals", "trading",
    "logistics", "partners", "associates", "consulting", "technologies", "technology", "tech",
    "energy", "foods", "motors", "bank", "hotel", "store", "stores", "supply", "supplies",
    "enterprises", "express", "freight", "shipping", "labs", "laboratories", "pharma",
    "construction", "electric", "engineering", "insurance", "capital", "media", "software",
    "traders", "pharmaceutical", "pharmaceuticals", "products", "widgets", "works",
];

const PO_BOX_PATTERN: &str =
    r"(?i)\b(?:p\.?\s*o\.?\s*box|post\s+office\s+box|postbox|pobox)\b";

const PERSON_NAME_PATTERN: &str =
    r"^[A-Z][a-z]+(?:\s+[A-Z]\.?)?(?:\s+[A-Z][a-z]+(?:-[A-Z][a-z]+)?){1,2}$";

const TEST_WORD_PATTERN: &str = r"(?i)\b(?:test|dummy|sample|demo|fake)\b";

/// Alternation of runs of each character, e.g. `(?:0{4,}|1{4,})`.
fn repeated_run_pattern(chars: impl Iterator<Item = char>, min: usize) -> String {
    let alts: Vec<String> = chars.map(|c| format!("{c}{{{min},}}")).collect();
    format!("(?:{})", alts.join("|"))
}

/// Normalised `text` contains `phrase` as a whole token sequence.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let phrase = normalize::normalize_text(phrase);
    if phrase.is_empty() || text.is_empty() {
        return false;
    }
    format!(" {text} ").contains(&format!(" {phrase} "))
}

fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| contains_phrase(text, k))
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(' ').filter(|t| !t.is_empty())
}

// ── Detector identity ──

/// Every detector in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Detector {
    GeographicSameAddress,
    PoBoxVsStreet,
    AdjacentAddress,
    JointVenture,
    HierarchyDivision,
    MultiIndustry,
    DataQuality,
    FreightForwarder,
    TestAccount,
    ContactVsCustomer,
    Acquisition,
    DropShip,
    NameVariation,
    AddressVariation,
    PhoneMatch,
    IdentifierMatch,
}

impl Detector {
    pub const ALL: [Detector; 16] = [
        Self::GeographicSameAddress,
        Self::PoBoxVsStreet,
        Self::AdjacentAddress,
        Self::JointVenture,
        Self::HierarchyDivision,
        Self::MultiIndustry,
        Self::DataQuality,
        Self::FreightForwarder,
        Self::TestAccount,
        Self::ContactVsCustomer,
        Self::Acquisition,
        Self::DropShip,
        Self::NameVariation,
        Self::AddressVariation,
        Self::PhoneMatch,
        Self::IdentifierMatch,
    ];

    /// Configuration key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::GeographicSameAddress => "geographic_same_address",
            Self::PoBoxVsStreet => "po_box_vs_street",
            Self::AdjacentAddress => "adjacent_address",
            Self::JointVenture => "joint_venture",
            Self::HierarchyDivision => "hierarchy_division",
            Self::MultiIndustry => "multi_industry",
            Self::DataQuality => "data_quality",
            Self::FreightForwarder => "freight_forwarder",
            Self::TestAccount => "test_account",
            Self::ContactVsCustomer => "contact_vs_customer",
            Self::Acquisition => "acquisition",
            Self::DropShip => "drop_ship",
            Self::NameVariation => "name_variation",
            Self::AddressVariation => "address_variation",
            Self::PhoneMatch => "phone_match",
            Self::IdentifierMatch => "identifier_match",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.key() == key)
    }

    /// Human-readable rule name carried on verdicts.
    pub fn rule_name(&self) -> &'static str {
        match self {
            Self::GeographicSameAddress => "Geographic Same Address",
            Self::PoBoxVsStreet => "PO Box vs Street Address",
            Self::AdjacentAddress => "Adjacent Address",
            Self::JointVenture => "Joint Venture",
            Self::HierarchyDivision => "Hierarchy / Division",
            Self::MultiIndustry => "Multi-Industry Business",
            Self::DataQuality => "Data Quality",
            Self::FreightForwarder => "Freight Forwarder",
            Self::TestAccount => "Test Account",
            Self::ContactVsCustomer => "Contact vs Customer",
            Self::Acquisition => "Acquisition",
            Self::DropShip => "Drop-Ship Address",
            Self::NameVariation => "Name Variation",
            Self::AddressVariation => "Address Variation",
            Self::PhoneMatch => "Phone Match",
            Self::IdentifierMatch => "Tax Identifier",
        }
    }

    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::GeographicSameAddress | Self::PoBoxVsStreet | Self::AdjacentAddress => {
                RuleType::Geographic
            }
            Self::JointVenture | Self::Acquisition | Self::DropShip => {
                RuleType::BusinessRelationship
            }
            Self::HierarchyDivision => RuleType::Hierarchy,
            Self::MultiIndustry | Self::FreightForwarder => RuleType::BusinessType,
            Self::DataQuality | Self::TestAccount => RuleType::DataQuality,
            Self::ContactVsCustomer => RuleType::EntityType,
            Self::NameVariation => RuleType::NameVariation,
            Self::AddressVariation => RuleType::AddressVariation,
            Self::PhoneMatch => RuleType::Communication,
            Self::IdentifierMatch => RuleType::Identifier,
        }
    }

    /// Built-in configuration.
    pub fn default_config(&self) -> RuleConfiguration {
        match self {
            Self::GeographicSameAddress => RuleConfiguration::new(8)
                .threshold("address_similarity", 0.85)
                .threshold("name_similarity", 0.7)
                .exemption("Different businesses can legitimately share a building or site")
                .justification("Shared location"),
            Self::PoBoxVsStreet => RuleConfiguration::new(6)
                .patterns(&[PO_BOX_PATTERN])
                .justification("One record uses a PO box, the other a street address"),
            Self::AdjacentAddress => RuleConfiguration::new(5)
                .threshold("max_number_gap", 2.0)
                .justification("Neighbouring street numbers on the same street"),
            Self::JointVenture => RuleConfiguration::new(9)
                .keywords(&["joint venture", "jv", "consortium", "partnership"])
                .exemption("Joint ventures are separate legal entities from their parent companies")
                .justification("Joint venture with a shared parent"),
            Self::HierarchyDivision => RuleConfiguration::new(8)
                .keywords(&[
                    "division", "subsidiary", "branch", "dept", "department", "business unit",
                    "affiliate", "regional office",
                ])
                .exemption("Divisions and subsidiaries are often managed as separate accounts")
                .justification("Corporate hierarchy"),
            Self::MultiIndustry => RuleConfiguration::new(6)
                .threshold("name_similarity", 0.8)
                .exemption("The same group can operate distinct businesses in different industries")
                .justification("Similar names in different industries"),
            Self::DataQuality => RuleConfiguration::new(7)
                .justification("Incomplete records limit match confidence"),
            Self::FreightForwarder => RuleConfiguration::new(10)
                .keywords(&[
                    "freight", "logistics", "forwarding", "forwarder", "shipping", "cargo", "dhl",
                    "fedex", "ups", "kuehne nagel", "schenker", "expeditors", "ch robinson",
                ])
                .justification("Freight forwarders ship on behalf of many customers"),
            Self::TestAccount => RuleConfiguration::new(10)
                .patterns(&[
                    TEST_WORD_PATTERN,
                    &repeated_run_pattern('0'..='9', 4),
                    &format!(r"(?i)\b{}\b", repeated_run_pattern('a'..='z', 4)),
                ])
                .justification("Non-production test data"),
            Self::ContactVsCustomer => RuleConfiguration::new(7)
                .threshold("name_similarity", 0.8)
                .keywords(&["mr", "mrs", "ms", "miss", "dr", "prof", "sir", "madam"])
                .patterns(&[PERSON_NAME_PATTERN])
                .justification("Person contact recorded as a customer"),
            Self::Acquisition => RuleConfiguration::new(7)
                .threshold("address_similarity", 0.85)
                .threshold("name_similarity", 0.6)
                .justification("Shared premises and phone under a different name suggest an acquisition or rebrand"),
            Self::DropShip => RuleConfiguration::new(6)
                .keywords(&["c o", "care of", "attn", "attention", "drop ship", "dropship", "ship to"])
                .justification("Drop-ship or care-of address"),
            Self::NameVariation => RuleConfiguration::new(5)
                .justification("Names differ only by legal-entity suffix"),
            Self::AddressVariation => RuleConfiguration::new(5)
                .justification("Addresses differ only by street-type abbreviation"),
            Self::PhoneMatch => RuleConfiguration::new(4)
                .threshold("name_similarity", 0.6)
                .justification("Same phone number"),
            Self::IdentifierMatch => RuleConfiguration::new(9)
                .exemption("Different tax registrations indicate separate legal entities")
                .justification("Tax identifier comparison"),
        }
    }
}

/// Built-in configuration for the whole catalog, in declaration order.
pub fn default_catalog_config() -> CatalogConfig {
    CatalogConfig::from_rules(
        Detector::ALL
            .into_iter()
            .map(|d| (d.key().to_string(), d.default_config()))
            .collect(),
    )
}

// ── Compiled catalog ──

/// A detector bound to its configuration snapshot and compiled patterns.
#[derive(Debug, Clone)]
pub struct CatalogRule {
    pub detector: Detector,
    pub config: RuleConfiguration,
    patterns: Vec<Regex>,
}

impl CatalogRule {
    fn compile(detector: Detector, config: &RuleConfiguration) -> Result<Self, CatalogError> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| CatalogError::InvalidPattern {
                    rule: detector.key().to_string(),
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            detector,
            config: config.clone(),
            patterns,
        })
    }

    fn matches_any(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }

    fn result(
        &self,
        confidence: ConfidenceBand,
        score: f64,
        recommendation: Recommendation,
        reasoning: impl Into<String>,
    ) -> RuleResult {
        RuleResult::new(
            self.detector.rule_type(),
            self.detector.rule_name(),
            confidence,
            score,
            recommendation,
            reasoning,
        )
        .with_justification(self.config.business_justification.clone())
        .adjusted(self.config.confidence_adjustment)
    }

    fn exemption(&self) -> String {
        self.config.exemption_message.clone().unwrap_or_default()
    }

    /// Run this detector against one pair.
    pub fn detect(
        &self,
        r1: &EntityRecord,
        r2: &EntityRecord,
        pair: &NormalizedPair,
    ) -> Option<RuleResult> {
        match self.detector {
            Detector::GeographicSameAddress => self.geographic_same_address(pair),
            Detector::PoBoxVsStreet => self.po_box_vs_street(r1, r2, pair),
            Detector::AdjacentAddress => self.adjacent_address(pair),
            Detector::JointVenture => self.joint_venture(pair),
            Detector::HierarchyDivision => self.hierarchy_division(pair),
            Detector::MultiIndustry => self.multi_industry(pair),
            Detector::DataQuality => self.data_quality(r1, r2),
            Detector::FreightForwarder => self.freight_forwarder(pair),
            Detector::TestAccount => self.test_account(r1, r2),
            Detector::ContactVsCustomer => self.contact_vs_customer(r1, r2, pair),
            Detector::Acquisition => self.acquisition(pair),
            Detector::DropShip => self.drop_ship(pair),
            Detector::NameVariation => self.name_variation(pair),
            Detector::AddressVariation => self.address_variation(pair),
            Detector::PhoneMatch => self.phone_match(pair),
            Detector::IdentifierMatch => self.identifier_match(pair),
        }
    }

    // ── Geography ──

    fn geographic_same_address(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        let address_threshold = self.config.threshold_or("address_similarity", 0.85);
        let name_threshold = self.config.threshold_or("name_similarity", 0.7);
        if !pair.same_address(address_threshold) || !pair.same_city() {
            return None;
        }
        let both_named = !pair.name1.is_empty() && !pair.name2.is_empty();
        if both_named && pair.name_similarity > name_threshold {
            Some(self.result(
                ConfidenceBand::High,
                90.0,
                Recommendation::Merge,
                format!(
                    "Same address and similar names ({:.0}% name similarity): same entity, strong match",
                    pair.name_similarity * 100.0
                ),
            ))
        } else {
            Some(
                self.result(
                    ConfidenceBand::Low,
                    20.0,
                    Recommendation::Review,
                    format!(
                        "Shared location, different entities ({:.0}% name similarity)",
                        pair.name_similarity * 100.0
                    ),
                )
                .with_exemption(self.exemption()),
            )
        }
    }

    fn po_box_vs_street(
        &self,
        r1: &EntityRecord,
        r2: &EntityRecord,
        pair: &NormalizedPair,
    ) -> Option<RuleResult> {
        let (a1, a2) = (r1.address()?, r2.address()?);
        let box1 = self.matches_any(a1);
        let box2 = self.matches_any(a2);
        if box1 == box2 || !pair.same_city() {
            return None;
        }
        Some(self.result(
            ConfidenceBand::Medium,
            60.0,
            Recommendation::Review,
            "One address is a PO box and the other a street address in the same city",
        ))
    }

    fn adjacent_address(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        if pair.address1.is_empty() || pair.address1 == pair.address2 {
            return None;
        }
        let max_gap = self.config.threshold_or("max_number_gap", 2.0) as u32;
        let street1 = normalize::street_name(&pair.address1);
        let street2 = normalize::street_name(&pair.address2);
        if street1.is_empty() || street1 != street2 {
            return None;
        }
        let n1 = normalize::street_number(&pair.address1)?;
        let n2 = normalize::street_number(&pair.address2)?;
        let gap = n1.abs_diff(n2);
        if !(1..=max_gap).contains(&gap) {
            return None;
        }
        Some(self.result(
            ConfidenceBand::Low,
            30.0,
            Recommendation::Review,
            format!("Adjacent addresses on {street1} ({n1} vs {n2})"),
        ))
    }

    // ── Business structure ──

    fn joint_venture(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        let has_jv = contains_any(&pair.raw_name1, &self.config.keywords)
            || contains_any(&pair.raw_name2, &self.config.keywords);
        if !has_jv {
            return None;
        }
        let shared_parent = tokens(&pair.raw_name1)
            .filter(|t| PARENT_INDICATORS.contains(t))
            .find(|t| tokens(&pair.raw_name2).any(|u| u == *t))?;
        Some(
            self.result(
                ConfidenceBand::Low,
                25.0,
                Recommendation::Review,
                format!("Joint venture naming with shared parent indicator '{shared_parent}'"),
            )
            .with_exemption(self.exemption()),
        )
    }

    fn hierarchy_division(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        let hit = self
            .config
            .keywords
            .iter()
            .find(|k| contains_phrase(&pair.raw_name1, k) || contains_phrase(&pair.raw_name2, k))?;
        Some(
            self.result(
                ConfidenceBand::Medium,
                40.0,
                Recommendation::Review,
                format!("Name indicates a division or subsidiary ('{hit}')"),
            )
            .with_exemption(self.exemption()),
        )
    }

    fn multi_industry(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        let threshold = self.config.threshold_or("name_similarity", 0.8);
        if pair.industry1.is_empty()
            || pair.industry2.is_empty()
            || pair.industry1 == pair.industry2
            || pair.name_similarity <= threshold
        {
            return None;
        }
        Some(
            self.result(
                ConfidenceBand::Medium,
                70.0,
                Recommendation::Review,
                format!(
                    "Similar names in different industries ({} vs {})",
                    pair.industry1, pair.industry2
                ),
            )
            .with_exemption(self.exemption()),
        )
    }

    fn freight_forwarder(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        let hit = self
            .config
            .keywords
            .iter()
            .find(|k| contains_phrase(&pair.raw_name1, k) || contains_phrase(&pair.raw_name2, k))?;
        Some(
            self.result(
                ConfidenceBand::Low,
                25.0,
                Recommendation::Flag,
                format!("Freight or logistics company ('{hit}') ships for many customers"),
            )
            .with_flag("freight_forwarder"),
        )
    }

    fn acquisition(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        let address_threshold = self.config.threshold_or("address_similarity", 0.85);
        let name_threshold = self.config.threshold_or("name_similarity", 0.6);
        if !pair.same_address(address_threshold)
            || !pair.same_phone()
            || pair.name_similarity >= name_threshold
        {
            return None;
        }
        Some(self.result(
            ConfidenceBand::Medium,
            65.0,
            Recommendation::Review,
            "Same address and phone under a different name",
        ))
    }

    fn drop_ship(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        let hit = self.config.keywords.iter().find(|k| {
            contains_phrase(&pair.raw_address1, k) || contains_phrase(&pair.raw_address2, k)
        })?;
        Some(
            self.result(
                ConfidenceBand::Low,
                30.0,
                Recommendation::Review,
                format!("Address carries a drop-ship or care-of indicator ('{hit}')"),
            )
            .with_flag("drop_ship_address"),
        )
    }

    // ── Record type ──

    fn data_quality(&self, r1: &EntityRecord, r2: &EntityRecord) -> Option<RuleResult> {
        let mut flags = Vec::new();
        for (side, record) in [("record1", r1), ("record2", r2)] {
            if record.name().is_none() {
                flags.push(format!("missing_name:{side}"));
            }
            if record.address().is_none() {
                flags.push(format!("missing_address:{side}"));
            }
        }
        if flags.is_empty() {
            return None;
        }
        let reasoning = format!("Incomplete records: {}", flags.join(", "));
        let mut result = self.result(ConfidenceBand::Low, 35.0, Recommendation::Review, reasoning);
        result.flags = flags;
        Some(result)
    }

    fn test_account(&self, r1: &EntityRecord, r2: &EntityRecord) -> Option<RuleResult> {
        let name = [r1.name(), r2.name()]
            .into_iter()
            .flatten()
            .find(|n| self.matches_any(n))?;
        Some(
            self.result(
                ConfidenceBand::Low,
                5.0,
                Recommendation::Flag,
                format!("'{name}' matches test-data patterns"),
            )
            .with_flag("test_data"),
        )
    }

    fn contact_vs_customer(
        &self,
        r1: &EntityRecord,
        r2: &EntityRecord,
        pair: &NormalizedPair,
    ) -> Option<RuleResult> {
        // Two spellings of one name are one party, not a contact and an account.
        let same_name = pair.name1 == pair.name2
            || pair.name_similarity >= self.config.threshold_or("name_similarity", 0.8);
        if !pair.name1.is_empty() && !pair.name2.is_empty() && same_name {
            return None;
        }
        let looks_like_person = |raw: Option<&str>, normalized: &str| {
            let Some(raw) = raw else { return false };
            if tokens(normalized).any(|t| BUSINESS_WORDS.contains(&t) || LEGAL_SUFFIXES.contains(&t)) {
                return false;
            }
            let titled = tokens(normalized).any(|t| self.config.keywords.iter().any(|k| k == t));
            titled || self.matches_any(raw.trim())
        };
        let name = if looks_like_person(r1.name(), &pair.raw_name1) {
            r1.name()?
        } else if looks_like_person(r2.name(), &pair.raw_name2) {
            r2.name()?
        } else {
            return None;
        };
        Some(
            self.result(
                ConfidenceBand::Low,
                20.0,
                Recommendation::Flag,
                format!("'{name}' looks like a person contact, not a customer account"),
            )
            .with_flag("person_contact"),
        )
    }

    // ── Field variations ──

    fn name_variation(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        if pair.name1.is_empty() || pair.raw_name1 == pair.raw_name2 || pair.name1 != pair.name2 {
            return None;
        }
        Some(self.result(
            ConfidenceBand::High,
            85.0,
            Recommendation::Merge,
            format!(
                "'{}' and '{}' differ only by legal-entity suffix",
                pair.raw_name1, pair.raw_name2
            ),
        ))
    }

    fn address_variation(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        if pair.address1.is_empty()
            || pair.raw_address1 == pair.raw_address2
            || pair.address1 != pair.address2
        {
            return None;
        }
        Some(self.result(
            ConfidenceBand::High,
            80.0,
            Recommendation::Merge,
            "Addresses differ only by street-type abbreviation",
        ))
    }

    fn phone_match(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        let threshold = self.config.threshold_or("name_similarity", 0.6);
        if !pair.same_phone() || pair.name_similarity < threshold {
            return None;
        }
        Some(self.result(
            ConfidenceBand::High,
            80.0,
            Recommendation::Merge,
            "Same phone number and similar names",
        ))
    }

    fn identifier_match(&self, pair: &NormalizedPair) -> Option<RuleResult> {
        if pair.identifier1.is_empty() || pair.identifier2.is_empty() {
            return None;
        }
        if pair.identifier1 == pair.identifier2 {
            Some(self.result(
                ConfidenceBand::High,
                95.0,
                Recommendation::Merge,
                "Identical tax identifiers",
            ))
        } else {
            Some(
                self.result(
                    ConfidenceBand::Medium,
                    40.0,
                    Recommendation::Review,
                    format!(
                        "Different tax identifiers ({} vs {})",
                        pair.identifier1, pair.identifier2
                    ),
                )
                .with_exemption(self.exemption()),
            )
        }
    }
}

/// The enabled detectors of one configuration snapshot, in priority order.
#[derive(Debug, Clone)]
pub struct Catalog {
    rules: Vec<CatalogRule>,
}

impl Catalog {
    /// Compile a configuration snapshot. Unknown keys are ignored.
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let mut rules = Vec::new();
        for (key, rule_config) in config.active() {
            let Some(detector) = Detector::from_key(key) else {
                tracing::warn!(key, "ignoring configuration for unknown detector");
                continue;
            };
            rule_config.validate()?;
            rules.push(CatalogRule::compile(detector, rule_config)?);
        }
        Ok(Self { rules })
    }

    pub fn with_defaults() -> Result<Self, CatalogError> {
        Self::new(&default_catalog_config())
    }

    pub fn rules(&self) -> &[CatalogRule] {
        &self.rules
    }

    /// All verdicts triggered by the pair. Order follows detector priority,
    /// but callers must treat the result as a set.
    pub fn evaluate(&self, r1: &EntityRecord, r2: &EntityRecord) -> Vec<RuleResult> {
        let pair = NormalizedPair::from_records(r1, r2);
        self.evaluate_normalized(r1, r2, &pair)
    }

    pub fn evaluate_normalized(
        &self,
        r1: &EntityRecord,
        r2: &EntityRecord,
        pair: &NormalizedPair,
    ) -> Vec<RuleResult> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let result = rule.detect(r1, r2, pair)?;
                debug!(
                    rule = rule.detector.key(),
                    score = result.confidence_score,
                    recommendation = %result.recommendation,
                    "detector fired"
                );
                Some(result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergewise_core::RulePatch;

    fn catalog() -> Catalog {
        Catalog::with_defaults().unwrap()
    }

    fn fired(r1: &EntityRecord, r2: &EntityRecord) -> Vec<RuleResult> {
        catalog().evaluate(r1, r2)
    }

    fn find<'a>(results: &'a [RuleResult], detector: Detector) -> Option<&'a RuleResult> {
        results.iter().find(|r| r.rule_name == detector.rule_name())
    }

    #[test]
    fn default_patterns_compile() {
        assert_eq!(catalog().rules().len(), Detector::ALL.len());
    }

    #[test]
    fn keys_round_trip() {
        for d in Detector::ALL {
            assert_eq!(Detector::from_key(d.key()), Some(d));
        }
    }

    #[test]
    fn same_address_similar_names_merge() {
        let r1 = EntityRecord::company("Acme Corporation", "123 Main Street", "New York");
        let r2 = EntityRecord::company("ACME Corp", "123 Main St", "New York");
        let results = fired(&r1, &r2);
        let geo = find(&results, Detector::GeographicSameAddress).unwrap();
        assert_eq!(geo.recommendation, Recommendation::Merge);
        assert_eq!(geo.confidence, ConfidenceBand::High);
        assert_eq!(geo.confidence_score, 90.0);
        assert!(find(&results, Detector::NameVariation).is_some());
        assert!(find(&results, Detector::AddressVariation).is_some());
        assert!(find(&results, Detector::AdjacentAddress).is_none());
        assert!(find(&results, Detector::ContactVsCustomer).is_none());
    }

    #[test]
    fn normalized_equal_pairs_always_geographic_merge() {
        let pairs = [
            ("Globex", "1 High Road", "Leeds"),
            ("Initech LLC", "400 Elm Ave", "Austin"),
            ("Umbrella Group", "9 Rue Royale", "Paris"),
        ];
        for (name, address, city) in pairs {
            let r1 = EntityRecord::company(name, address, city);
            let r2 = EntityRecord::company(&name.to_uppercase(), &format!("{address}."), city);
            let results = fired(&r1, &r2);
            let geo = find(&results, Detector::GeographicSameAddress).unwrap();
            assert_eq!(
                (geo.recommendation, geo.confidence, geo.confidence_score),
                (Recommendation::Merge, ConfidenceBand::High, 90.0),
                "{name}"
            );
        }
    }

    #[test]
    fn shared_location_different_names_review_with_exemption() {
        let r1 = EntityRecord::company("Globex", "500 Tower Plaza", "Chicago");
        let r2 = EntityRecord::company("Initrode Software", "500 Tower Plaza", "Chicago");
        let results = fired(&r1, &r2);
        let geo = find(&results, Detector::GeographicSameAddress).unwrap();
        assert_eq!(geo.recommendation, Recommendation::Review);
        assert_eq!(geo.confidence_score, 20.0);
        assert!(geo.exemption_reason.is_some());
    }

    #[test]
    fn unnamed_records_at_one_address_are_not_merged() {
        let r1 = EntityRecord::new().with("address", "12 Mill Lane").with("city", "Leeds");
        let r2 = EntityRecord::new().with("address", "12 Mill Lane").with("city", "Leeds");
        let results = fired(&r1, &r2);
        let geo = find(&results, Detector::GeographicSameAddress).unwrap();
        assert_eq!(geo.recommendation, Recommendation::Review);
        assert_ne!(geo.confidence_score, 90.0);
        assert!(find(&results, Detector::DataQuality).is_some());
    }

    #[test]
    fn different_city_is_not_same_address() {
        let r1 = EntityRecord::company("Globex", "1 Main St", "Springfield");
        let r2 = EntityRecord::company("Globex", "1 Main St", "Shelbyville");
        assert!(find(&fired(&r1, &r2), Detector::GeographicSameAddress).is_none());
    }

    #[test]
    fn po_box_vs_street_same_city() {
        let r1 = EntityRecord::company("Globex", "P.O. Box 1234", "Denver");
        let r2 = EntityRecord::company("Globex", "77 Market Street", "Denver");
        let results = fired(&r1, &r2);
        let po = find(&results, Detector::PoBoxVsStreet).unwrap();
        assert_eq!(po.confidence_score, 60.0);
        assert_eq!(po.confidence, ConfidenceBand::Medium);

        let both = EntityRecord::company("Globex", "PO Box 99", "Denver");
        assert!(find(&fired(&r1, &both), Detector::PoBoxVsStreet).is_none());
    }

    #[test]
    fn adjacency_excludes_identical_addresses() {
        let r1 = EntityRecord::company("Globex", "100 Main Street", "Austin");
        let r2 = EntityRecord::company("Hooli", "102 Main St", "Austin");
        let adj = find(&fired(&r1, &r2), Detector::AdjacentAddress).cloned().unwrap();
        assert_eq!(adj.confidence_score, 30.0);

        let same = EntityRecord::company("Hooli", "100 Main St", "Austin");
        assert!(find(&fired(&r1, &same), Detector::AdjacentAddress).is_none());

        let far = EntityRecord::company("Hooli", "105 Main St", "Austin");
        assert!(find(&fired(&r1, &far), Detector::AdjacentAddress).is_none());
    }

    #[test]
    fn joint_venture_needs_shared_parent_indicator() {
        let r1 = EntityRecord::company("Shell Chevron Joint Venture Group", "1 Bay Rd", "Perth");
        let r2 = EntityRecord::company("Chevron Group", "8 Hay St", "Perth");
        let jv = find(&fired(&r1, &r2), Detector::JointVenture).cloned().unwrap();
        assert_eq!(jv.confidence_score, 25.0);
        assert!(jv.exemption_reason.is_some());

        let r3 = EntityRecord::company("Chevron Energy", "8 Hay St", "Perth");
        assert!(find(&fired(&r1, &r3), Detector::JointVenture).is_none());
    }

    #[test]
    fn division_keyword() {
        let r1 = EntityRecord::company("BP Chemicals Division", "1 Dock Rd", "Hull");
        let r2 = EntityRecord::company("BP", "1 Dock Rd", "Hull");
        let h = find(&fired(&r1, &r2), Detector::HierarchyDivision).cloned().unwrap();
        assert_eq!(h.confidence, ConfidenceBand::Medium);
        assert_eq!(h.confidence_score, 40.0);
    }

    #[test]
    fn multi_industry_requires_similar_names() {
        let r1 = EntityRecord::company("Siemens Energy", "1 A St", "Berlin").with("industry", "2911");
        let r2 = EntityRecord::company("Siemens Energy", "9 B St", "Munich").with("industry", "3511");
        let m = find(&fired(&r1, &r2), Detector::MultiIndustry).cloned().unwrap();
        assert_eq!(m.confidence_score, 70.0);

        let r3 = EntityRecord::company("Bosch", "9 B St", "Munich").with("industry", "3511");
        assert!(find(&fired(&r1, &r3), Detector::MultiIndustry).is_none());
    }

    #[test]
    fn missing_fields_flagged_as_data_quality() {
        let r1 = EntityRecord::new().with("name", "Globex");
        let r2 = EntityRecord::company("Globex", "1 Main St", "Austin");
        let dq = find(&fired(&r1, &r2), Detector::DataQuality).cloned().unwrap();
        assert_eq!(dq.confidence_score, 35.0);
        assert_eq!(dq.flags, vec!["missing_address:record1".to_string()]);
    }

    #[test]
    fn freight_keyword_flags() {
        let r1 = EntityRecord::company("DHL Express", "123 Industrial Way", "Houston");
        let r2 = EntityRecord::company("Acme Chemical Manufacturing", "123 Industrial Way", "Houston");
        let results = fired(&r1, &r2);
        let f = find(&results, Detector::FreightForwarder).unwrap();
        assert_eq!(f.recommendation, Recommendation::Flag);
        assert_eq!(f.confidence_score, 25.0);
        assert!(find(&results, Detector::ContactVsCustomer).is_none());
    }

    #[test]
    fn test_patterns() {
        let other = EntityRecord::company("Globex", "1 Main St", "Austin");
        for name in ["TEST Company 111111", "Dummy Account", "zzzz", "Demo Co"] {
            let r = EntityRecord::company(name, "1 Main St", "Austin");
            let t = find(&fired(&r, &other), Detector::TestAccount).cloned();
            assert_eq!(t.map(|t| t.confidence_score), Some(5.0), "{name}");
        }
        let r = EntityRecord::company("Acme Testing Services", "1 Main St", "Austin");
        assert!(find(&fired(&r, &other), Detector::TestAccount).is_none());
        let r = EntityRecord::company("AAA Towing", "1 Main St", "Austin");
        assert!(find(&fired(&r, &other), Detector::TestAccount).is_none());
    }

    #[test]
    fn person_contacts() {
        let other = EntityRecord::company("Globex Holdings", "1 Main St", "Austin");
        for name in ["John Smith", "Dr. Jane Doe", "Mrs Patel", "Mary J. Watson"] {
            let r = EntityRecord::company(name, "1 Main St", "Austin");
            assert!(
                find(&fired(&r, &other), Detector::ContactVsCustomer).is_some(),
                "{name}"
            );
        }
        for name in ["Acme Corporation", "Smith Logistics", "GLOBEX", "Northwind Traders"] {
            let r = EntityRecord::company(name, "1 Main St", "Austin");
            assert!(
                find(&fired(&r, &other), Detector::ContactVsCustomer).is_none(),
                "{name}"
            );
        }
    }

    #[test]
    fn company_name_variants_are_not_person_contacts() {
        let pairs = [
            ("Acme Widgets", "Acme Widgets Inc"),
            ("Northwind Traders", "Northwind Traders Ltd"),
            ("Contoso Pharmaceuticals", "Contoso Pharmaceuticals LLC"),
            ("Fabrikam Brewing", "Fabrikam Brewing Co"),
        ];
        for (n1, n2) in pairs {
            let r1 = EntityRecord::company(n1, "1 Main St", "Austin");
            let r2 = EntityRecord::company(n2, "1 Main St", "Austin");
            assert!(
                find(&fired(&r1, &r2), Detector::ContactVsCustomer).is_none(),
                "{n1} / {n2}"
            );
        }
        // A titled contact against a different account still fires.
        let r1 = EntityRecord::company("Dr John Smith", "1 Main St", "Austin");
        let r2 = EntityRecord::company("Acme Corp", "1 Main St", "Austin");
        assert!(find(&fired(&r1, &r2), Detector::ContactVsCustomer).is_some());
    }

    #[test]
    fn acquisition_same_premises_and_phone() {
        let r1 = EntityRecord::company("Northwind Traders", "5 Quay St", "Bristol")
            .with("phone", "+44 117 496 0000");
        let r2 = EntityRecord::company("Contoso", "5 Quay Street", "Bristol")
            .with("phone", "0117 496 0000");
        let results = fired(&r1, &r2);
        let a = find(&results, Detector::Acquisition).unwrap();
        assert_eq!(a.confidence_score, 65.0);
        assert!(find(&results, Detector::PhoneMatch).is_none());
    }

    #[test]
    fn drop_ship_indicator() {
        let r1 = EntityRecord::company("Globex", "c/o Warehouse 9, 1 Dock Rd", "Austin");
        let r2 = EntityRecord::company("Globex", "1 Main St", "Austin");
        let d = find(&fired(&r1, &r2), Detector::DropShip).cloned().unwrap();
        assert_eq!(d.confidence_score, 30.0);
        assert_eq!(d.flags, vec!["drop_ship_address".to_string()]);
    }

    #[test]
    fn identifier_mismatch_carries_exemption() {
        let r1 = EntityRecord::company("Globex", "1 Main St", "Austin").with("vat", "GB 123 456");
        let r2 = EntityRecord::company("Globex", "1 Main St", "Austin").with("vat", "GB999999");
        let id = find(&fired(&r1, &r2), Detector::IdentifierMatch).cloned().unwrap();
        assert_eq!(id.recommendation, Recommendation::Review);
        assert!(id.exemption_reason.is_some());

        let r3 = EntityRecord::company("Globex", "1 Main St", "Austin").with("vat", "gb123456");
        let id = find(&fired(&r1, &r3), Detector::IdentifierMatch).cloned().unwrap();
        assert_eq!(id.confidence_score, 95.0);
    }

    #[test]
    fn disabled_detector_is_silent() {
        let cfg = default_catalog_config().disable("freight_forwarder").unwrap();
        let catalog = Catalog::new(&cfg).unwrap();
        let r1 = EntityRecord::company("DHL Express", "1 Main St", "Austin");
        let r2 = EntityRecord::company("Globex", "9 Side St", "Austin");
        let results = catalog.evaluate(&r1, &r2);
        assert!(find(&results, Detector::FreightForwarder).is_none());
    }

    #[test]
    fn confidence_adjustment_applies() {
        let cfg = default_catalog_config()
            .with_update(
                "freight_forwarder",
                &RulePatch {
                    confidence_adjustment: Some(-20),
                    ..Default::default()
                },
            )
            .unwrap();
        let catalog = Catalog::new(&cfg).unwrap();
        let r1 = EntityRecord::company("DHL Express", "1 Main St", "Austin");
        let r2 = EntityRecord::company("Globex", "9 Side St", "Austin");
        let results = catalog.evaluate(&r1, &r2);
        assert_eq!(
            find(&results, Detector::FreightForwarder).unwrap().confidence_score,
            5.0
        );
    }

    #[test]
    fn invalid_pattern_rejected() {
        let cfg = default_catalog_config()
            .with_update(
                "test_account",
                &RulePatch {
                    patterns: Some(vec!["(unclosed".into()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            Catalog::new(&cfg),
            Err(CatalogError::InvalidPattern { .. })
        ));
    }
}
