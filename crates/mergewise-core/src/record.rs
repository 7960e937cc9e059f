//! Entity records: one side of a candidate duplicate pair.
//!
//! A record is an open attribute bag keyed by field name. Upstream column
//! mapping decides which source columns land under which key; the accessors
//! below know the handful of aliases that mapping layer produces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical comparison fields and the aliases accepted for each.
const NAME_KEYS: &[&str] = &["name", "customer_name", "company_name"];
const ADDRESS_KEYS: &[&str] = &["address", "street", "address_line1"];
const CITY_KEYS: &[&str] = &["city", "town"];
const COUNTRY_KEYS: &[&str] = &["country", "country_code"];
const PHONE_KEYS: &[&str] = &["phone", "telephone", "phone_number"];
const INDUSTRY_KEYS: &[&str] = &["industry", "industry_code", "sic_code", "classification"];
const IDENTIFIER_KEYS: &[&str] = &["identifier", "vat", "vat_number", "tax_id", "tpi", "uid"];

/// Field names that matter for completeness scoring.
pub const COMPARABLE_FIELDS: &[&str] = &[
    "name",
    "address",
    "city",
    "country",
    "phone",
    "industry",
    "identifier",
];

/// One side of a candidate duplicate pair.
///
/// Immutable input to every evaluation; builders consume `self`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRecord {
    fields: BTreeMap<String, String>,
}

impl EntityRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Convenience constructor for the three fields most rules look at.
    pub fn company(name: &str, address: &str, city: &str) -> Self {
        Self::new()
            .with("name", name)
            .with("address", address)
            .with("city", city)
    }

    /// Raw lookup by exact key. Blank values are treated as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Lookup by canonical field name, honouring aliases.
    pub fn field(&self, canonical: &str) -> Option<&str> {
        let keys: &[&str] = match canonical {
            "name" => NAME_KEYS,
            "address" => ADDRESS_KEYS,
            "city" => CITY_KEYS,
            "country" => COUNTRY_KEYS,
            "phone" => PHONE_KEYS,
            "industry" => INDUSTRY_KEYS,
            "identifier" => IDENTIFIER_KEYS,
            other => return self.get(other),
        };
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn name(&self) -> Option<&str> {
        self.field("name")
    }

    pub fn address(&self) -> Option<&str> {
        self.field("address")
    }

    pub fn city(&self) -> Option<&str> {
        self.field("city")
    }

    pub fn country(&self) -> Option<&str> {
        self.field("country")
    }

    pub fn phone(&self) -> Option<&str> {
        self.field("phone")
    }

    pub fn industry(&self) -> Option<&str> {
        self.field("industry")
    }

    pub fn identifier(&self) -> Option<&str> {
        self.field("identifier")
    }

    /// Canonical comparable fields that have no value.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        COMPARABLE_FIELDS
            .iter()
            .copied()
            .filter(|f| self.field(f).is_none())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EntityRecord {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_fields() {
        let r = EntityRecord::new()
            .with("customer_name", "Acme Corp")
            .with("vat_number", "GB123")
            .with("telephone", "+1 555 0100");
        assert_eq!(r.name(), Some("Acme Corp"));
        assert_eq!(r.identifier(), Some("GB123"));
        assert_eq!(r.phone(), Some("+1 555 0100"));
    }

    #[test]
    fn blank_values_are_absent() {
        let r = EntityRecord::new().with("name", "   ").with("address", "");
        assert!(r.name().is_none());
        assert!(r.address().is_none());
        assert!(r.missing_fields().contains(&"name"));
    }

    #[test]
    fn deserializes_from_flat_json_object() {
        let r: EntityRecord =
            serde_json::from_str(r#"{"name": "DHL Express", "city": "Houston"}"#).unwrap();
        assert_eq!(r.name(), Some("DHL Express"));
        assert_eq!(r.city(), Some("Houston"));
        assert_eq!(r.len(), 2);
    }
}
