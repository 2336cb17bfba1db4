use once_cell::sync::Lazy;
use std::collections::HashMap;
use thiserror::Error;

/// ISO 3166-1 alpha-2 country code, used for UI selection
pub type ShortCode = &'static str;

/// ISO 3166-1 alpha-3 code, used to join against boundary geometry
pub type RegionCode = &'static str;

/// A country known to the dashboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryRef {
    pub a2: ShortCode,
    pub a3: RegionCode,
    pub name: &'static str,
}

impl CountryRef {
    pub const fn new(a2: ShortCode, a3: RegionCode, name: &'static str) -> Self {
        Self { a2, a3, name }
    }
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("duplicate short code in country table: {0}")]
    DuplicateShortCode(String),
    #[error("duplicate region code in country table: {0}")]
    DuplicateRegionCode(String),
}

/// Every country the dashboard can chart or map
pub static COUNTRIES: &[CountryRef] = &[
    CountryRef::new("AT", "AUT", "Austria"),
    CountryRef::new("BE", "BEL", "Belgium"),
    CountryRef::new("BG", "BGR", "Bulgaria"),
    CountryRef::new("HR", "HRV", "Croatia"),
    CountryRef::new("CY", "CYP", "Cyprus"),
    CountryRef::new("CZ", "CZE", "Czechia"),
    CountryRef::new("DK", "DNK", "Denmark"),
    CountryRef::new("EE", "EST", "Estonia"),
    CountryRef::new("FI", "FIN", "Finland"),
    CountryRef::new("FR", "FRA", "France"),
    CountryRef::new("DE", "DEU", "Germany"),
    CountryRef::new("GR", "GRC", "Greece"),
    CountryRef::new("HU", "HUN", "Hungary"),
    CountryRef::new("IE", "IRL", "Ireland"),
    CountryRef::new("IT", "ITA", "Italy"),
    CountryRef::new("LV", "LVA", "Latvia"),
    CountryRef::new("LT", "LTU", "Lithuania"),
    CountryRef::new("LU", "LUX", "Luxembourg"),
    CountryRef::new("MT", "MLT", "Malta"),
    CountryRef::new("NL", "NLD", "Netherlands"),
    CountryRef::new("PL", "POL", "Poland"),
    CountryRef::new("PT", "PRT", "Portugal"),
    CountryRef::new("RO", "ROU", "Romania"),
    CountryRef::new("SK", "SVK", "Slovakia"),
    CountryRef::new("SI", "SVN", "Slovenia"),
    CountryRef::new("ES", "ESP", "Spain"),
    CountryRef::new("SE", "SWE", "Sweden"),
    CountryRef::new("GB", "GBR", "United Kingdom"),
    CountryRef::new("NO", "NOR", "Norway"),
    CountryRef::new("CH", "CHE", "Switzerland"),
];

/// Countries pre-selected when a session has no stored choice yet
pub static DEFAULT_SELECTION: &[ShortCode] = &["DE", "FR", "ES", "HU", "GB", "IT"];

static BY_A2: Lazy<HashMap<ShortCode, &'static CountryRef>> =
    Lazy::new(|| COUNTRIES.iter().map(|c| (c.a2, c)).collect());

static BY_A3: Lazy<HashMap<RegionCode, &'static CountryRef>> =
    Lazy::new(|| COUNTRIES.iter().map(|c| (c.a3, c)).collect());

/// Look up a country by its two-letter code
pub fn get_by_a2(a2: &str) -> Option<&'static CountryRef> {
    BY_A2.get(a2).copied()
}

/// Look up a country by its three-letter region code
pub fn get_by_a3(a3: &str) -> Option<&'static CountryRef> {
    BY_A3.get(a3).copied()
}

/// List all known short codes, sorted
pub fn list_countries() -> Vec<ShortCode> {
    let mut codes: Vec<_> = COUNTRIES.iter().map(|c| c.a2).collect();
    codes.sort();
    codes
}

/// Check the a2/a3 bijection at startup. The map join keys on both code
/// systems, so a duplicate on either side is a configuration error.
pub fn verify_bijection() -> Result<(), TableError> {
    let mut seen_a2 = HashMap::new();
    let mut seen_a3 = HashMap::new();
    for country in COUNTRIES {
        if seen_a2.insert(country.a2, country.a3).is_some() {
            return Err(TableError::DuplicateShortCode(country.a2.to_string()));
        }
        if seen_a3.insert(country.a3, country.a2).is_some() {
            return Err(TableError::DuplicateRegionCode(country.a3.to_string()));
        }
    }
    Ok(())
}

impl std::fmt::Display for CountryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.a2)
    }
}
