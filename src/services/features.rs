//! Unit-aware pattern extraction of product attributes.
//!
//! A fixed table maps attribute names (`item_weight`, `voltage`, ...) to a
//! regular expression of the form `<number>[.<decimal>][space]<unit>`. Every
//! pattern is applied independently, so one substring may land in several
//! buckets (`dimension` shares its vocabulary with `height`/`width`/`depth`).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Version of the pattern table below. Bump when units change so stored
/// outputs can be told apart.
pub const PATTERN_TABLE_VERSION: u32 = 3;

/// Attribute name -> matched substrings, in text order, duplicates kept.
/// Attributes without matches are absent.
pub type FeatureMap = BTreeMap<String, Vec<String>>;

/// Unit vocabulary per attribute. Within each list, longer tokens sharing a
/// prefix come first so the alternation prefers them.
const UNIT_TABLE: &[(&str, &[&str])] = &[
    (
        "item_weight",
        &[
            r"kilograms?",
            r"milligrams?",
            r"micrograms?",
            r"grams?",
            r"ounces?",
            r"pounds?",
            r"tons?",
            r"kg",
            r"mg",
            r"mcg",
            r"µg",
            r"lbs?",
            r"oz",
            r"g",
        ],
    ),
    (
        "item_volume",
        &[
            r"centilit(?:re|er)s?",
            r"cubic f(?:oo|ee)t",
            r"cubic inch(?:es)?",
            r"cups?",
            r"decilit(?:re|er)s?",
            r"fluid ounces?",
            r"imperial gallons?",
            r"gallons?",
            r"microlit(?:re|er)s?",
            r"millilit(?:re|er)s?",
            r"lit(?:re|er)s?",
            r"pints?",
            r"quarts?",
            r"fl\.?\s?oz",
            r"cu\.?\s?ft",
            r"cu\.?\s?in",
            r"ml",
            r"cl",
            r"dl",
            r"gal",
            r"qt",
            r"pt",
            r"l",
        ],
    ),
    ("height", LENGTH_WORDS),
    ("width", LENGTH_WORDS),
    ("depth", LENGTH_WORDS),
    ("dimension", &[r"mm", r"cm", r"m", r"in", r"ft", r"yd"]),
    (
        "voltage",
        &[
            r"kilovolts?",
            r"millivolts?",
            r"volts?",
            r"kv",
            r"mv",
            r"vac",
            r"vdc",
            r"v",
        ],
    ),
    ("wattage", &[r"kilowatts?", r"watts?", r"kw", r"w"]),
];

const LENGTH_WORDS: &[&str] = &[
    r"centimet(?:re|er)s?",
    r"millimet(?:re|er)s?",
    r"met(?:re|er)s?",
    r"f(?:oo|ee)t",
    r"inch(?:es)?",
    r"yards?",
];

/// A compiled attribute pattern.
pub struct AttributePattern {
    pub name: &'static str,
    regex: Regex,
}

impl AttributePattern {
    fn compile(name: &'static str, units: &[&str]) -> Self {
        let pattern = format!(r"(?i)\d+(?:\.\d+)?\s?(?:{})\b", units.join("|"));
        let regex = Regex::new(&pattern).expect("unit pattern should compile");
        Self { name, regex }
    }

    /// All matches in `text`, in order of appearance.
    pub fn find_all<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.regex.find_iter(text).map(|m| m.as_str()).collect()
    }
}

/// The compiled pattern table, shared read-only by all callers.
pub static PATTERN_TABLE: LazyLock<Vec<AttributePattern>> = LazyLock::new(|| {
    UNIT_TABLE
        .iter()
        .map(|(name, units)| AttributePattern::compile(name, units))
        .collect()
});

/// Names of every attribute the table can produce, in table order.
pub fn attribute_names() -> impl Iterator<Item = &'static str> {
    UNIT_TABLE.iter().map(|(name, _)| *name)
}

/// Apply every pattern in the table to `text`.
pub fn extract_features(text: &str) -> FeatureMap {
    let mut features = FeatureMap::new();
    for pattern in PATTERN_TABLE.iter() {
        let matches = pattern.find_all(text);
        if !matches.is_empty() {
            features.insert(
                pattern.name.to_string(),
                matches.into_iter().map(str::to_string).collect(),
            );
        }
    }
    features
}
