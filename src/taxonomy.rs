//! Classification vocabularies and the validator that enforces them.
//!
//! `type` and `category` are strict: unknown values are replaced and a
//! warning is produced. Style, mood, medium, composition and palette are
//! only suggestions and pass through untouched. Tags are normalised
//! (inner whitespace becomes `-`) without a warning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::parser::{Field, ParsedResponse, OTHER};

pub const DEFAULT_TYPES: &[&str] = &[
    "photo",
    "screenshot",
    "diagram",
    "chart",
    "illustration",
    "painting",
    "document",
    "map",
    "logo",
    "icon",
    "other",
];

pub const DEFAULT_CATEGORIES: &[&str] = &[
    "people",
    "animals",
    "nature",
    "landscape",
    "architecture",
    "urban",
    "food",
    "technology",
    "interface",
    "data",
    "art",
    "text",
    "product",
    "vehicle",
    "event",
    "other",
];

pub const DEFAULT_STYLES: &[&str] = &[
    "realistic",
    "minimalist",
    "vintage",
    "abstract",
    "flat",
    "cartoon",
    "3d",
    "hand-drawn",
    "corporate",
    "cinematic",
];

pub const DEFAULT_MOODS: &[&str] = &[
    "calm",
    "cheerful",
    "dramatic",
    "dark",
    "playful",
    "serious",
    "nostalgic",
    "energetic",
    "mysterious",
    "neutral",
];

pub const DEFAULT_MEDIUMS: &[&str] = &[
    "photograph",
    "digital",
    "vector",
    "3d-render",
    "oil",
    "watercolor",
    "pencil",
    "ink",
    "mixed-media",
    "print",
];

pub const DEFAULT_COMPOSITIONS: &[&str] = &[
    "close-up",
    "wide",
    "centered",
    "rule-of-thirds",
    "symmetrical",
    "top-down",
    "grid",
    "layered",
];

/// Extra vocabulary supplied by the user at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyOverrides {
    pub types: Vec<String>,
    pub categories: Vec<String>,
    pub styles: Vec<String>,
    pub moods: Vec<String>,
    pub mediums: Vec<String>,
    pub compositions: Vec<String>,
}

/// Allowed (strict) and suggested (open) terms per field. Immutable once
/// built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    pub types: Vec<String>,
    pub categories: Vec<String>,
    pub styles: Vec<String>,
    pub moods: Vec<String>,
    pub mediums: Vec<String>,
    pub compositions: Vec<String>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        let owned =
            |terms: &[&str]| -> Vec<String> { terms.iter().map(|t| t.to_string()).collect() };
        Self {
            types: owned(DEFAULT_TYPES),
            categories: owned(DEFAULT_CATEGORIES),
            styles: owned(DEFAULT_STYLES),
            moods: owned(DEFAULT_MOODS),
            mediums: owned(DEFAULT_MEDIUMS),
            compositions: owned(DEFAULT_COMPOSITIONS),
        }
    }
}

impl Taxonomy {
    /// Append user terms, lower-cased and without duplicates.
    pub fn with_overrides(mut self, overrides: &TaxonomyOverrides) -> Self {
        extend_terms(&mut self.types, &overrides.types);
        extend_terms(&mut self.categories, &overrides.categories);
        extend_terms(&mut self.styles, &overrides.styles);
        extend_terms(&mut self.moods, &overrides.moods);
        extend_terms(&mut self.mediums, &overrides.mediums);
        extend_terms(&mut self.compositions, &overrides.compositions);
        self
    }

    pub fn is_known_type(&self, value: &str) -> bool {
        contains(&self.types, value)
    }

    pub fn is_known_category(&self, value: &str) -> bool {
        contains(&self.categories, value)
    }
}

fn extend_terms(terms: &mut Vec<String>, extra: &[String]) {
    for term in extra {
        let term = term.trim().to_lowercase();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
}

fn contains(terms: &[String], value: &str) -> bool {
    let value = value.trim();
    terms.iter().any(|t| t.eq_ignore_ascii_case(value))
}

/// Sparse corrections plus advisory warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub corrections: BTreeMap<Field, String>,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty() && self.warnings.is_empty()
    }
}

/// Check a parsed answer against the taxonomy. Does not modify `parsed`;
/// merge the result with [`ParsedResponse::apply`].
pub fn validate(parsed: &ParsedResponse, taxonomy: &Taxonomy) -> Validation {
    let mut validation = Validation::default();

    let kind = parsed.kind.trim();
    if !kind.is_empty() && !taxonomy.is_known_type(kind) {
        validation
            .corrections
            .insert(Field::Type, OTHER.to_string());
        validation.warnings.push(format!(
            "Unknown type \"{}\" replaced with \"{}\"",
            kind, OTHER
        ));
    }

    if let Some(check) = check_categories(&parsed.category, taxonomy) {
        let CategoryCheck {
            fixed,
            dropped,
            none_known,
        } = check;
        validation.warnings.push(if none_known {
            format!(
                "Unknown category \"{}\" replaced with \"{}\"",
                dropped.join(", "),
                OTHER
            )
        } else {
            format!(
                "Dropped unknown categories \"{}\" (kept \"{}\")",
                dropped.join(", "),
                fixed
            )
        });
        validation.corrections.insert(Field::Category, fixed);
    }

    if let Some(tags) = normalize_tags(&parsed.tags) {
        validation.corrections.insert(Field::Tags, tags);
    }

    validation
}

struct CategoryCheck {
    fixed: String,
    dropped: Vec<String>,
    /// Every token was unknown, so `fixed` is the fallback.
    none_known: bool,
}

/// `Some` when any token is unknown.
fn check_categories(category: &str, taxonomy: &Taxonomy) -> Option<CategoryCheck> {
    let tokens: Vec<&str> = category
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    let (known, unknown): (Vec<&str>, Vec<&str>) = tokens
        .into_iter()
        .partition(|t| taxonomy.is_known_category(t));

    if unknown.is_empty() {
        return None;
    }

    let dropped = unknown.into_iter().map(str::to_string).collect();
    if known.is_empty() {
        return Some(CategoryCheck {
            fixed: OTHER.to_string(),
            dropped,
            none_known: true,
        });
    }
    let fixed = known
        .iter()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(", ");
    Some(CategoryCheck {
        fixed,
        dropped,
        none_known: false,
    })
}

/// Hyphenate multi-word tags. `None` when nothing needs changing.
fn normalize_tags(tags: &str) -> Option<String> {
    let tokens: Vec<&str> = tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if !tokens.iter().any(|t| t.contains(char::is_whitespace)) {
        return None;
    }

    Some(
        tokens
            .iter()
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join("-"))
            .collect::<Vec<_>>()
            .join(", "),
    )
}
