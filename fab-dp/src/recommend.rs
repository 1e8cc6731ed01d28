//! Manufacturing recommendation engine
//!
//! Pure, deterministic mapping from an analyzed design description and order
//! quantity to a manufacturing method and an ordered material list. No I/O,
//! no randomness: recommendations are redisplayed and compared across
//! repeated analyses of the same design, so identical inputs must always
//! produce identical outputs.

use serde::{Deserialize, Serialize};

/// Recommended manufacturing method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Fdm,
    Resin,
    Sls,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Fdm => "FDM printing",
            Method::Resin => "resin printing",
            Method::Sls => "SLS printing",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method plus ordered candidate materials, most suitable first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub method: Method,
    pub materials: Vec<String>,
}

const DETAIL_KEYWORDS: &[&str] = &["detail", "smooth", "fine"];
const STRENGTH_KEYWORDS: &[&str] = &["strong", "durable", "functional"];
const COMPLEXITY_KEYWORDS: &[&str] = &["complex", "intricate"];
const FLEXIBILITY_KEYWORDS: &[&str] = &["flexible", "bendable"];

/// Quantity above which SLS stops being recommended
const SLS_MAX_QUANTITY: u32 = 200;
/// Quantity above which resin stops being recommended
const RESIN_MAX_QUANTITY: u32 = 50;

fn contains_any(description: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| description.contains(kw))
}

/// Recommend a manufacturing method and materials for a design.
///
/// Rules are evaluated in order, first match wins:
/// 1. strength or complexity keywords and quantity <= 200 → SLS
/// 2. detail keywords and quantity <= 50 → resin
/// 3. default → FDM (always yields a result)
///
/// # Arguments
/// * `description` - analyzed design description (matched case-insensitively)
/// * `quantity` - requested order volume, >= 1
pub fn recommend(description: &str, quantity: u32) -> Recommendation {
    let desc = description.to_lowercase();

    let needs_strength = contains_any(&desc, STRENGTH_KEYWORDS);
    let is_complex = contains_any(&desc, COMPLEXITY_KEYWORDS);
    let needs_detail = contains_any(&desc, DETAIL_KEYWORDS);

    let method = if (needs_strength || is_complex) && quantity <= SLS_MAX_QUANTITY {
        Method::Sls
    } else if needs_detail && quantity <= RESIN_MAX_QUANTITY {
        Method::Resin
    } else {
        Method::Fdm
    };

    Recommendation {
        method,
        materials: recommend_materials(&desc),
    }
}

/// Material candidates matched against a fixed keyword vocabulary.
///
/// First matching group wins; the final fallback always applies, so this
/// never returns an empty list.
fn recommend_materials(lowercase_description: &str) -> Vec<String> {
    let desc = lowercase_description;

    if contains_any(desc, &["detail", "smooth"]) {
        return vec!["Standard Resin".to_string(), "Clear Resin".to_string()];
    }
    if contains_any(desc, &["strong", "durable"]) {
        return vec!["Nylon".to_string(), "Carbon Fiber Nylon".to_string()];
    }
    if contains_any(desc, FLEXIBILITY_KEYWORDS) {
        return vec!["TPU".to_string(), "Flexible Resin".to_string()];
    }

    vec!["PLA".to_string(), "PETG".to_string()]
}
