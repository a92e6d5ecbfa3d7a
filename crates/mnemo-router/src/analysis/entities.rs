//! Pattern-based entity extraction
//!
//! Three families are recognized: person-name-like token runs, ISO and
//! slash dates, and organization names ending in a corporate suffix.
//! Each family carries a fixed confidence.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const PERSON_CONFIDENCE: f32 = 0.6;
const DATE_CONFIDENCE: f32 = 0.9;
const ORGANIZATION_CONFIDENCE: f32 = 0.8;

static PERSON_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b"));

static DATE_PATTERN: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}/\d{1,2}/\d{2,4}\b")
});

static ORGANIZATION_PATTERN: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Z][A-Za-z0-9&]*\s+)+(?:Inc|Corp|LLC|Ltd|Company)\b\.?")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityLabel {
    Person,
    Date,
    Organization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: EntityLabel,
    pub confidence: f32,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

impl Entity {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

fn pattern(
    cell: &'static LazyLock<Result<Regex, regex::Error>>,
    name: &str,
) -> Result<&'static Regex, String> {
    cell.as_ref()
        .map_err(|e| format!("{name} pattern failed to compile: {e}"))
}

/// Extract entities ordered by position.
///
/// Organizations are matched first; person-like runs that overlap an
/// organization are dropped so "Acme Corp" is not also a person.
pub fn extract_entities(
    text: &str,
    min_confidence: f32,
    max_entities: usize,
) -> Result<Vec<Entity>, String> {
    let organizations = pattern(&ORGANIZATION_PATTERN, "organization")?;
    let dates = pattern(&DATE_PATTERN, "date")?;
    let people = pattern(&PERSON_PATTERN, "person")?;

    let mut entities: Vec<Entity> = Vec::new();

    for m in organizations.find_iter(text) {
        let name = m.as_str().trim_end_matches('.');
        entities.push(Entity {
            text: name.to_string(),
            label: EntityLabel::Organization,
            confidence: ORGANIZATION_CONFIDENCE,
            start: m.start(),
            end: m.start() + name.len(),
        });
    }

    for m in dates.find_iter(text) {
        entities.push(Entity {
            text: m.as_str().to_string(),
            label: EntityLabel::Date,
            confidence: DATE_CONFIDENCE,
            start: m.start(),
            end: m.end(),
        });
    }

    for m in people.find_iter(text) {
        if entities.iter().any(|e| e.overlaps(m.start(), m.end())) {
            continue;
        }
        entities.push(Entity {
            text: m.as_str().to_string(),
            label: EntityLabel::Person,
            confidence: PERSON_CONFIDENCE,
            start: m.start(),
            end: m.end(),
        });
    }

    entities.retain(|e| e.confidence >= min_confidence);
    entities.sort_by_key(|e| e.start);
    entities.truncate(max_entities);
    Ok(entities)
}
