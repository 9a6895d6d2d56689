// src/key.rs
//! Dedup key derivation: sign label parsed from the title plus the canonical
//! published timestamp.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

pub const ZODIAC_SIGNS: [&str; 12] = [
    "Aries",
    "Taurus",
    "Gemini",
    "Cancer",
    "Leo",
    "Virgo",
    "Libra",
    "Scorpio",
    "Sagittarius",
    "Capricorn",
    "Aquarius",
    "Pisces",
];

/// Maps an entry title onto a label. Implementations are pure.
pub trait SignParser: Send + Sync {
    fn parse(&self, title: &str) -> Option<String>;
}

/// Lookup table of zodiac signs (plus optional aliases), built once and then read-only.
#[derive(Debug, Clone)]
pub struct SignTable {
    // lowercase word -> canonical sign
    lookup: HashMap<String, &'static str>,
}

impl Default for SignTable {
    fn default() -> Self {
        let lookup = ZODIAC_SIGNS
            .iter()
            .map(|s| (s.to_ascii_lowercase(), *s))
            .collect();
        Self { lookup }
    }
}

impl SignTable {
    /// Extend the default table with `alias -> sign` pairs.
    /// Every alias must be a single non-empty word and point at a known sign.
    pub fn with_aliases<'a, I>(aliases: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut table = Self::default();
        for (alias, sign) in aliases {
            let alias_key = alias.trim().to_lowercase();
            if alias_key.is_empty() || alias_key.split_whitespace().count() != 1 {
                return Err(ConfigError::InvalidSignAlias {
                    alias: alias.to_string(),
                    reason: "alias must be a single word".into(),
                });
            }
            let canonical = ZODIAC_SIGNS
                .iter()
                .find(|s| s.eq_ignore_ascii_case(sign.trim()))
                .ok_or_else(|| ConfigError::InvalidSignAlias {
                    alias: alias.to_string(),
                    reason: format!("unknown sign '{sign}'"),
                })?;
            table.lookup.insert(alias_key, canonical);
        }
        Ok(table)
    }
}

impl SignParser for SignTable {
    fn parse(&self, title: &str) -> Option<String> {
        title
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
            .find_map(|w| self.lookup.get(&w.to_lowercase()))
            .map(|s| (*s).to_string())
    }
}

/// Identity of one logical feed item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    sign: String,
    published: DateTime<Utc>,
}

impl DedupKey {
    /// Sub-second precision is dropped so that equality matches the canonical form.
    pub fn new(sign: impl Into<String>, published: DateTime<Utc>) -> Self {
        Self {
            sign: sign.into(),
            published: published.trunc_subsecs(0),
        }
    }

    pub fn sign(&self) -> &str {
        &self.sign
    }

    pub fn published(&self) -> DateTime<Utc> {
        self.published
    }

    /// RFC 3339, UTC, whole seconds: `2024-01-01T00:00:00Z`.
    pub fn canonical_date(&self) -> String {
        self.published.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Unambiguous encoding used by repository backends. The label is
    /// length-prefixed so a separator inside it cannot produce a collision.
    pub fn storage_key(&self) -> String {
        format!("{}:{}|{}", self.sign.len(), self.sign, self.canonical_date())
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.sign, self.canonical_date())
    }
}

/// Data-quality errors: the entry cannot be keyed and therefore cannot be deduplicated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("entry has an empty title")]
    EmptyTitle,
    #[error("entry '{title}' has no usable published date")]
    MissingDate { title: String },
    #[error("no sign found in title '{title}'")]
    UnknownSign { title: String },
}

#[derive(Clone)]
pub struct EntryKeyExtractor {
    signs: Arc<dyn SignParser>,
}

impl Default for EntryKeyExtractor {
    fn default() -> Self {
        Self::new(Arc::new(SignTable::default()))
    }
}

impl EntryKeyExtractor {
    pub fn new(signs: Arc<dyn SignParser>) -> Self {
        Self { signs }
    }

    pub fn extract(
        &self,
        title: &str,
        published: Option<DateTime<Utc>>,
    ) -> Result<DedupKey, KeyError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(KeyError::EmptyTitle);
        }
        let published = published.ok_or_else(|| KeyError::MissingDate {
            title: title.to_string(),
        })?;
        let sign = self
            .signs
            .parse(title)
            .ok_or_else(|| KeyError::UnknownSign {
                title: title.to_string(),
            })?;
        Ok(DedupKey::new(sign, published))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jan1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn parses_sign_case_insensitively() {
        let t = SignTable::default();
        assert_eq!(t.parse("Aries Today").as_deref(), Some("Aries"));
        assert_eq!(t.parse("daily: SCORPIO!").as_deref(), Some("Scorpio"));
        assert_eq!(t.parse("Weather report"), None);
    }

    #[test]
    fn aliases_must_target_known_signs() {
        let t = SignTable::with_aliases([("Ram", "aries")]).unwrap();
        assert_eq!(t.parse("The Ram speaks").as_deref(), Some("Aries"));

        let err = SignTable::with_aliases([("Goat", "Unicorn")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSignAlias { .. }));
        assert!(SignTable::with_aliases([("two words", "Leo")]).is_err());
    }

    #[test]
    fn identical_inputs_give_identical_keys() {
        let x = EntryKeyExtractor::default();
        let a = x.extract("Aries Today", Some(jan1())).unwrap();
        let b = x.extract("  Aries Today ", Some(jan1())).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Aries|2024-01-01T00:00:00Z");
        assert_eq!(a.storage_key(), "5:Aries|2024-01-01T00:00:00Z");
    }

    #[test]
    fn subsecond_noise_is_canonicalized() {
        let with_ms = jan1() + chrono::Duration::milliseconds(250);
        assert_eq!(DedupKey::new("Leo", with_ms), DedupKey::new("Leo", jan1()));
    }

    #[test]
    fn distinct_inputs_give_distinct_keys() {
        let x = EntryKeyExtractor::default();
        let a = x.extract("Aries Today", Some(jan1())).unwrap();
        let b = x.extract("Taurus Today", Some(jan1())).unwrap();
        let c = x
            .extract("Aries Today", Some(jan1() + chrono::Duration::days(1)))
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn separator_in_label_cannot_collide() {
        let a = DedupKey::new("A|1", jan1());
        let b = DedupKey::new("A", jan1());
        assert_ne!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn data_quality_errors() {
        let x = EntryKeyExtractor::default();
        assert_eq!(x.extract("   ", Some(jan1())), Err(KeyError::EmptyTitle));
        assert!(matches!(
            x.extract("Leo", None),
            Err(KeyError::MissingDate { .. })
        ));
        assert!(matches!(
            x.extract("Stock report", Some(jan1())),
            Err(KeyError::UnknownSign { .. })
        ));
    }
}
