// src/record.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::DedupKey;

/// Domain record handed to the sink, one per deduplicated entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoroscopeRecord {
    pub feed_name: String,
    pub title: String,
    pub sign: String,
    pub date: DateTime<Utc>,
    pub excerpt: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecordBuilder;

impl RecordBuilder {
    pub fn build(
        &self,
        feed_name: &str,
        title: &str,
        key: &DedupKey,
        excerpt: String,
    ) -> HoroscopeRecord {
        HoroscopeRecord {
            feed_name: feed_name.to_string(),
            title: title.trim().to_string(),
            sign: key.sign().to_string(),
            date: key.published(),
            excerpt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builds_from_key_and_excerpt() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = DedupKey::new("Aries", date);
        let rec = RecordBuilder.build("daily", " Aries Today ", &key, "Bold moves.".into());
        assert_eq!(rec.feed_name, "daily");
        assert_eq!(rec.title, "Aries Today");
        assert_eq!(rec.sign, "Aries");
        assert_eq!(rec.date, date);

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["date"], "2024-01-01T00:00:00Z");
        assert_eq!(json["excerpt"], "Bold moves.");
    }
}
