//! Knowledge entity model.
//!
//! One polymorphic record shape covers every entity kind the assistant
//! can talk about. Kind-specific attributes live in the extensible
//! `data` blob; the typed columns are the ones search and filtering
//! need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The entity kinds served by the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Attraction,
    Accommodation,
    Restaurant,
    Destination,
    Event,
    TourPackage,
    Faq,
    PracticalInfo,
    TransportRoute,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Attraction,
        EntityKind::Accommodation,
        EntityKind::Restaurant,
        EntityKind::Destination,
        EntityKind::Event,
        EntityKind::TourPackage,
        EntityKind::Faq,
        EntityKind::PracticalInfo,
        EntityKind::TransportRoute,
    ];

    /// Backing table name; always passes the identifier allow-list.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Attraction => "attractions",
            EntityKind::Accommodation => "accommodations",
            EntityKind::Restaurant => "restaurants",
            EntityKind::Destination => "destinations",
            EntityKind::Event => "events",
            EntityKind::TourPackage => "tour_packages",
            EntityKind::Faq => "faqs",
            EntityKind::PracticalInfo => "practical_info",
            EntityKind::TransportRoute => "transport_routes",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        match s {
            "attraction" => Some(EntityKind::Attraction),
            "accommodation" => Some(EntityKind::Accommodation),
            "restaurant" => Some(EntityKind::Restaurant),
            "destination" => Some(EntityKind::Destination),
            "event" => Some(EntityKind::Event),
            "tour_package" => Some(EntityKind::TourPackage),
            "faq" => Some(EntityKind::Faq),
            "practical_info" => Some(EntityKind::PracticalInfo),
            "transport_route" => Some(EntityKind::TransportRoute),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Attraction => "attraction",
            EntityKind::Accommodation => "accommodation",
            EntityKind::Restaurant => "restaurant",
            EntityKind::Destination => "destination",
            EntityKind::Event => "event",
            EntityKind::TourPackage => "tour_package",
            EntityKind::Faq => "faq",
            EntityKind::PracticalInfo => "practical_info",
            EntityKind::TransportRoute => "transport_route",
        };
        write!(f, "{s}")
    }
}

/// Language-code → string mapping for names and descriptions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultilingualText(pub HashMap<String, String>);

impl MultilingualText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(lang: &str, text: &str) -> Self {
        let mut map = HashMap::new();
        map.insert(lang.to_string(), text.to_string());
        Self(map)
    }

    pub fn with(mut self, lang: &str, text: &str) -> Self {
        self.0.insert(lang.to_string(), text.to_string());
        self
    }

    /// Text in `lang`, falling back to `default_lang`, then to any
    /// entry at all.
    pub fn get<'a>(&'a self, lang: &str, default_lang: &str) -> Option<&'a str> {
        self.0
            .get(lang)
            .or_else(|| self.0.get(default_lang))
            .or_else(|| self.0.values().next())
            .map(|s| s.as_str())
    }

    pub fn has(&self, lang: &str) -> bool {
        self.0.contains_key(lang)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Geographic point, WGS84.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6_371.0;
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos()
                * other.lat.to_radians().cos()
                * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// One knowledge record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntity {
    pub id: i64,
    pub kind: EntityKind,

    /// Stable natural key, unique per kind.
    pub slug: String,

    pub name: MultilingualText,
    pub description: MultilingualText,

    pub category: Option<String>,
    pub rating: Option<f64>,
    pub price_tier: Option<String>,
    pub active: bool,

    /// Engagement signal in [0, 1]; feeds result re-ranking.
    pub popularity: f64,

    pub city_id: Option<i64>,
    pub region_id: Option<i64>,

    pub location: Option<GeoPoint>,

    /// Fixed-dimension embedding; one dimension per kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Extensible kind-specific payload.
    #[serde(default)]
    pub data: Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntity {
    /// Display name in the requested language.
    pub fn display_name(&self, lang: &str, default_lang: &str) -> &str {
        self.name.get(lang, default_lang).unwrap_or(&self.slug)
    }

    /// Description in the requested language, empty when missing.
    pub fn display_description(&self, lang: &str, default_lang: &str) -> &str {
        self.description.get(lang, default_lang).unwrap_or("")
    }
}

/// A record to insert; ids are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDraft {
    pub kind: EntityKind,
    pub slug: String,
    pub name: MultilingualText,
    pub description: MultilingualText,
    pub category: Option<String>,
    pub rating: Option<f64>,
    pub price_tier: Option<String>,
    pub active: bool,
    pub popularity: f64,
    pub city_id: Option<i64>,
    pub region_id: Option<i64>,
    pub location: Option<GeoPoint>,
    pub embedding: Option<Vec<f32>>,
    pub data: Value,
}

impl EntityDraft {
    pub fn new(kind: EntityKind, slug: &str, name: MultilingualText) -> Self {
        Self {
            kind,
            slug: slug.to_string(),
            name,
            description: MultilingualText::new(),
            category: None,
            rating: None,
            price_tier: None,
            active: true,
            popularity: 0.0,
            city_id: None,
            region_id: None,
            location: None,
            embedding: None,
            data: Value::Null,
        }
    }

    /// A draft must carry at least the default-language name, and its
    /// embedding must match the store's fixed dimension when present.
    pub fn validate(&self, default_lang: &str, embedding_dim: usize) -> Result<(), String> {
        if self.slug.trim().is_empty() {
            return Err("slug must not be empty".into());
        }
        if !self.name.has(default_lang) {
            return Err(format!("name missing default language '{default_lang}'"));
        }
        if let Some(embedding) = &self.embedding {
            if embedding.len() != embedding_dim {
                return Err(format!(
                    "embedding dimension {} does not match {}",
                    embedding.len(),
                    embedding_dim
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_table_names_are_allowed() {
        for kind in EntityKind::ALL {
            crate::database::validate_table(kind.table()).unwrap();
        }
    }

    #[test]
    fn test_kind_display_parse_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(EntityKind::parse("spaceship"), None);
    }

    #[test]
    fn test_multilingual_fallback_chain() {
        let text = MultilingualText::of("en", "Pyramids of Giza").with("ar", "أهرامات الجيزة");
        assert_eq!(text.get("ar", "en"), Some("أهرامات الجيزة"));
        assert_eq!(text.get("fr", "en"), Some("Pyramids of Giza"));

        let only_fr = MultilingualText::of("fr", "Pyramides");
        // Neither requested nor default present; any entry beats none.
        assert_eq!(only_fr.get("ar", "en"), Some("Pyramides"));
    }

    #[test]
    fn test_haversine_known_distance() {
        // Cairo to Luxor is roughly 500 km.
        let cairo = GeoPoint::new(30.0444, 31.2357);
        let luxor = GeoPoint::new(25.6872, 32.6396);
        let d = cairo.distance_km(&luxor);
        assert!((d - 500.0).abs() < 20.0, "got {d}");
    }

    #[test]
    fn test_haversine_zero() {
        let p = GeoPoint::new(30.0, 31.0);
        assert!(p.distance_km(&p) < 1e-9);
    }

    #[test]
    fn test_draft_requires_default_language_name() {
        let draft = EntityDraft::new(
            EntityKind::Attraction,
            "giza-pyramids",
            MultilingualText::of("ar", "أهرامات"),
        );
        assert!(draft.validate("en", 384).is_err());

        let ok = EntityDraft::new(
            EntityKind::Attraction,
            "giza-pyramids",
            MultilingualText::of("en", "Pyramids"),
        );
        ok.validate("en", 384).unwrap();
    }

    #[test]
    fn test_draft_embedding_dimension_checked() {
        let mut draft = EntityDraft::new(
            EntityKind::Faq,
            "visa",
            MultilingualText::of("en", "Visa questions"),
        );
        draft.embedding = Some(vec![0.0; 100]);
        assert!(draft.validate("en", 384).is_err());
        draft.embedding = Some(vec![0.0; 384]);
        draft.validate("en", 384).unwrap();
    }
}
