//! Intent classification against prototype centroids.
//!
//! Each intent is a set of example phrases; loading the model embeds
//! them and averages into one prototype vector per intent. An utterance
//! is classified by cosine similarity to the prototypes, and the top
//! intent only wins when it clears the runner-up by a margin —
//! otherwise the pipeline reports `fallback`.

use super::types::FALLBACK_INTENT;
use rihla_embedder::{compute_centroid, cosine_similarity, Embedder};

/// One classified utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedIntent {
    pub intent: String,
    pub confidence: f32,
    pub margin: f32,
}

struct IntentPrototype {
    intent: String,
    centroid: Vec<f32>,
}

/// The loaded classifier artifact.
pub struct IntentModel {
    prototypes: Vec<IntentPrototype>,
    margin: f32,
}

/// Example phrases for the built-in tourism intents. Multilingual
/// phrasing keeps the prototypes useful for every supported language.
pub fn default_intent_phrases() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        (
            "greeting",
            vec![
                "hello",
                "hi there",
                "good morning",
                "hey",
                "bonjour",
                "hallo",
                "hola",
                "مرحبا",
                "السلام عليكم",
                "أهلا",
            ],
        ),
        (
            "farewell",
            vec!["goodbye", "bye", "see you later", "au revoir", "مع السلامة"],
        ),
        (
            "thanks",
            vec!["thank you", "thanks a lot", "merci", "danke", "gracias", "شكرا"],
        ),
        (
            "attraction_info",
            vec![
                "tell me about the pyramids",
                "what is the egyptian museum",
                "information about karnak temple",
                "describe the valley of the kings",
                "what can I see at the citadel",
                "اخبرني عن الأهرامات",
                "معلومات عن المتحف المصري",
            ],
        ),
        (
            "find_nearby",
            vec![
                "what is near my hotel",
                "attractions near me",
                "restaurants close to the museum",
                "what can I visit nearby",
                "أماكن قريبة مني",
            ],
        ),
        (
            "restaurant_search",
            vec![
                "where can I eat koshary",
                "recommend a restaurant in cairo",
                "best seafood restaurants",
                "مطعم قريب",
            ],
        ),
        (
            "hotel_search",
            vec![
                "find me a hotel in luxor",
                "where should I stay",
                "cheap accommodation near the nile",
                "فندق في الاقصر",
            ],
        ),
        (
            "event_search",
            vec![
                "what events are happening this week",
                "concerts in cairo",
                "festivals this month",
            ],
        ),
        (
            "price_query",
            vec![
                "how much is the ticket",
                "what does entry cost",
                "entrance fee for the pyramids",
                "بكام التذكرة",
                "بكام تذكرة الأهرامات",
            ],
        ),
        (
            "practical_info",
            vec![
                "what are the opening hours",
                "do I need a visa",
                "is it safe to travel",
                "what should I wear",
                "مواعيد العمل",
            ],
        ),
        (
            "weather_query",
            vec![
                "what is the weather like",
                "will it rain tomorrow",
                "how hot is it in aswan",
                "الطقس اليوم",
            ],
        ),
        (
            "booking",
            vec![
                "book a tour for tomorrow",
                "reserve two tickets",
                "I want to book a nile cruise",
                "احجز رحلة",
            ],
        ),
    ]
}

impl IntentModel {
    /// Build prototypes by embedding the example phrases.
    pub fn load(
        embedder: &dyn Embedder,
        phrases: &[(&str, Vec<&str>)],
        margin: f32,
    ) -> Result<Self, super::registry::NluError> {
        let mut prototypes = Vec::with_capacity(phrases.len());
        for (intent, examples) in phrases {
            let mut embeddings = Vec::with_capacity(examples.len());
            for example in examples {
                let embedding = embedder.embed(example).map_err(|e| {
                    super::registry::NluError::ModelLoad(format!(
                        "embedding intent example failed: {e}"
                    ))
                })?;
                embeddings.push(embedding);
            }
            prototypes.push(IntentPrototype {
                intent: intent.to_string(),
                centroid: compute_centroid(&embeddings),
            });
        }
        Ok(Self { prototypes, margin })
    }

    /// Classify an utterance embedding.
    pub fn classify(&self, embedding: &[f32]) -> ClassifiedIntent {
        let mut scored: Vec<(f32, &str)> = self
            .prototypes
            .iter()
            .map(|p| (cosine_similarity(embedding, &p.centroid), p.intent.as_str()))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let Some(&(top_score, top_intent)) = scored.first() else {
            return ClassifiedIntent {
                intent: FALLBACK_INTENT.into(),
                confidence: 0.0,
                margin: 0.0,
            };
        };
        let runner_up = scored.get(1).map(|(s, _)| *s).unwrap_or(0.0);
        let margin = top_score - runner_up;

        if top_score <= 0.0 || margin < self.margin {
            return ClassifiedIntent {
                intent: FALLBACK_INTENT.into(),
                confidence: top_score.clamp(0.0, 1.0),
                margin,
            };
        }

        ClassifiedIntent {
            intent: top_intent.to_string(),
            confidence: top_score.clamp(0.0, 1.0),
            margin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rihla_embedder::HashEmbedder;

    fn model() -> IntentModel {
        let embedder = HashEmbedder::new();
        IntentModel::load(&embedder, &default_intent_phrases(), 0.05).unwrap()
    }

    fn classify(text: &str) -> ClassifiedIntent {
        let embedder = HashEmbedder::new();
        model().classify(&embedder.embed(text).unwrap())
    }

    #[test]
    fn test_greeting_classifies() {
        let c = classify("hello");
        assert_eq!(c.intent, "greeting");
        assert!(c.confidence > 0.0 && c.confidence <= 1.0);
    }

    #[test]
    fn test_exact_prototype_phrase_wins_decisively() {
        let c = classify("tell me about the pyramids");
        assert_eq!(c.intent, "attraction_info");
        assert!(c.margin >= 0.05);
    }

    #[test]
    fn test_arabic_price_query() {
        let c = classify("بكام تذكرة الأهرامات؟");
        assert_eq!(c.intent, "price_query");
    }

    #[test]
    fn test_gibberish_falls_back() {
        let c = classify("qwzx vbnm plok");
        assert_eq!(c.intent, FALLBACK_INTENT);
    }

    #[test]
    fn test_tight_margin_falls_back() {
        // A margin requirement of 1.0 can never be met.
        let embedder = HashEmbedder::new();
        let strict = IntentModel::load(&embedder, &default_intent_phrases(), 1.0).unwrap();
        let c = strict.classify(&embedder.embed("hello").unwrap());
        assert_eq!(c.intent, FALLBACK_INTENT);
        // The near-match confidence is still reported.
        assert!(c.confidence > 0.0);
    }
}
