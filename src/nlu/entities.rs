//! Entity extraction and canonicalization.
//!
//! A language-aware tagger proposes candidate spans — capitalized runs
//! in Latin script, token n-grams in Arabic, plus numbers and date
//! words — and each candidate is resolved against the knowledge base.
//! Resolved spans carry the canonical id and value; unresolved
//! proper-noun spans keep their surface form only.

use super::types::NluEntity;
use crate::knowledge::{EntityKind, KnowledgeBase};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Resolution order: cities first (the most common reference), then the
/// other name-bearing kinds.
const RESOLUTION_KINDS: [EntityKind; 5] = [
    EntityKind::Destination,
    EntityKind::Attraction,
    EntityKind::Restaurant,
    EntityKind::Accommodation,
    EntityKind::Event,
];

/// Bound on knowledge-base lookups per utterance.
const MAX_LOOKUPS: usize = 16;

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9\u{0660}-\u{0669}]+").expect("static regex"));

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(today|tonight|tomorrow|monday|tuesday|wednesday|thursday|friday|saturday|sunday|demain|aujourd'hui|heute|morgen|mañana|hoy)\b|اليوم|غدا|بكرة",
    )
    .expect("static regex")
});

/// Connectors allowed inside a capitalized run.
const CONNECTORS: [&str; 8] = ["of", "the", "el", "al", "de", "la", "du", "des"];

/// A candidate span before resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub surface: String,
    pub span: (usize, usize),
}

/// The loaded tagger artifact.
pub struct EntityModel {
    edge_stopwords: HashMap<&'static str, HashSet<&'static str>>,
}

impl EntityModel {
    pub fn load() -> Self {
        let mut edge_stopwords: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
        edge_stopwords.insert(
            "en",
            [
                "tell", "what", "where", "when", "how", "show", "the", "a", "an", "is", "are",
                "me", "have", "has", "can", "could", "do", "does", "i", "you", "we", "please",
                "from", "in", "at", "to", "about", "near",
            ]
            .into_iter()
            .collect(),
        );
        edge_stopwords.insert(
            "ar",
            [
                "في", "من", "عن", "على", "إلى", "هل", "ما", "هي", "هو", "كم", "بكام", "اين",
                "أين", "متى", "تذكرة", "اخبرني", "معلومات",
            ]
            .into_iter()
            .collect(),
        );
        Self { edge_stopwords }
    }

    fn stopword(&self, language: &str, word: &str) -> bool {
        let folded = word.to_lowercase();
        self.edge_stopwords
            .get(language)
            .or_else(|| self.edge_stopwords.get("en"))
            .map(|set| set.contains(folded.as_str()))
            .unwrap_or(false)
    }

    /// Propose name-candidate spans for an utterance.
    pub fn candidates(&self, text: &str, language: &str) -> Vec<Candidate> {
        if language == "ar" {
            self.ngram_candidates(text, language)
        } else {
            self.capitalized_candidates(text, language)
        }
    }

    /// Latin script: runs of capitalized words, allowing connectors
    /// between them ("Pyramids of Giza").
    fn capitalized_candidates(&self, text: &str, language: &str) -> Vec<Candidate> {
        let tokens = tokenize(text);
        let mut candidates = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            if !starts_uppercase(&tokens[i].text) {
                i += 1;
                continue;
            }
            let start = i;
            let mut end = i;
            let mut j = i + 1;
            while j < tokens.len() {
                if starts_uppercase(&tokens[j].text) {
                    end = j;
                    j += 1;
                } else if CONNECTORS.contains(&tokens[j].text.to_lowercase().as_str())
                    && j + 1 < tokens.len()
                    && starts_uppercase(&tokens[j + 1].text)
                {
                    end = j + 1;
                    j += 2;
                } else {
                    break;
                }
            }

            // Trim stopword edges so "From Giza" proposes "Giza".
            let mut lo = start;
            let mut hi = end;
            while lo <= hi && self.stopword(language, &tokens[lo].text) {
                lo += 1;
            }
            while hi > lo && self.stopword(language, &tokens[hi].text) {
                hi -= 1;
            }
            if lo <= hi {
                let run = &tokens[lo..=hi];
                let surface = text[run[0].start..run[run.len() - 1].end].to_string();
                if surface.chars().count() >= 3 {
                    candidates.push(Candidate {
                        surface,
                        span: (run[0].start, run[run.len() - 1].end),
                    });
                }
            }
            i = end + 1;
        }
        candidates
    }

    /// Unsegmented-case fallback: token n-grams, longest first, whose
    /// edges are not stopwords.
    fn ngram_candidates(&self, text: &str, language: &str) -> Vec<Candidate> {
        let tokens = tokenize(text);
        let mut candidates = Vec::new();
        for n in (1..=4usize).rev() {
            if tokens.len() < n {
                continue;
            }
            for window in tokens.windows(n) {
                let first = &window[0];
                let last = &window[n - 1];
                if self.stopword(language, &first.text) || self.stopword(language, &last.text) {
                    continue;
                }
                let surface = text[first.start..last.end].to_string();
                if surface.chars().count() >= 3 {
                    candidates.push(Candidate {
                        surface,
                        span: (first.start, last.end),
                    });
                }
            }
        }
        candidates
    }
}

struct Token {
    text: String,
    start: usize,
    end: usize,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<(usize, String)> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_alphanumeric() || ch == '\'' || ch == '-' {
            match &mut current {
                Some((_, buffer)) => buffer.push(ch),
                None => current = Some((idx, ch.to_string())),
            }
        } else if let Some((start, buffer)) = current.take() {
            let end = idx;
            tokens.push(Token {
                text: buffer,
                start,
                end,
            });
        }
    }
    if let Some((start, buffer)) = current {
        tokens.push(Token {
            end: start + buffer.len(),
            text: buffer,
            start,
        });
    }
    tokens
}

fn starts_uppercase(word: &str) -> bool {
    word.chars().next().map(char::is_uppercase).unwrap_or(false)
}

/// Normalize Arabic-Indic digits to Western digits.
fn normalize_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => {
                char::from_digit(c as u32 - 0x0660, 10).unwrap_or(c)
            }
            _ => c,
        })
        .collect()
}

/// Tag and canonicalize every entity in the utterance.
pub async fn tag_entities(
    model: &EntityModel,
    kb: &KnowledgeBase,
    text: &str,
    language: &str,
) -> Vec<NluEntity> {
    let mut entities: Vec<NluEntity> = Vec::new();

    for m in NUMBER_RE.find_iter(text) {
        entities.push(NluEntity {
            entity_type: "number".into(),
            surface: m.as_str().to_string(),
            canonical_id: None,
            canonical_value: Some(normalize_digits(m.as_str())),
            span: (m.start(), m.end()),
        });
    }
    for m in DATE_RE.find_iter(text) {
        entities.push(NluEntity {
            entity_type: "date".into(),
            surface: m.as_str().to_string(),
            canonical_id: None,
            canonical_value: Some(m.as_str().to_lowercase()),
            span: (m.start(), m.end()),
        });
    }

    // Longest candidates first; accepted spans shadow their overlaps.
    let mut candidates = model.candidates(text, language);
    candidates.sort_by(|a, b| (b.span.1 - b.span.0).cmp(&(a.span.1 - a.span.0)));

    let mut taken: Vec<(usize, usize)> = Vec::new();
    let mut lookups = 0usize;
    for candidate in candidates {
        if lookups >= MAX_LOOKUPS {
            break;
        }
        if overlaps(&taken, candidate.span) {
            continue;
        }

        let mut resolved = false;
        for kind in RESOLUTION_KINDS {
            lookups += 1;
            match kb.resolve_entity(&candidate.surface, kind, language).await {
                Ok(Some(entity)) => {
                    entities.push(NluEntity {
                        entity_type: kind.to_string(),
                        surface: candidate.surface.clone(),
                        canonical_id: Some(entity.id),
                        canonical_value: Some(
                            entity
                                .display_name(language, kb.default_language())
                                .to_string(),
                        ),
                        span: candidate.span,
                    });
                    taken.push(candidate.span);
                    resolved = true;
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "entity resolution lookup failed");
                }
            }
            if lookups >= MAX_LOOKUPS {
                break;
            }
        }

        // Latin proper-noun spans that did not resolve are still worth
        // reporting; n-gram noise is not.
        if !resolved && language != "ar" {
            entities.push(NluEntity {
                entity_type: "mention".into(),
                surface: candidate.surface.clone(),
                canonical_id: None,
                canonical_value: None,
                span: candidate.span,
            });
            taken.push(candidate.span);
        }
    }

    entities.sort_by_key(|e| e.span.0);
    entities
}

fn overlaps(taken: &[(usize, usize)], span: (usize, usize)) -> bool {
    taken
        .iter()
        .any(|(start, end)| span.0 < *end && *start < span.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{EntityDraft, MemoryKnowledgeStore, MultilingualText};
    use crate::knowledge::KnowledgeStore;
    use std::sync::Arc;

    async fn kb() -> KnowledgeBase {
        let store = MemoryKnowledgeStore::new("en");
        store
            .create(&EntityDraft::new(
                EntityKind::Destination,
                "giza",
                MultilingualText::of("en", "Giza").with("ar", "الجيزة"),
            ))
            .await
            .unwrap();
        store
            .create(&EntityDraft::new(
                EntityKind::Attraction,
                "giza-pyramids",
                MultilingualText::of("en", "Pyramids of Giza").with("ar", "أهرامات الجيزة"),
            ))
            .await
            .unwrap();
        KnowledgeBase::new(Arc::new(store), "en")
    }

    #[tokio::test]
    async fn test_capitalized_run_resolves_attraction() {
        let kb = kb().await;
        let model = EntityModel::load();
        let entities =
            tag_entities(&model, &kb, "Tell me about the Pyramids of Giza", "en").await;

        let hit = entities
            .iter()
            .find(|e| e.entity_type == "attraction")
            .expect("attraction entity");
        assert_eq!(hit.surface, "Pyramids of Giza");
        assert!(hit.canonical_id.is_some());
        assert_eq!(hit.canonical_value.as_deref(), Some("Pyramids of Giza"));
        // "Tell" is a sentence-start stopword, not a mention.
        assert!(entities.iter().all(|e| e.surface != "Tell"));
    }

    #[tokio::test]
    async fn test_arabic_ngram_resolution() {
        let kb = kb().await;
        let model = EntityModel::load();
        let entities = tag_entities(&model, &kb, "بكام تذكرة أهرامات الجيزة؟", "ar").await;

        let hit = entities
            .iter()
            .find(|e| e.canonical_id.is_some())
            .expect("resolved entity");
        assert_eq!(hit.entity_type, "attraction");
    }

    #[tokio::test]
    async fn test_unresolved_latin_mention_keeps_surface() {
        let kb = kb().await;
        let model = EntityModel::load();
        let entities = tag_entities(&model, &kb, "Have you heard of Atlantis Park", "en").await;

        let mention = entities
            .iter()
            .find(|e| e.entity_type == "mention")
            .expect("mention entity");
        assert_eq!(mention.surface, "Atlantis Park");
        assert!(mention.canonical_id.is_none());
        assert!(mention.canonical_value.is_none());
    }

    #[tokio::test]
    async fn test_numbers_and_dates() {
        let kb = kb().await;
        let model = EntityModel::load();
        let entities = tag_entities(&model, &kb, "book 2 tickets for tomorrow", "en").await;

        assert!(entities
            .iter()
            .any(|e| e.entity_type == "number" && e.canonical_value.as_deref() == Some("2")));
        assert!(entities
            .iter()
            .any(|e| e.entity_type == "date" && e.canonical_value.as_deref() == Some("tomorrow")));
    }

    #[tokio::test]
    async fn test_arabic_digits_normalized() {
        let kb = kb().await;
        let model = EntityModel::load();
        let entities = tag_entities(&model, &kb, "احجز ٣ تذاكر", "ar").await;
        let number = entities
            .iter()
            .find(|e| e.entity_type == "number")
            .expect("number entity");
        assert_eq!(number.canonical_value.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_entities_ordered_by_position() {
        let kb = kb().await;
        let model = EntityModel::load();
        let entities =
            tag_entities(&model, &kb, "From Giza take 2 buses tomorrow", "en").await;
        let spans: Vec<usize> = entities.iter().map(|e| e.span.0).collect();
        let mut sorted = spans.clone();
        sorted.sort_unstable();
        assert_eq!(spans, sorted);
    }
}
