//! Language detection.
//!
//! A small fixed model: script ranges decide non-Latin languages
//! outright, and Latin text is scored against per-language stopword
//! lexicons. Well under the 5 ms budget for any accepted utterance.

use std::collections::{HashMap, HashSet};

/// One detection outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLanguage {
    pub language: String,
    pub confidence: f32,
}

/// The loaded detector artifact.
pub struct LanguageModel {
    lexicons: HashMap<&'static str, HashSet<&'static str>>,
    default_language: String,
}

impl LanguageModel {
    pub fn load(default_language: &str) -> Self {
        let mut lexicons: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
        lexicons.insert(
            "en",
            [
                "the", "is", "are", "a", "an", "of", "to", "in", "what", "where", "when", "how",
                "me", "i", "you", "can", "about", "tell", "show", "much", "open", "ticket", "and",
                "for", "near", "best",
            ]
            .into_iter()
            .collect(),
        );
        lexicons.insert(
            "fr",
            [
                "le", "la", "les", "un", "une", "des", "est", "sont", "je", "vous", "quel",
                "quelle", "où", "comment", "combien", "pour", "dans", "avec", "près", "de", "du",
                "billet", "heures",
            ]
            .into_iter()
            .collect(),
        );
        lexicons.insert(
            "de",
            [
                "der", "die", "das", "ein", "eine", "ist", "sind", "ich", "sie", "wo", "wann",
                "wie", "was", "viel", "für", "mit", "nach", "und", "öffnungszeiten", "eintritt",
                "nähe",
            ]
            .into_iter()
            .collect(),
        );
        lexicons.insert(
            "es",
            [
                "el", "la", "los", "las", "un", "una", "es", "son", "yo", "usted", "dónde",
                "cuándo", "cómo", "qué", "cuánto", "para", "con", "cerca", "de", "del", "entrada",
                "horario",
            ]
            .into_iter()
            .collect(),
        );

        Self {
            lexicons,
            default_language: default_language.to_string(),
        }
    }

    /// Detect the utterance language with a confidence in [0, 1].
    pub fn detect(&self, text: &str) -> DetectedLanguage {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return DetectedLanguage {
                language: self.default_language.clone(),
                confidence: 0.0,
            };
        }

        // Script pass: Arabic is unambiguous from code points alone.
        let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
        if !letters.is_empty() {
            let arabic = letters.iter().filter(|c| is_arabic(**c)).count();
            let share = arabic as f32 / letters.len() as f32;
            if share >= 0.5 {
                return DetectedLanguage {
                    language: "ar".into(),
                    confidence: share,
                };
            }
        }

        // Lexicon pass over Latin text.
        let words: Vec<String> = trimmed
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != 'ö' && c != 'ü' && c != 'ä')
            .filter(|w| !w.is_empty())
            .map(String::from)
            .collect();
        if words.is_empty() {
            return DetectedLanguage {
                language: self.default_language.clone(),
                confidence: 0.0,
            };
        }

        let mut best: Option<(&str, f32)> = None;
        for (language, lexicon) in &self.lexicons {
            let hits = words.iter().filter(|w| lexicon.contains(w.as_str())).count();
            let score = hits as f32 / words.len() as f32;
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((*language, score));
            }
        }

        match best {
            Some((language, score)) if score > 0.0 => DetectedLanguage {
                language: language.to_string(),
                // One stopword in a short utterance is strong evidence;
                // scale so that ~1/3 stopword density saturates.
                confidence: (score * 3.0).min(1.0),
            },
            _ => DetectedLanguage {
                language: self.default_language.clone(),
                confidence: 0.2,
            },
        }
    }
}

fn is_arabic(c: char) -> bool {
    matches!(c,
        '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}' | '\u{08A0}'..='\u{08FF}'
        | '\u{FB50}'..='\u{FDFF}' | '\u{FE70}'..='\u{FEFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> LanguageModel {
        LanguageModel::load("en")
    }

    #[test]
    fn test_arabic_script() {
        let d = model().detect("بكام تذكرة الأهرامات؟");
        assert_eq!(d.language, "ar");
        assert!(d.confidence >= 0.8);
    }

    #[test]
    fn test_english_stopwords() {
        let d = model().detect("What are the opening hours of the museum?");
        assert_eq!(d.language, "en");
        assert!(d.confidence >= 0.8);
    }

    #[test]
    fn test_french() {
        let d = model().detect("Où est le musée et combien coûte le billet?");
        assert_eq!(d.language, "fr");
        assert!(d.confidence >= 0.8);
    }

    #[test]
    fn test_german() {
        let d = model().detect("Wo ist das Museum und wie viel kostet der Eintritt?");
        assert_eq!(d.language, "de");
        assert!(d.confidence >= 0.8);
    }

    #[test]
    fn test_no_signal_low_confidence() {
        let d = model().detect("Giza Sphinx Karnak");
        assert!(d.confidence < 0.8);
    }

    #[test]
    fn test_empty_is_default_zero() {
        let d = model().detect("   ");
        assert_eq!(d.language, "en");
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn test_mixed_script_majority_wins() {
        let d = model().detect("ما هي مواعيد عمل المتحف المصري في القاهرة this week");
        assert_eq!(d.language, "ar");
    }
}
