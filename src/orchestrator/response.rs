//! Response generation: localized templates and suggestion chips.
//!
//! Templates expand `{placeholder}` parameters. Lookup falls back from
//! the requested language to the default language, so a partially
//! translated catalog still answers every request.

use std::collections::HashMap;

pub struct ResponseGenerator {
    /// template id → language → text.
    templates: HashMap<String, HashMap<String, String>>,
    default_language: String,
}

impl ResponseGenerator {
    pub fn new(default_language: &str) -> Self {
        Self {
            templates: builtin_templates(),
            default_language: default_language.to_string(),
        }
    }

    /// Add or override a template variant.
    pub fn set_template(&mut self, id: &str, language: &str, text: &str) {
        self.templates
            .entry(id.to_string())
            .or_default()
            .insert(language.to_string(), text.to_string());
    }

    /// Render a template in the requested language.
    pub fn render(&self, id: &str, language: &str, params: &HashMap<String, String>) -> String {
        let text = self
            .templates
            .get(id)
            .and_then(|variants| {
                variants
                    .get(language)
                    .or_else(|| variants.get(&self.default_language))
            })
            .cloned()
            .unwrap_or_else(|| {
                // An unknown template id renders as the fallback text
                // rather than leaking the id to the user.
                self.templates
                    .get("fallback")
                    .and_then(|v| v.get(&self.default_language))
                    .cloned()
                    .unwrap_or_else(|| "Sorry, I did not understand that.".into())
            });
        expand(&text, params)
    }

    /// Localize suggestion chips, dropping unknown ids.
    pub fn suggestions(&self, chips: &[String], language: &str) -> Vec<String> {
        chips
            .iter()
            .filter_map(|chip| {
                self.templates.get(chip).and_then(|variants| {
                    variants
                        .get(language)
                        .or_else(|| variants.get(&self.default_language))
                        .cloned()
                })
            })
            .collect()
    }
}

fn expand(text: &str, params: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in params {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

fn builtin_templates() -> HashMap<String, HashMap<String, String>> {
    let mut templates: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut add = |id: &str, language: &str, text: &str| {
        templates
            .entry(id.to_string())
            .or_default()
            .insert(language.to_string(), text.to_string());
    };

    add("welcome", "en", "Hello! I can help you discover attractions, plan visits and answer practical questions. What would you like to know?");
    add("welcome", "ar", "أهلاً بك! يمكنني مساعدتك في اكتشاف المعالم وتخطيط الزيارات والإجابة عن الأسئلة العملية. ماذا تريد أن تعرف؟");
    add("welcome", "fr", "Bonjour ! Je peux vous aider à découvrir les sites, planifier vos visites et répondre à vos questions pratiques. Que souhaitez-vous savoir ?");

    add("thanks", "en", "You're welcome! Anything else you'd like to know?");
    add("thanks", "ar", "على الرحب والسعة! هل هناك شيء آخر تود معرفته؟");

    add("goodbye", "en", "Goodbye, and enjoy your trip!");
    add("goodbye", "ar", "مع السلامة، ورحلة سعيدة!");

    add("fallback", "en", "Sorry, I did not quite catch that. Could you rephrase?");
    add("fallback", "ar", "عذراً، لم أفهم ذلك تماماً. هل يمكنك إعادة الصياغة؟");

    add("describe", "en", "{name}: {description}");
    add("describe", "ar", "{name}: {description}");

    add("nearby_list", "en", "Near {place} you can find: {items}.");
    add("nearby_list", "ar", "بالقرب من {place} يمكنك أن تجد: {items}.");

    add("result_list", "en", "Here is what I found: {items}.");
    add("result_list", "ar", "هذا ما وجدته: {items}.");

    add("weather_report", "en", "Current weather in {place}: {temperature}°C, wind {wind} km/h.");
    add("weather_report", "ar", "الطقس الحالي في {place}: {temperature} درجة مئوية، والرياح {wind} كم/ساعة.");

    add("booking_handoff", "en", "I can't complete bookings myself yet, but {attraction} on {date} is a great choice — an official vendor link is on its page.");
    add("booking_handoff", "ar", "لا يمكنني إتمام الحجز بنفسي بعد، لكن {attraction} في {date} اختيار رائع — رابط الحجز الرسمي موجود في صفحته.");

    add("no_information", "en", "I'm sorry, I don't have information about that yet.");
    add("no_information", "ar", "عذراً، ليست لدي معلومات عن ذلك بعد.");

    add("apology_timeout", "en", "I'm sorry, that took longer than expected. Please try again.");
    add("apology_timeout", "ar", "عذراً، استغرق ذلك وقتاً أطول من المتوقع. من فضلك حاول مرة أخرى.");

    add("apology_error", "en", "Something went wrong on my side. Please try again in a moment.");
    add("apology_error", "ar", "حدث خطأ من جهتي. من فضلك حاول مرة أخرى بعد قليل.");

    add("service_unavailable", "en", "That service is unavailable right now. Please try again shortly.");
    add("service_unavailable", "ar", "هذه الخدمة غير متاحة حالياً. من فضلك حاول مرة أخرى بعد قليل.");

    add("prompt.attraction", "en", "Which attraction are you interested in?");
    add("prompt.attraction", "ar", "أي معلم يهمك؟");
    add("prompt.place", "en", "Which city or area do you mean?");
    add("prompt.place", "ar", "أي مدينة أو منطقة تقصد؟");
    add("prompt.date", "en", "For which date?");
    add("prompt.date", "ar", "في أي تاريخ؟");

    add("chip.attractions", "en", "Top attractions");
    add("chip.attractions", "ar", "أشهر المعالم");
    add("chip.practical", "en", "Practical tips");
    add("chip.practical", "ar", "نصائح عملية");
    add("chip.events", "en", "What's on");
    add("chip.events", "ar", "الفعاليات الحالية");
    add("chip.nearby", "en", "What's nearby");
    add("chip.nearby", "ar", "أماكن قريبة");
    add("chip.prices", "en", "Ticket prices");
    add("chip.prices", "ar", "أسعار التذاكر");
    add("chip.restaurants", "en", "Where to eat");
    add("chip.restaurants", "ar", "أماكن الطعام");
    add("chip.hotels", "en", "Where to stay");
    add("chip.hotels", "ar", "أماكن الإقامة");

    templates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_expands_placeholders() {
        let generator = ResponseGenerator::new("en");
        let text = generator.render(
            "describe",
            "en",
            &params(&[("name", "Pyramids"), ("description", "Ancient wonder")]),
        );
        assert_eq!(text, "Pyramids: Ancient wonder");
    }

    #[test]
    fn test_language_fallback_chain() {
        let generator = ResponseGenerator::new("en");
        // German has no "thanks" variant; English fills in.
        let text = generator.render("thanks", "de", &HashMap::new());
        assert!(text.starts_with("You're welcome"));
    }

    #[test]
    fn test_arabic_variant_selected() {
        let generator = ResponseGenerator::new("en");
        let text = generator.render("welcome", "ar", &HashMap::new());
        assert!(text.contains("أهلاً"));
    }

    #[test]
    fn test_unknown_template_renders_fallback_not_id() {
        let generator = ResponseGenerator::new("en");
        let text = generator.render("nonexistent.template", "en", &HashMap::new());
        assert!(!text.contains("nonexistent"));
        assert!(text.to_lowercase().contains("sorry"));
    }

    #[test]
    fn test_greeting_starts_with_greeting_word() {
        let generator = ResponseGenerator::new("en");
        let text = generator.render("welcome", "en", &HashMap::new());
        assert!(text.starts_with("Hello"));
    }

    #[test]
    fn test_suggestions_localized_and_unknown_dropped() {
        let generator = ResponseGenerator::new("en");
        let chips = vec![
            "chip.attractions".to_string(),
            "chip.unknown".to_string(),
            "chip.events".to_string(),
        ];
        let en = generator.suggestions(&chips, "en");
        assert_eq!(en, vec!["Top attractions", "What's on"]);
        let ar = generator.suggestions(&chips, "ar");
        assert_eq!(ar[0], "أشهر المعالم");
    }

    #[test]
    fn test_override_template() {
        let mut generator = ResponseGenerator::new("en");
        generator.set_template("welcome", "en", "Hi {name}!");
        let text = generator.render("welcome", "en", &params(&[("name", "Omar")]));
        assert_eq!(text, "Hi Omar!");
    }
}
