//! Intent classification and per-intent prompt guidance.
//!
//! The production classifier is an external collaborator; this keyword
//! matcher is good enough for routing and for tests. Guidance snippets are
//! injected into the loop engine's prompt so the model approaches symptom
//! consultations differently from appointment questions.

use serde::{Deserialize, Serialize};

/// The coarse intent of a user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SymptomConsult,
    HealthEducation,
    AppointmentInfo,
    General,
}

impl Intent {
    /// Stable string tag, used on intent events and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::SymptomConsult => "symptom_consult",
            Intent::HealthEducation => "health_education",
            Intent::AppointmentInfo => "appointment_info",
            Intent::General => "general",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const SYMPTOM_KEYWORDS: &[&str] = &[
    "pain", "ache", "hurts", "fever", "cough", "dizzy", "nausea", "symptom", "疼", "痛", "头疼",
    "头痛", "发烧", "咳嗽", "恶心", "症状", "不舒服",
];

const EDUCATION_KEYWORDS: &[&str] = &[
    "what is", "how does", "explain", "difference between", "是什么", "为什么", "怎么预防",
];

const APPOINTMENT_KEYWORDS: &[&str] = &[
    "appointment", "book", "schedule", "doctor available", "预约", "挂号", "门诊",
];

/// Classify a user message by keyword lists, most specific intent first.
pub fn classify_intent(message: &str) -> Intent {
    let lower = message.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if contains_any(APPOINTMENT_KEYWORDS) {
        Intent::AppointmentInfo
    } else if contains_any(SYMPTOM_KEYWORDS) {
        Intent::SymptomConsult
    } else if contains_any(EDUCATION_KEYWORDS) {
        Intent::HealthEducation
    } else {
        Intent::General
    }
}

/// The guidance snippet injected into the prompt for an intent.
pub fn guidance_for(intent: Intent) -> &'static str {
    match intent {
        Intent::SymptomConsult => {
            "The user is describing symptoms. Look up relevant medical knowledge before \
             answering. Ask a follow-up question if the description is too vague to assess. \
             Always recommend seeing a clinician for severe or persistent symptoms; never \
             diagnose."
        }
        Intent::HealthEducation => {
            "The user wants to understand a health topic. Ground the answer in knowledge \
             lookups and keep the explanation accessible to a non-specialist."
        }
        Intent::AppointmentInfo => {
            "The user is asking about appointments or clinic logistics. Answer from known \
             information and ask a follow-up question for missing details such as preferred \
             time or department."
        }
        Intent::General => {
            "Answer helpfully and concisely. Use the available tools when the question \
             touches health topics."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_headache_is_symptom_consult() {
        assert_eq!(classify_intent("我头疼"), Intent::SymptomConsult);
    }

    #[test]
    fn english_symptom() {
        assert_eq!(
            classify_intent("I have a fever and a cough"),
            Intent::SymptomConsult
        );
    }

    #[test]
    fn appointment_beats_symptom() {
        // "book" is checked before symptom keywords
        assert_eq!(
            classify_intent("I want to book a doctor for my headache 预约"),
            Intent::AppointmentInfo
        );
    }

    #[test]
    fn education_question() {
        assert_eq!(
            classify_intent("What is hypertension?"),
            Intent::HealthEducation
        );
    }

    #[test]
    fn fallback_is_general() {
        assert_eq!(classify_intent("hello there"), Intent::General);
    }

    #[test]
    fn intent_tags_are_stable() {
        assert_eq!(Intent::SymptomConsult.as_str(), "symptom_consult");
        assert_eq!(Intent::General.to_string(), "general");
    }

    #[test]
    fn every_intent_has_guidance() {
        for intent in [
            Intent::SymptomConsult,
            Intent::HealthEducation,
            Intent::AppointmentInfo,
            Intent::General,
        ] {
            assert!(!guidance_for(intent).is_empty());
        }
    }
}
