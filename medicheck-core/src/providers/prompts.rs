//! Prompt templates for the LLM-backed providers
//!
//! Placeholders are `{name}` tokens filled with [`fill`].

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("valid regex"));

pub const SYSTEM_PROMPT: &str = "You are MediCheck, a cautious medical triage assistant. \
Your output is educational information only and never a diagnosis. Always answer with a \
single JSON object and nothing else.";

pub const SYMPTOM_ANALYSIS: &str = r#"Analyze the patient's symptoms and provide preliminary medical information.

Patient Input:
<symptoms>
{symptoms}
</symptoms>

Medical History (if provided):
<medical_history>
{medical_history}
</medical_history>

{research}

Provide:
1. A clear, organized summary of the reported symptoms
2. 3-6 possible conditions that could explain them, most likely first
3. An urgency level: "low", "moderate" or "urgent"
4. A brief explanation of your reasoning

Urgency guidelines:
- low: mild symptoms, no immediate danger, can wait for a routine appointment
- moderate: concerning symptoms that should be addressed within 24-48 hours
- urgent: serious symptoms requiring immediate medical attention or emergency care

Red flags that always mean "urgent": severe chest pain or difficulty breathing, signs of
stroke (face drooping, arm weakness, speech difficulty), severe allergic reaction, high fever
with severe symptoms, severe abdominal pain, heavy bleeding or severe injury, sudden severe
headache, loss of consciousness or altered mental state.

Respond with JSON:
{"symptom_summary": "...", "possible_conditions": ["..."], "urgency_level": "low|moderate|urgent", "reasoning": "..."}"#;

pub const RECOMMENDATIONS: &str = r#"Translate this medical analysis into clear, actionable, patient-friendly recommendations.

Analysis:
<analysis>
{analysis}
</analysis>

Medical History:
<medical_history>
{medical_history}
</medical_history>

Previous Research:
<research>
{research}
</research>

Provide:
1. 2-4 specific immediate actions the patient should take right now
2. 3-5 general self-care recommendations
3. Clear guidance on when to contact a healthcare provider
4. Follow-up care, if applicable

Use plain language, avoid jargon, and always stress the importance of professional
medical consultation.

Respond with JSON:
{"immediate_actions": ["..."], "general_care": ["..."], "when_to_seek_help": "...", "follow_up": "..."}"#;

pub const ESCALATION: &str = r#"This case has been classified as URGENT. Provide clear escalation guidance.

Analysis:
<analysis>
{analysis}
</analysis>

Patient Recommendations:
<recommendations>
{recommendations}
</recommendations>

Provide:
1. A strong, clear message about the seriousness of the situation
2. Exactly what the patient should do right now
3. Additional warning signs that would make the situation even more critical
4. When and how to contact emergency services

Be direct without causing panic; the patient may be reading this under stress.

Respond with JSON:
{"urgency_message": "...", "immediate_action": "...", "warning_signs": ["..."], "emergency_contact": "..."}"#;

pub const RESEARCH_PLAN: &str = r#"You are deciding whether a web search would materially improve the following {purpose}.

<context>
{context}
</context>

If it would, propose at most {max_queries} short, specific search queries about medical
conditions, treatments or diagnostic criteria. If the context is routine, propose none.

Respond with JSON:
{"queries": ["..."]}"#;

/// Replace each `{key}` in `template` with its value
///
/// Substitution is a single pass over the template, so braces inside the
/// inserted values are never expanded. Unknown placeholders are left as is.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_every_placeholder() {
        let prompt = fill(
            SYMPTOM_ANALYSIS,
            &[
                ("symptoms", "sore throat"),
                ("medical_history", "none"),
                ("research", ""),
            ],
        );
        assert!(prompt.contains("<symptoms>\nsore throat\n</symptoms>"));
        assert!(!prompt.contains("{symptoms}"));
        assert!(!prompt.contains("{medical_history}"));
        // JSON braces in the template are untouched
        assert!(prompt.contains("{\"symptom_summary\""));
    }

    #[test]
    fn test_fill_does_not_expand_inserted_text() {
        let prompt = fill(
            SYMPTOM_ANALYSIS,
            &[
                ("symptoms", "pain {medical_history} since {research}"),
                ("medical_history", "SECRET_HISTORY"),
                ("research", ""),
            ],
        );
        assert_eq!(prompt.matches("SECRET_HISTORY").count(), 1);
        assert!(prompt.contains("<symptoms>\npain {medical_history} since {research}\n</symptoms>"));
    }

    #[test]
    fn test_fill_keeps_unknown_placeholders() {
        assert_eq!(fill("{a} and {b}", &[("a", "x")]), "x and {b}");
    }
}
