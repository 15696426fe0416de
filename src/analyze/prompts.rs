// src/analyze/prompts.rs
//! Prompt templates for the analysis sections. Every prompt demands a bare
//! JSON object; the fallback runner strips stray code fences anyway.

pub const BASE_SYSTEM: &str = "You are a careful content analyst. Respond with a single JSON \
object matching the requested schema exactly. Do not wrap the JSON in markdown. Do not add \
commentary outside the JSON.";

pub const TRANSLATE_SYSTEM: &str = "You are a precise translator. Translate the string values of \
the JSON object into the requested language. Preserve the JSON structure and keys exactly. Leave \
null values as null. Never translate proper nouns, timestamps, or uppercase enum-like tokens. \
Respond with the translated JSON object only.";

pub fn tone(source: &str) -> String {
    format!(
        "Identify the overall tone of the content (e.g. informative, promotional, alarmist, \
conversational).\nSchema: {{\"tone\": string}}\n\n{source}"
    )
}

pub fn topics(source: &str) -> String {
    format!(
        "Extract up to 5 short web-search queries that would help verify the factual claims made \
in the content.\nSchema: {{\"topics\": [string]}}\n\n{source}"
    )
}

pub fn overview(source: &str) -> String {
    format!(
        "Write an overview of the content: a 2-3 sentence synopsis and the key points.\nSchema: \
{{\"synopsis\": string, \"key_points\": [string]}}\n\n{source}"
    )
}

pub fn triage(source: &str) -> String {
    format!(
        "Triage the content quality. quality_score is 0-100. clickbait is one of \"low\", \
\"medium\", \"high\". category is a short label such as \"tutorial\", \"news\", \"opinion\". \
rationale explains the scores; recommendation tells the reader whether the content is worth \
their time.\nSchema: {{\"quality_score\": number, \"clickbait\": string, \"category\": string, \
\"rationale\": string, \"recommendation\": string}}\n\n{source}"
    )
}

pub fn fact_check(source: &str, search_context: &str) -> String {
    let grounding = if search_context.is_empty() {
        String::new()
    } else {
        format!("\nWeb search results for grounding:\n{search_context}\n")
    };
    format!(
        "Fact-check the most important claims in the content. verdict is one of \"supported\", \
\"disputed\", \"unverified\". issue describes the problem when a claim is disputed. \
reliability_score is 0-100 for the content overall.\nSchema: {{\"claims\": [{{\"claim\": string, \
\"verdict\": string, \"issue\": string|null}}], \"reliability_score\": number}}\n{grounding}\n{source}"
    )
}

pub fn action_items(source: &str) -> String {
    format!(
        "List concrete action items a reader could take away from the content. Return an empty \
list when there are none.\nSchema: {{\"items\": [{{\"title\": string, \"description\": \
string}}]}}\n\n{source}"
    )
}

pub fn mid_summary(source: &str) -> String {
    format!(
        "Summarize the content in 2-3 paragraphs covering the main facts, arguments and \
conclusions.\nSchema: {{\"summary\": string}}\n\n{source}"
    )
}

pub fn detailed_summary(source: &str) -> String {
    format!(
        "Write a detailed, section-by-section summary of the content, preserving its structure \
and covering every substantial point.\nSchema: {{\"summary\": string}}\n\n{source}"
    )
}

pub fn tags(digest: &str) -> String {
    format!(
        "Extract 3-8 short topical tags for the analyzed content below.\nSchema: {{\"tags\": \
[string]}}\n\n{digest}"
    )
}

pub fn translate(payload_json: &str, target_language: &str) -> String {
    format!("Target language: {target_language}\n\n{payload_json}")
}
