//! Two-tier field extraction: a strict JSON prompt first, then a plain
//! "Label: value" prompt when the model does not return usable JSON.

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{DocGenError, Result};
use crate::llm::{GenerationConfig, LanguageModel};
use crate::models::{ExtractedFields, ExtractionTier, FieldKey, SourceDocumentType};

const STRUCTURED_TEXT_LIMIT: usize = 2000;
const FALLBACK_TEXT_LIMIT: usize = 1500;

/// Label keyword -> field, checked in order against the normalised label.
/// Provider name and insurance company are never asked for in the fallback.
const FALLBACK_RULES: [(&str, FieldKey); 10] = [
    ("name", FieldKey::PatientName),
    ("policy", FieldKey::PolicyNumber),
    ("birth", FieldKey::DateOfBirth),
    ("phone", FieldKey::Phone),
    ("email", FieldKey::Email),
    ("address", FieldKey::Address),
    ("diagnosis", FieldKey::Diagnosis),
    ("treatment", FieldKey::Treatment),
    ("service", FieldKey::ServiceDate),
    ("amount", FieldKey::ClaimAmount),
];

#[derive(Debug, Clone)]
pub struct FieldExtraction {
    pub fields: ExtractedFields,
    pub tier: ExtractionTier,
}

/// First `limit` characters (not bytes) of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn structured_prompt(text: &str, document_type: SourceDocumentType) -> String {
    format!(
        r#"Extract relevant information from the following {document_type} document text for healthcare form filling.

Document Text:
{excerpt}

IMPORTANT: You must return ONLY valid JSON format. Do not include any explanatory text before or after the JSON.

Extract and return this exact JSON structure:
{{
    "patient_name": "Full name of the patient or Not found",
    "policy_number": "Insurance policy or member ID or Not found",
    "date_of_birth": "Date of birth in YYYY-MM-DD format or Not found",
    "phone": "Phone number or Not found",
    "email": "Email address or Not found",
    "address": "Full address or Not found",
    "diagnosis": "Medical diagnosis or condition or Not found",
    "treatment": "Treatment or procedure details or Not found",
    "service_date": "Date of service in YYYY-MM-DD format or Not found",
    "provider_name": "Healthcare provider name or Not found",
    "claim_amount": "Claim amount numbers only or Not found",
    "insurance_company": "Insurance company name or Not found"
}}

Return only the JSON object, nothing else."#,
        excerpt = truncate_chars(text, STRUCTURED_TEXT_LIMIT),
    )
}

fn fallback_prompt(text: &str, document_type: SourceDocumentType) -> String {
    format!(
        r#"Extract information from this {document_type} document and provide simple answers:

Document Text:
{excerpt}

Please answer these questions based on the document:
1. Patient name:
2. Policy number:
3. Date of birth:
4. Phone number:
5. Email:
6. Address:
7. Diagnosis:
8. Treatment:
9. Service date:
10. Claim amount:

Answer "Not found" if information is not available."#,
        excerpt = truncate_chars(text, FALLBACK_TEXT_LIMIT),
    )
}

/// Strip markdown fences and slice from the first `{` to the last `}`.
///
/// Returns `None` when there is no brace pair to slice.
pub fn clean_json_response(response: &str) -> Option<&str> {
    let mut text = response.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    }
    if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

/// Parse a structured reply into fields; `None` means the tier failed.
pub fn parse_structured_reply(response: &str) -> Option<ExtractedFields> {
    let Some(json) = clean_json_response(response) else {
        warn!("No JSON object found in model reply");
        return None;
    };

    let value = match serde_json::from_str::<Value>(json) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Model reply is not valid JSON");
            return None;
        }
    };

    // An object that names none of the fields carries nothing to pre-fill.
    let names_a_field = value
        .as_object()
        .is_some_and(|object| FieldKey::ALL.iter().any(|key| object.contains_key(key.as_str())));
    if !names_a_field {
        warn!("Model reply names none of the expected fields");
        return None;
    }

    match serde_json::from_value::<ExtractedFields>(value) {
        Ok(fields) => Some(fields),
        Err(e) => {
            warn!(error = %e, "Model reply is not valid field JSON");
            None
        }
    }
}

/// Map free-form `Label: value` lines onto fields.
///
/// Lines without a colon and labels matching no keyword are ignored; a later
/// line for the same field overwrites an earlier one.
pub fn parse_labelled_lines(response: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::default();

    for line in response.trim().lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim().to_lowercase().replace(' ', "_");
        let value = value.trim().trim_matches('*').trim();

        if let Some((_, key)) = FALLBACK_RULES
            .iter()
            .find(|(keyword, _)| label.contains(*keyword))
        {
            fields.set(*key, value);
        }
    }

    fields
}

async fn extract_structured(
    model: &dyn LanguageModel,
    text: &str,
    document_type: SourceDocumentType,
) -> Option<ExtractedFields> {
    let prompt = structured_prompt(text, document_type);
    match model.generate(&prompt, &GenerationConfig::EXTRACTION).await {
        Ok(reply) => parse_structured_reply(&reply),
        Err(e) => {
            warn!(error = %e, "Structured extraction call failed");
            None
        }
    }
}

async fn extract_from_lines(
    model: &dyn LanguageModel,
    text: &str,
    document_type: SourceDocumentType,
) -> Result<ExtractedFields> {
    let prompt = fallback_prompt(text, document_type);
    let reply = model
        .generate(&prompt, &GenerationConfig::PROVIDER_DEFAULT)
        .await?;
    Ok(parse_labelled_lines(&reply))
}

/// Run the two-tier pipeline over extracted document text.
pub async fn extract_fields(
    model: &dyn LanguageModel,
    text: &str,
    document_type: SourceDocumentType,
) -> Result<FieldExtraction> {
    if let Some(fields) = extract_structured(model, text, document_type).await {
        info!(
            tier = "structured",
            present = fields.present().count(),
            "Fields extracted"
        );
        return Ok(FieldExtraction {
            fields,
            tier: ExtractionTier::Structured,
        });
    }

    warn!("JSON extraction failed, trying simple extraction");
    let fields = extract_from_lines(model, text, document_type).await?;
    if fields.is_empty() {
        warn!("Simple extraction produced no fields");
        return Err(DocGenError::Unextractable);
    }

    info!(
        tier = "line_fallback",
        present = fields.present().count(),
        "Fields extracted"
    );
    Ok(FieldExtraction {
        fields,
        tier: ExtractionTier::LineFallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::llm::testing::ScriptedModel;
    use crate::models::NOT_FOUND;
    use serde_json::json;

    const FULL_JSON: &str = r#"{
        "patient_name": "Asha Rao",
        "policy_number": "HDFC123456789",
        "date_of_birth": "1985-07-04",
        "phone": "+91 98765 43210",
        "email": "asha@example.com",
        "address": "12 MG Road, Mumbai",
        "diagnosis": "Dengue fever",
        "treatment": "Inpatient care, 4 days",
        "service_date": "2024-03-11",
        "provider_name": "City Hospital",
        "claim_amount": "45000",
        "insurance_company": "HDFC Ergo"
    }"#;

    #[test]
    fn well_formed_json_keeps_all_twelve_values() {
        let fields = parse_structured_reply(FULL_JSON).unwrap();
        let source: Value = serde_json::from_str(FULL_JSON).unwrap();
        let round_tripped = serde_json::to_value(&fields).unwrap();

        assert_eq!(round_tripped, source);
        assert_eq!(round_tripped.as_object().unwrap().len(), 12);
    }

    #[test]
    fn fenced_reply_cleans_to_identical_json() {
        let fenced = format!("```json\n{FULL_JSON}\n```");
        let bare_fenced = format!("```\n{FULL_JSON}\n```");
        assert_eq!(clean_json_response(&fenced), clean_json_response(FULL_JSON));
        assert_eq!(clean_json_response(&bare_fenced), clean_json_response(FULL_JSON));
        assert_eq!(clean_json_response(FULL_JSON), Some(FULL_JSON.trim()));
    }

    #[test]
    fn commentary_around_json_is_sliced_away() {
        let reply = "Sure! Here is the data: {\"patient_name\": \"Asha\"} Hope it helps.";
        assert_eq!(
            clean_json_response(reply),
            Some("{\"patient_name\": \"Asha\"}")
        );
    }

    #[test]
    fn missing_or_inverted_braces_fail_cleaning() {
        assert_eq!(clean_json_response("no json here"), None);
        assert_eq!(clean_json_response("{ unterminated"), None);
        assert_eq!(clean_json_response("} backwards {"), None);
        assert!(parse_structured_reply("[1, 2, 3]").is_none());
        assert!(parse_structured_reply("{ not: valid }").is_none());
    }

    #[test]
    fn labelled_line_maps_to_field() {
        let fields = parse_labelled_lines("Patient Name: Asha Rao");
        assert_eq!(fields.get(FieldKey::PatientName), Some("Asha Rao"));
        assert_eq!(fields.present().count(), 1);
    }

    #[test]
    fn lines_without_colon_or_keyword_are_ignored() {
        let fields = parse_labelled_lines("Asha Rao\nFavourite colour: blue\n\n");
        assert!(fields.is_empty());
    }

    #[test]
    fn numbered_answers_fill_ten_fields() {
        let reply = "1. Patient name: Asha Rao\n\
                     2. Policy number: HDFC123456789\n\
                     3. Date of birth: 1985-07-04\n\
                     4. Phone number: +91 98765 43210\n\
                     5. Email: asha@example.com\n\
                     6. Address: 12 MG Road, Mumbai: Flat 4\n\
                     7. Diagnosis: **Dengue fever**\n\
                     8. Treatment: IV fluids\n\
                     9. Service date: 2024-03-11\n\
                     10. Claim amount: ₹45,000";
        let fields = parse_labelled_lines(reply);

        assert_eq!(fields.get(FieldKey::PolicyNumber), Some("HDFC123456789"));
        assert_eq!(fields.get(FieldKey::Address), Some("12 MG Road, Mumbai: Flat 4"));
        assert_eq!(fields.get(FieldKey::Diagnosis), Some("Dengue fever"));
        assert_eq!(fields.get(FieldKey::ServiceDate), Some("2024-03-11"));
        assert_eq!(fields.get(FieldKey::ClaimAmount), Some("₹45,000"));
        assert_eq!(fields.present().count(), 10);
        assert_eq!(fields.raw(FieldKey::ProviderName), NOT_FOUND);
        assert_eq!(fields.raw(FieldKey::InsuranceCompany), NOT_FOUND);
    }

    #[test]
    fn first_matching_rule_wins_and_last_line_wins() {
        // "provider_name" contains "name", so it lands in patient_name.
        let fields = parse_labelled_lines("Patient name: Asha Rao\nProvider name: City Hospital");
        assert_eq!(fields.get(FieldKey::PatientName), Some("City Hospital"));
        assert_eq!(fields.get(FieldKey::ProviderName), None);
    }

    #[test]
    fn truncation_counts_characters() {
        let text = "₹".repeat(10);
        assert_eq!(truncate_chars(&text, 3), "₹₹₹");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[tokio::test]
    async fn structured_reply_is_used_directly() {
        let model = ScriptedModel::new().reply(&format!("```json\n{FULL_JSON}\n```"));
        let result = extract_fields(&model, "document text", SourceDocumentType::MedicalBill)
            .await
            .unwrap();

        assert_eq!(result.tier, ExtractionTier::Structured);
        assert_eq!(result.fields.get(FieldKey::InsuranceCompany), Some("HDFC Ergo"));
        assert_eq!(model.calls(), 1);
        assert_eq!(model.config(0), GenerationConfig::EXTRACTION);
        assert!(model.prompt(0).contains("Medical Bill document text"));
    }

    #[tokio::test]
    async fn prompts_embed_truncated_text() {
        let long_text = format!("{}{}", "a".repeat(2000), "TAIL");
        let model = ScriptedModel::new()
            .reply("not json")
            .reply("Patient name: Asha");
        extract_fields(&model, &long_text, SourceDocumentType::Other)
            .await
            .unwrap();

        assert!(model.prompt(0).contains(&"a".repeat(2000)));
        assert!(!model.prompt(0).contains("TAIL"));
        assert!(model.prompt(1).contains(&"a".repeat(1500)));
        assert!(!model.prompt(1).contains(&"a".repeat(1501)));
    }

    #[tokio::test]
    async fn malformed_reply_falls_back_to_lines() {
        let model = ScriptedModel::new()
            .reply("I could not produce JSON, sorry")
            .reply("Patient Name: Asha Rao\nPolicy number: P-77");
        let result = extract_fields(&model, "text", SourceDocumentType::InsuranceCard)
            .await
            .unwrap();

        assert_eq!(result.tier, ExtractionTier::LineFallback);
        assert_eq!(result.fields.get(FieldKey::PatientName), Some("Asha Rao"));
        assert_eq!(result.fields.get(FieldKey::PolicyNumber), Some("P-77"));
        assert_eq!(model.config(1), GenerationConfig::PROVIDER_DEFAULT);
    }

    #[tokio::test]
    async fn api_error_on_first_tier_still_falls_back() {
        let model = ScriptedModel::new()
            .fail(|| LlmError::EmptyResponse)
            .reply("Diagnosis: Fracture");
        let result = extract_fields(&model, "text", SourceDocumentType::MedicalRecord)
            .await
            .unwrap();
        assert_eq!(result.fields.get(FieldKey::Diagnosis), Some("Fracture"));
    }

    #[tokio::test]
    async fn nothing_usable_is_unextractable() {
        let model = ScriptedModel::new()
            .reply("nope")
            .reply("I am unable to read this document.");
        let result = extract_fields(&model, "text", SourceDocumentType::Other).await;
        assert!(matches!(result, Err(DocGenError::Unextractable)));
    }

    #[tokio::test]
    async fn api_error_on_fallback_is_reported() {
        let model = ScriptedModel::new()
            .reply("nope")
            .fail(|| LlmError::Timeout(std::time::Duration::from_secs(60)));
        let result = extract_fields(&model, "text", SourceDocumentType::Other).await;
        assert!(matches!(result, Err(DocGenError::Api(LlmError::Timeout(_)))));
    }

    #[test]
    fn objects_without_known_keys_fail_the_tier() {
        assert!(parse_structured_reply("{}").is_none());
        assert!(parse_structured_reply("```json\n{ }\n```").is_none());
        assert!(parse_structured_reply(r#"{"name": "Asha"}"#).is_none());
        assert!(parse_structured_reply(r#"{"patient_name": null}"#).is_some());
    }

    #[tokio::test]
    async fn empty_object_reply_falls_back_to_lines() {
        let model = ScriptedModel::new()
            .reply("{}")
            .reply("Patient name: Asha");
        let result = extract_fields(&model, "text", SourceDocumentType::MedicalRecord)
            .await
            .unwrap();

        assert_eq!(result.tier, ExtractionTier::LineFallback);
        assert_eq!(result.fields.get(FieldKey::PatientName), Some("Asha"));
        assert_eq!(model.calls(), 2);
    }

    #[test]
    fn numeric_json_values_are_kept_as_text() {
        let fields = parse_structured_reply(&json!({ "claim_amount": 45000 }).to_string()).unwrap();
        assert_eq!(fields.get(FieldKey::ClaimAmount), Some("45000"));
    }
}
