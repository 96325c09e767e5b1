use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::error::{DocGenError, Result};
use crate::llm::{GenerationConfig, LanguageModel};
use crate::models::{ClaimDetails, ClaimForm, GeneratedDocument, LetterType, PatientData};

pub const AMOUNT_NOT_SPECIFIED: &str = "Not specified";

/// `45000.0` -> `₹45,000.00`.
pub fn format_inr(amount: f64) -> String {
    let fixed = format!("{amount:.2}");
    let (whole, fraction) = fixed.split_once('.').unwrap_or((&fixed, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("₹{grouped}.{fraction}")
}

/// Check required fields and split the form into patient and claim parts.
/// Runs before any API call.
pub fn validate_claim_form(form: &ClaimForm) -> Result<(PatientData, ClaimDetails)> {
    let required = [
        ("Patient Full Name", &form.patient_name),
        ("Policy/Member ID", &form.policy_number),
        ("Diagnosis/Condition", &form.diagnosis),
        ("Treatment/Service", &form.treatment),
        ("Reason for Claim/Appeal", &form.reason),
    ];

    let mut missing: Vec<&'static str> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(label, _)| *label)
        .collect();

    if !form.claim_amount.is_finite() || form.claim_amount < 0.0 {
        missing.push("Claim Amount (zero or more)");
    }

    if !missing.is_empty() {
        warn!(missing = ?missing, "Claim form failed validation");
        return Err(DocGenError::Validation(missing));
    }

    let patient = PatientData {
        name: form.patient_name.clone(),
        policy_number: form.policy_number.clone(),
        date_of_birth: form.date_of_birth,
        contact: form.contact_info.clone(),
    };

    let amount = if form.claim_amount > 0.0 {
        format_inr(form.claim_amount)
    } else {
        AMOUNT_NOT_SPECIFIED.to_string()
    };

    let claim = ClaimDetails {
        service_date: form.service_date,
        diagnosis: form.diagnosis.clone(),
        treatment: form.treatment.clone(),
        amount,
        reason: form.reason.clone(),
    };

    Ok((patient, claim))
}

fn drafting_prompt(letter_type: LetterType, patient: &PatientData, claim: &ClaimDetails) -> String {
    format!(
        r#"Generate a professional {letter_type} based on the following information:

Patient Information:
- Name: {name}
- Policy Number: {policy}
- Date of Birth: {dob}
- Contact Information: {contact}

Claim Details:
- Service Date: {service_date}
- Diagnosis: {diagnosis}
- Treatment: {treatment}
- Claim Amount: {amount}
- Reason for Claim/Appeal: {reason}

Please generate a formal, professional document that includes:
1. Proper business letter formatting with recipient address placeholder
2. Clear statement of the claim/appeal
3. Supporting medical information and justification
4. Specific requested action
5. Professional closing with signature line

Make it persuasive yet factual, following healthcare industry standards.
The tone should be professional and respectful.
Use Indian Rupees (₹) for all monetary amounts.
Format should be suitable for Indian healthcare system."#,
        name = patient.name,
        policy = patient.policy_number,
        dob = patient.date_of_birth.format("%Y-%m-%d"),
        contact = patient.contact,
        service_date = claim.service_date.format("%Y-%m-%d"),
        diagnosis = claim.diagnosis,
        treatment = claim.treatment,
        amount = claim.amount,
        reason = claim.reason,
    )
}

/// Validate the form, ask the model for the letter and wrap the reply.
///
/// The reply text is used as-is; its structure is not checked.
pub async fn draft_letter(
    model: &dyn LanguageModel,
    form: &ClaimForm,
    now: DateTime<Local>,
) -> Result<GeneratedDocument> {
    let (patient, claim) = validate_claim_form(form)?;

    info!(letter_type = %form.letter_type, "Drafting letter");
    let prompt = drafting_prompt(form.letter_type, &patient, &claim);
    let body = model.generate(&prompt, &GenerationConfig::DRAFTING).await?;
    info!(chars = body.chars().count(), "Letter drafted");

    Ok(GeneratedDocument {
        letter_type: form.letter_type,
        patient_name: patient.name,
        generated_at: now,
        body,
    })
}
