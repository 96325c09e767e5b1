use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::form::FormDefaults;

/// Placeholder the model is told to emit for anything it cannot find.
pub const NOT_FOUND: &str = "Not found";

/// The twelve claim fields the extraction pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    PatientName,
    PolicyNumber,
    DateOfBirth,
    Phone,
    Email,
    Address,
    Diagnosis,
    Treatment,
    ServiceDate,
    ProviderName,
    ClaimAmount,
    InsuranceCompany,
}

impl FieldKey {
    pub const ALL: [FieldKey; 12] = [
        FieldKey::PatientName,
        FieldKey::PolicyNumber,
        FieldKey::DateOfBirth,
        FieldKey::Phone,
        FieldKey::Email,
        FieldKey::Address,
        FieldKey::Diagnosis,
        FieldKey::Treatment,
        FieldKey::ServiceDate,
        FieldKey::ProviderName,
        FieldKey::ClaimAmount,
        FieldKey::InsuranceCompany,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::PatientName => "patient_name",
            FieldKey::PolicyNumber => "policy_number",
            FieldKey::DateOfBirth => "date_of_birth",
            FieldKey::Phone => "phone",
            FieldKey::Email => "email",
            FieldKey::Address => "address",
            FieldKey::Diagnosis => "diagnosis",
            FieldKey::Treatment => "treatment",
            FieldKey::ServiceDate => "service_date",
            FieldKey::ProviderName => "provider_name",
            FieldKey::ClaimAmount => "claim_amount",
            FieldKey::InsuranceCompany => "insurance_company",
        }
    }

    /// Title-cased key, e.g. `patient_name` -> `Patient Name`.
    pub fn label(self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn not_found() -> String {
    NOT_FOUND.to_string()
}

/// Accepts whatever scalar the model put in a slot and normalises it so that
/// every value is either a non-empty string or [`NOT_FOUND`].
fn lenient_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => not_found(),
        Value::String(s) => normalize_value(s),
        other => normalize_value(other.to_string()),
    })
}

/// Blank values become [`NOT_FOUND`]; anything else is kept as given.
pub(crate) fn normalize_value(raw: impl AsRef<str>) -> String {
    let raw = raw.as_ref();
    if raw.trim().is_empty() {
        not_found()
    } else {
        raw.to_string()
    }
}

/// Structured fields pulled out of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub patient_name: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub policy_number: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub date_of_birth: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub phone: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub email: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub address: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub diagnosis: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub treatment: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub service_date: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub provider_name: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub claim_amount: String,
    #[serde(default = "not_found", deserialize_with = "lenient_value")]
    pub insurance_company: String,
}

impl Default for ExtractedFields {
    fn default() -> Self {
        Self {
            patient_name: not_found(),
            policy_number: not_found(),
            date_of_birth: not_found(),
            phone: not_found(),
            email: not_found(),
            address: not_found(),
            diagnosis: not_found(),
            treatment: not_found(),
            service_date: not_found(),
            provider_name: not_found(),
            claim_amount: not_found(),
            insurance_company: not_found(),
        }
    }
}

impl ExtractedFields {
    fn slot(&self, key: FieldKey) -> &String {
        match key {
            FieldKey::PatientName => &self.patient_name,
            FieldKey::PolicyNumber => &self.policy_number,
            FieldKey::DateOfBirth => &self.date_of_birth,
            FieldKey::Phone => &self.phone,
            FieldKey::Email => &self.email,
            FieldKey::Address => &self.address,
            FieldKey::Diagnosis => &self.diagnosis,
            FieldKey::Treatment => &self.treatment,
            FieldKey::ServiceDate => &self.service_date,
            FieldKey::ProviderName => &self.provider_name,
            FieldKey::ClaimAmount => &self.claim_amount,
            FieldKey::InsuranceCompany => &self.insurance_company,
        }
    }

    fn slot_mut(&mut self, key: FieldKey) -> &mut String {
        match key {
            FieldKey::PatientName => &mut self.patient_name,
            FieldKey::PolicyNumber => &mut self.policy_number,
            FieldKey::DateOfBirth => &mut self.date_of_birth,
            FieldKey::Phone => &mut self.phone,
            FieldKey::Email => &mut self.email,
            FieldKey::Address => &mut self.address,
            FieldKey::Diagnosis => &mut self.diagnosis,
            FieldKey::Treatment => &mut self.treatment,
            FieldKey::ServiceDate => &mut self.service_date,
            FieldKey::ProviderName => &mut self.provider_name,
            FieldKey::ClaimAmount => &mut self.claim_amount,
            FieldKey::InsuranceCompany => &mut self.insurance_company,
        }
    }

    /// Raw slot value, sentinel included.
    pub fn raw(&self, key: FieldKey) -> &str {
        self.slot(key)
    }

    /// Value of a field, treating the sentinel as absent.
    pub fn get(&self, key: FieldKey) -> Option<&str> {
        let value = self.slot(key).as_str();
        (value != NOT_FOUND).then_some(value)
    }

    pub fn set(&mut self, key: FieldKey, value: impl AsRef<str>) {
        *self.slot_mut(key) = normalize_value(value);
    }

    /// Fields that carry a real value, in schema order.
    pub fn present(&self) -> impl Iterator<Item = (FieldKey, &str)> + '_ {
        FieldKey::ALL
            .into_iter()
            .filter_map(|key| self.get(key).map(|value| (key, value)))
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

/// Label picked by the user for the uploaded source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceDocumentType {
    #[default]
    #[serde(rename = "Medical Record")]
    MedicalRecord,
    #[serde(rename = "Insurance Card")]
    InsuranceCard,
    #[serde(rename = "Previous Claim")]
    PreviousClaim,
    #[serde(rename = "Medical Bill")]
    MedicalBill,
    #[serde(rename = "Other")]
    Other,
}

impl SourceDocumentType {
    pub const ALL: [SourceDocumentType; 5] = [
        SourceDocumentType::MedicalRecord,
        SourceDocumentType::InsuranceCard,
        SourceDocumentType::PreviousClaim,
        SourceDocumentType::MedicalBill,
        SourceDocumentType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceDocumentType::MedicalRecord => "Medical Record",
            SourceDocumentType::InsuranceCard => "Insurance Card",
            SourceDocumentType::PreviousClaim => "Previous Claim",
            SourceDocumentType::MedicalBill => "Medical Bill",
            SourceDocumentType::Other => "Other",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(label.trim()))
    }
}

impl fmt::Display for SourceDocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of letter the drafting pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LetterType {
    #[default]
    #[serde(rename = "Insurance Claim Letter")]
    InsuranceClaimLetter,
    #[serde(rename = "Appeal Letter")]
    AppealLetter,
    #[serde(rename = "Prior Authorization Request")]
    PriorAuthorizationRequest,
    #[serde(rename = "Reimbursement Claim")]
    ReimbursementClaim,
    #[serde(rename = "Medical Necessity Letter")]
    MedicalNecessityLetter,
    #[serde(rename = "Coverage Determination Appeal")]
    CoverageDeterminationAppeal,
}

impl LetterType {
    pub const ALL: [LetterType; 6] = [
        LetterType::InsuranceClaimLetter,
        LetterType::AppealLetter,
        LetterType::PriorAuthorizationRequest,
        LetterType::ReimbursementClaim,
        LetterType::MedicalNecessityLetter,
        LetterType::CoverageDeterminationAppeal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LetterType::InsuranceClaimLetter => "Insurance Claim Letter",
            LetterType::AppealLetter => "Appeal Letter",
            LetterType::PriorAuthorizationRequest => "Prior Authorization Request",
            LetterType::ReimbursementClaim => "Reimbursement Claim",
            LetterType::MedicalNecessityLetter => "Medical Necessity Letter",
            LetterType::CoverageDeterminationAppeal => "Coverage Determination Appeal",
        }
    }
}

impl fmt::Display for LetterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientData {
    pub name: String,
    pub policy_number: String,
    pub date_of_birth: NaiveDate,
    pub contact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimDetails {
    pub service_date: NaiveDate,
    pub diagnosis: String,
    pub treatment: String,
    /// Already formatted, e.g. `₹45,000.00` or `Not specified`.
    pub amount: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub letter_type: LetterType,
    pub patient_name: String,
    pub generated_at: DateTime<Local>,
    pub body: String,
}

impl GeneratedDocument {
    pub fn title(&self) -> &'static str {
        self.letter_type.as_str()
    }
}

/// Claim form as submitted by the user when asking for a letter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimForm {
    #[serde(default)]
    pub letter_type: LetterType,
    #[serde(default)]
    pub patient_name: String,
    #[serde(default)]
    pub policy_number: String,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub contact_info: String,
    pub service_date: NaiveDate,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub treatment: String,
    #[serde(default)]
    pub claim_amount: f64,
    #[serde(default)]
    pub reason: String,
}

/// Which tier of the field extraction pipeline produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    Structured,
    LineFallback,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisplayField {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub session_id: String,
    pub source_document_type: SourceDocumentType,
    pub tier: ExtractionTier,
    pub extracted_chars: usize,
    pub fields: ExtractedFields,
    pub display: Vec<DisplayField>,
    pub form: FormDefaults,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FormResponse {
    pub session_id: String,
    pub fields: Option<ExtractedFields>,
    pub form: FormDefaults,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub session_id: String,
    pub title: String,
    pub date: String,
    pub body: String,
    pub file_name: String,
    pub download_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_are_title_cased_keys() {
        assert_eq!(FieldKey::PatientName.label(), "Patient Name");
        assert_eq!(FieldKey::DateOfBirth.label(), "Date Of Birth");
        assert_eq!(FieldKey::Email.label(), "Email");
    }

    #[test]
    fn missing_null_and_blank_values_become_sentinel() {
        let fields: ExtractedFields = serde_json::from_value(json!({
            "patient_name": "Asha Rao",
            "policy_number": null,
            "phone": "   ",
            "claim_amount": 45000,
            "unknown_key": "ignored"
        }))
        .unwrap();

        assert_eq!(fields.get(FieldKey::PatientName), Some("Asha Rao"));
        assert_eq!(fields.raw(FieldKey::PolicyNumber), NOT_FOUND);
        assert_eq!(fields.raw(FieldKey::Phone), NOT_FOUND);
        assert_eq!(fields.raw(FieldKey::Email), NOT_FOUND);
        assert_eq!(fields.get(FieldKey::ClaimAmount), Some("45000"));
    }

    #[test]
    fn padded_values_survive_a_round_trip() {
        let source = json!({
            "patient_name": " Asha Rao ",
            "diagnosis": "Dengue fever\n",
            "address": "  12 MG Road"
        });
        let fields: ExtractedFields = serde_json::from_value(source).unwrap();

        assert_eq!(fields.get(FieldKey::PatientName), Some(" Asha Rao "));
        assert_eq!(fields.get(FieldKey::Diagnosis), Some("Dengue fever\n"));

        let value = serde_json::to_value(&fields).unwrap();
        assert_eq!(value["patient_name"], " Asha Rao ");
        assert_eq!(value["address"], "  12 MG Road");
    }

    #[test]
    fn serializes_exactly_twelve_keys() {
        let value = serde_json::to_value(ExtractedFields::default()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 12);
        for key in FieldKey::ALL {
            assert_eq!(object[key.as_str()], json!(NOT_FOUND));
        }
    }

    #[test]
    fn sentinel_counts_as_absent() {
        let mut fields = ExtractedFields::default();
        assert!(fields.is_empty());
        fields.set(FieldKey::Diagnosis, "Dengue fever");
        fields.set(FieldKey::Treatment, " \t ");
        assert_eq!(fields.get(FieldKey::Diagnosis), Some("Dengue fever"));
        assert_eq!(fields.get(FieldKey::Treatment), None);
        assert_eq!(fields.present().count(), 1);
    }

    #[test]
    fn letter_types_use_display_names_on_the_wire() {
        let parsed: LetterType = serde_json::from_value(json!("Appeal Letter")).unwrap();
        assert_eq!(parsed, LetterType::AppealLetter);
        assert_eq!(
            serde_json::to_value(LetterType::MedicalNecessityLetter).unwrap(),
            json!("Medical Necessity Letter")
        );
        assert_eq!(
            SourceDocumentType::parse("insurance card"),
            Some(SourceDocumentType::InsuranceCard)
        );
        assert_eq!(SourceDocumentType::parse("passport"), None);
    }
}
