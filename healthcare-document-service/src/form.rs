use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{ExtractedFields, FieldKey, GeneratedDocument};

/// Used when no date of birth could be read from the document.
pub const FALLBACK_DATE_OF_BIRTH: (i32, u32, u32) = (1990, 1, 1);

/// Values the claim form starts out with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefaults {
    pub patient_name: String,
    pub policy_number: String,
    pub date_of_birth: NaiveDate,
    pub contact_info: String,
    pub service_date: NaiveDate,
    pub diagnosis: String,
    pub treatment: String,
    pub claim_amount: f64,
    pub reason: String,
}

fn fallback_date_of_birth() -> NaiveDate {
    let (year, month, day) = FALLBACK_DATE_OF_BIRTH;
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

pub(crate) fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Code points of DIGIT ZERO for the decimal scripts an Indian claim document
/// is likely to use; each block runs zero to nine.
const DECIMAL_DIGIT_ZEROS: [u32; 12] = [
    0x0030, // ASCII
    0x0660, // Arabic-Indic
    0x06F0, // Extended Arabic-Indic
    0x0966, // Devanagari
    0x09E6, // Bengali
    0x0A66, // Gurmukhi
    0x0AE6, // Gujarati
    0x0B66, // Oriya
    0x0BE6, // Tamil
    0x0C66, // Telugu
    0x0CE6, // Kannada
    0x0D66, // Malayalam
];

fn decimal_digit(c: char) -> Option<char> {
    let code = u32::from(c);
    DECIMAL_DIGIT_ZEROS
        .iter()
        .find(|zero| (**zero..**zero + 10).contains(&code))
        .and_then(|zero| char::from_digit(code - zero, 10))
}

/// Keeps only decimal digits, so `₹45,000.50` reads as `4500050` and
/// `₹४५,०००` as `45000`.
pub(crate) fn digits_amount(value: &str) -> Option<f64> {
    let digits: String = value.chars().filter_map(decimal_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn contact_block(fields: &ExtractedFields) -> String {
    let mut contact = String::new();
    if let Some(phone) = fields.get(FieldKey::Phone) {
        contact.push_str(&format!("Phone: {phone}\n"));
    }
    if let Some(email) = fields.get(FieldKey::Email) {
        contact.push_str(&format!("Email: {email}\n"));
    }
    if let Some(address) = fields.get(FieldKey::Address) {
        contact.push_str(&format!("Address: {address}"));
    }
    contact
}

impl FormDefaults {
    pub fn empty(today: NaiveDate) -> Self {
        Self {
            patient_name: String::new(),
            policy_number: String::new(),
            date_of_birth: fallback_date_of_birth(),
            contact_info: String::new(),
            service_date: today,
            diagnosis: String::new(),
            treatment: String::new(),
            claim_amount: 0.0,
            reason: String::new(),
        }
    }

    /// Derive form defaults from extracted fields.
    pub fn from_fields(fields: &ExtractedFields, today: NaiveDate) -> Self {
        let text = |key| fields.get(key).unwrap_or_default().to_string();

        Self {
            patient_name: text(FieldKey::PatientName),
            policy_number: text(FieldKey::PolicyNumber),
            date_of_birth: fields
                .get(FieldKey::DateOfBirth)
                .and_then(parse_iso_date)
                .unwrap_or_else(fallback_date_of_birth),
            contact_info: contact_block(fields),
            service_date: fields
                .get(FieldKey::ServiceDate)
                .and_then(parse_iso_date)
                .unwrap_or(today),
            diagnosis: text(FieldKey::Diagnosis),
            treatment: text(FieldKey::Treatment),
            claim_amount: fields
                .get(FieldKey::ClaimAmount)
                .and_then(digits_amount)
                .unwrap_or(0.0),
            reason: String::new(),
        }
    }
}

/// Per-session form state: the last extraction and the last generated letter.
#[derive(Debug, Clone, Default)]
pub struct FormState {
    fields: Option<ExtractedFields>,
    document: Option<GeneratedDocument>,
}

impl FormState {
    /// Replace the stored fields wholesale with a fresh extraction.
    pub fn replace_fields(&mut self, fields: ExtractedFields) {
        self.fields = Some(fields);
    }

    /// Forget the extraction and any generated letter.
    pub fn clear(&mut self) {
        self.fields = None;
        self.document = None;
    }

    pub fn fields(&self) -> Option<&ExtractedFields> {
        self.fields.as_ref()
    }

    /// Field value, with the sentinel and a missing extraction both read as `None`.
    pub fn get(&self, key: FieldKey) -> Option<&str> {
        self.fields.as_ref().and_then(|fields| fields.get(key))
    }

    pub fn prefill(&self, today: NaiveDate) -> FormDefaults {
        match &self.fields {
            Some(fields) => FormDefaults::from_fields(fields, today),
            None => FormDefaults::empty(today),
        }
    }

    pub fn set_document(&mut self, document: GeneratedDocument) {
        self.document = Some(document);
    }

    pub fn document(&self) -> Option<&GeneratedDocument> {
        self.document.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: FormState,
}

impl Session {
    pub fn new_from_id(id: String) -> Self {
        Self {
            id,
            state: FormState::default(),
        }
    }
}

/// Trait for storing and retrieving sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory session storage, lost on restart.
#[derive(Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

/// One write lock per session id. Handlers that load, mutate and save a
/// session hold it for the whole sequence, model calls included.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub fn forget(&self, session_id: &str) {
        self.locks.remove(session_id);
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
