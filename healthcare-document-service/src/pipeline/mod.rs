pub mod drafting;
pub mod fields;

pub use drafting::{draft_letter, format_inr, validate_claim_form};
pub use fields::{FieldExtraction, clean_json_response, extract_fields, parse_labelled_lines};
