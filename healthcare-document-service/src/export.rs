use chrono::NaiveDate;
use docx_rs::{AlignmentType, BreakType, Docx, DocxError, Footer, Header, Paragraph, Run};
use std::io::Cursor;
use thiserror::Error;

use crate::models::{GeneratedDocument, LetterType};

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub const FOOTER_TEXT: &str = "Generated by AI Healthcare Document Generator";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write docx: {0}")]
    Docx(#[from] DocxError),
}

/// `Date: March 11, 2024`
pub fn date_line(date: NaiveDate) -> String {
    format!("Date: {}", date.format("%B %d, %Y"))
}

/// `{letter type}_{patient name}_{YYYYMMDD}.docx`, spaces as underscores.
pub fn export_filename(letter_type: LetterType, patient_name: &str, date: NaiveDate) -> String {
    format!(
        "{}_{}_{}.docx",
        letter_type,
        patient_name,
        date.format("%Y%m%d")
    )
    .replace(' ', "_")
}

fn body_paragraph(body: &str) -> Paragraph {
    let mut run = Run::new();
    for (i, line) in body.lines().enumerate() {
        if i > 0 {
            run = run.add_break(BreakType::TextWrapping);
        }
        run = run.add_text(line);
    }
    Paragraph::new().add_run(run)
}

/// Lay the letter out as a single-section `.docx` and return its bytes.
pub fn render_docx(document: &GeneratedDocument) -> Result<Vec<u8>, ExportError> {
    let header = Header::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text(
        format!("{} - {}", document.title(), document.patient_name),
    )));

    let footer = Footer::new().add_paragraph(
        Paragraph::new()
            .align(AlignmentType::Center)
            .add_run(Run::new().add_text(FOOTER_TEXT)),
    );

    let title = Paragraph::new()
        .align(AlignmentType::Center)
        .add_run(Run::new().add_text(document.title()).bold().size(32));

    let date = Paragraph::new()
        .align(AlignmentType::Right)
        .add_run(Run::new().add_text(date_line(document.generated_at.date_naive())));

    let mut buffer = Cursor::new(Vec::new());
    Docx::new()
        .header(header)
        .footer(footer)
        .add_paragraph(title)
        .add_paragraph(date)
        .add_paragraph(body_paragraph(&document.body))
        .build()
        .pack(&mut buffer)
        .map_err(DocxError::from)?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::io::Read;

    fn sample_document() -> GeneratedDocument {
        GeneratedDocument {
            letter_type: LetterType::AppealLetter,
            patient_name: "Asha Rao".to_string(),
            generated_at: Local.with_ymd_and_hms(2024, 3, 11, 10, 30, 0).unwrap(),
            body: "To the Claims Officer,\nPlease reconsider claim ₹45,000.00.\nRegards".to_string(),
        }
    }

    fn read_parts(bytes: &[u8], prefix: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut combined = String::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            if file.name().starts_with(prefix) && file.name().ends_with(".xml") {
                file.read_to_string(&mut combined).unwrap();
            }
        }
        combined
    }

    #[test]
    fn document_carries_title_date_and_body() {
        let bytes = render_docx(&sample_document()).unwrap();
        let xml = read_parts(&bytes, "word/document.xml");

        assert!(xml.contains("Appeal Letter"));
        assert!(xml.contains("Date: March 11, 2024"));
        assert!(xml.contains("To the Claims Officer,"));
        assert!(xml.contains("Please reconsider claim ₹45,000.00."));
        assert!(xml.contains("textWrapping"));
    }

    #[test]
    fn header_and_footer_parts_are_written() {
        let bytes = render_docx(&sample_document()).unwrap();

        assert!(read_parts(&bytes, "word/header").contains("Appeal Letter - Asha Rao"));
        assert!(read_parts(&bytes, "word/footer").contains(FOOTER_TEXT));
    }

    #[test]
    fn filename_uses_underscores() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert_eq!(
            export_filename(LetterType::PriorAuthorizationRequest, "Asha Rao", date),
            "Prior_Authorization_Request_Asha_Rao_20240311.docx"
        );
    }

    #[test]
    fn date_line_spells_out_the_month() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(date_line(date), "Date: January 05, 2024");
    }
}
