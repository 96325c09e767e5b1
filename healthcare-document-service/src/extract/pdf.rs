use lopdf::Document;
use tracing::{debug, warn};

use super::ExtractionError;

/// Concatenate the text layer of every page, in page order.
///
/// Pages without a decodable text layer are skipped; only a document that
/// cannot be loaded at all is an error.
pub fn extract_from_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    let document = Document::load_mem(bytes).map_err(|e| ExtractionError::Pdf(e.to_string()))?;

    let pages = document.get_pages();
    debug!(pages = pages.len(), "Loaded PDF");

    let mut text = String::new();
    for page_number in pages.keys() {
        match document.extract_text(&[*page_number]) {
            Ok(page_text) if !page_text.trim().is_empty() => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Ok(_) => debug!(page = page_number, "Page has no text layer"),
            Err(e) => warn!(page = page_number, error = %e, "Skipping unreadable page"),
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Object, Stream, dictionary};

    /// Builds a minimal PDF with one Helvetica text line per page.
    fn make_test_pdf(page_texts: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::new();
        for text in page_texts {
            let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn extracts_pages_in_order() {
        let pdf = make_test_pdf(&["Patient Name Asha Rao", "Policy HDFC123456789"]);
        let text = extract_from_pdf(&pdf).unwrap();

        let name_at = text.find("Asha").expect("first page text");
        let policy_at = text.find("HDFC123456789").expect("second page text");
        assert!(name_at < policy_at);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn garbage_is_a_pdf_error() {
        let result = extract_from_pdf(b"%PDF-nope");
        assert!(matches!(result, Err(ExtractionError::Pdf(_))));
    }
}
