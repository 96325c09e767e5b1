use async_trait::async_trait;
use image::ImageFormat;
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;

use super::ExtractionError;
use crate::config::{AppConfig, ConfigError, OcrEngineKind};
use crate::llm::LanguageModel;

/// Optical character recognition over a single raster image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String, ExtractionError>;
}

/// OCR through the configured vision-capable language model.
pub struct VisionOcr {
    model: Arc<dyn LanguageModel>,
}

impl VisionOcr {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

/// Decode any supported raster format and re-encode it as PNG.
fn normalize_to_png(bytes: &[u8]) -> Result<Vec<u8>, ExtractionError> {
    let image = image::load_from_memory(bytes).map_err(|e| ExtractionError::Image(e.to_string()))?;

    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| ExtractionError::Image(e.to_string()))?;

    info!(
        width = image.width(),
        height = image.height(),
        "Image normalised for OCR"
    );
    Ok(buffer)
}

#[async_trait]
impl OcrEngine for VisionOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, ExtractionError> {
        let owned = image.to_vec();
        let png = tokio::task::spawn_blocking(move || normalize_to_png(&owned)).await??;

        self.model
            .transcribe_image(&png)
            .await
            .map_err(|e| ExtractionError::Ocr(e.to_string()))
    }
}

/// Local Tesseract engine.
#[cfg(feature = "tesseract")]
pub struct TesseractOcr {
    language: String,
}

#[cfg(feature = "tesseract")]
impl TesseractOcr {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

#[cfg(feature = "tesseract")]
#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, ExtractionError> {
        let owned = image.to_vec();
        let language = self.language.clone();

        tokio::task::spawn_blocking(move || {
            let mut tess = tesseract::Tesseract::new(None, Some(&language))
                .map_err(|e| ExtractionError::Ocr(format!("{e:?}")))?
                .set_image_from_mem(&owned)
                .map_err(|e| ExtractionError::Ocr(format!("{e:?}")))?;
            tess.get_text()
                .map_err(|e| ExtractionError::Ocr(format!("{e:?}")))
        })
        .await?
    }
}

/// Picks the OCR engine named in the configuration.
pub fn build_ocr_engine(
    config: &AppConfig,
    model: Arc<dyn LanguageModel>,
) -> Result<Arc<dyn OcrEngine>, ConfigError> {
    match config.ocr_engine {
        OcrEngineKind::Vision => Ok(Arc::new(VisionOcr::new(model))),
        #[cfg(feature = "tesseract")]
        OcrEngineKind::Tesseract => Ok(Arc::new(TesseractOcr::new("eng"))),
        #[cfg(not(feature = "tesseract"))]
        OcrEngineKind::Tesseract => Err(ConfigError::OcrEngineUnavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use image::{DynamicImage, RgbImage};

    fn tiny_jpeg() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
            .unwrap();
        buffer
    }

    #[test]
    fn images_are_reencoded_as_png() {
        let png = normalize_to_png(&tiny_jpeg()).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn vision_ocr_returns_the_transcription() {
        let model = Arc::new(ScriptedModel::new().with_transcription("Policy: HDFC123"));
        let ocr = VisionOcr::new(model);
        assert_eq!(ocr.recognize(&tiny_jpeg()).await.unwrap(), "Policy: HDFC123");
    }

    #[tokio::test]
    async fn undecodable_images_fail_before_calling_the_model() {
        let ocr = VisionOcr::new(Arc::new(ScriptedModel::new()));
        let result = ocr.recognize(b"not an image").await;
        assert!(matches!(result, Err(ExtractionError::Image(_))));
    }

    #[tokio::test]
    async fn model_failures_are_ocr_errors() {
        let ocr = VisionOcr::new(Arc::new(ScriptedModel::new()));
        let result = ocr.recognize(&tiny_jpeg()).await;
        assert!(matches!(result, Err(ExtractionError::Ocr(_))));
    }
}
