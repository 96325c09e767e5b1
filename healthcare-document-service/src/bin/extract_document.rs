use anyhow::{Context, Result, bail};
use clap::Parser;
use healthcare_document_service::extract::{FileKind, TextExtractor, build_ocr_engine};
use healthcare_document_service::llm::build_language_model;
use healthcare_document_service::pipeline::extract_fields;
use healthcare_document_service::{AppConfig, SourceDocumentType};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

/// Run text and field extraction over a local document and print the result as JSON.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// PDF, PNG or JPEG file to read
    path: PathBuf,

    /// Upload label, e.g. "Medical Bill" or "Insurance Card"
    #[arg(short, long, default_value = "Medical Record")]
    document_type: String,

    /// Also print the raw extracted text
    #[arg(long)]
    show_text: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let Some(document_type) = SourceDocumentType::parse(&args.document_type) else {
        bail!("Unknown document type '{}'", args.document_type);
    };

    let config = AppConfig::from_env()?;
    let model = build_language_model(&config);
    let extractor = TextExtractor::new(build_ocr_engine(&config, model.clone())?);

    let file_name = args.path.file_name().and_then(|name| name.to_str());
    let kind = FileKind::from_declared(None, file_name)?;
    let bytes = tokio::fs::read(&args.path)
        .await
        .with_context(|| format!("Failed to read {}", args.path.display()))?;

    info!(path = %args.path.display(), kind = ?kind, "Extracting document");
    let text = extractor.extract(kind, bytes).await?;
    let extraction = extract_fields(model.as_ref(), &text, document_type).await?;

    let mut output = json!({
        "tier": extraction.tier,
        "fields": extraction.fields,
    });
    if args.show_text {
        output["text"] = json!(text);
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
