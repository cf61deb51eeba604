// src/ocr.rs

use crate::config::OcrConfig;
use crate::error::IntakeError;
use lopdf::{Document, Object};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

/// Turns a stored receipt document into plain text, line breaks preserved.
pub trait TextRecognizer {
    fn recognize_text(&self, pdf_path: &Path) -> Result<String, IntakeError>;
}

/// Result of attempting to read the embedded text layer of a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// Image-only pages or too little text; needs OCR.
    ScannedImage,
    /// Something went wrong during extraction.
    Error(String),
}

/// Share of image-only pages at which a document is treated as scanned.
const SCANNED_PAGE_RATIO: f64 = 0.8;

/// Classify raw PDF bytes by whether they carry a usable text layer.
///
/// Returned text starts at its first non-blank line; pdf-extract emits
/// leading line breaks that would otherwise hide the receipt header.
pub fn read_text_layer(pdf_bytes: &[u8], min_text_chars: usize) -> PdfContent {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if is_scanned(&doc) {
        return PdfContent::ScannedImage;
    }

    let raw = match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Text layer unreadable, treating as scanned");
            return PdfContent::ScannedImage;
        }
    };

    let text = skip_blank_lines(&raw);
    let visible = text.chars().filter(|c| !c.is_whitespace()).count();
    if visible < min_text_chars {
        info!(visible, min_text_chars, "Text layer too sparse, treating as scanned");
        return PdfContent::ScannedImage;
    }
    info!(visible, "Text layer extracted");
    PdfContent::Text(text.to_string())
}

/// Drop whole lines that hold only whitespace from the start of `text`.
fn skip_blank_lines(text: &str) -> &str {
    let mut rest = text;
    while let Some((line, tail)) = rest.split_once('\n') {
        if !line.trim().is_empty() {
            break;
        }
        rest = tail;
    }
    rest
}

fn is_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let image_only = pages
        .values()
        .filter(|id| page_is_image_only(doc, **id))
        .count();
    let ratio = image_only as f64 / pages.len() as f64;
    debug!(pages = pages.len(), image_only, ratio, "Scanned-page check");
    ratio >= SCANNED_PAGE_RATIO
}

/// Images in the page resources but no fonts: nothing to read without OCR.
fn page_is_image_only(doc: &Document, page_id: lopdf::ObjectId) -> bool {
    let Some(resources) = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .and_then(|page| page.get(b"Resources"))
        .and_then(|r| doc.dereference(r))
        .and_then(|(_, r)| r.as_dict())
        .ok()
    else {
        return false;
    };

    let non_empty = |key: &[u8]| {
        resources
            .get(key)
            .and_then(|o| doc.dereference(o))
            .and_then(|(_, o)| o.as_dict())
            .is_ok_and(|d| !d.is_empty())
    };
    non_empty(b"XObject".as_slice()) && !non_empty(b"Font".as_slice())
}

/// Reads the PDF's own text layer; fails for scanned documents.
pub struct PdfTextLayer {
    pub min_text_chars: usize,
}

impl TextRecognizer for PdfTextLayer {
    fn recognize_text(&self, pdf_path: &Path) -> Result<String, IntakeError> {
        let bytes = std::fs::read(pdf_path)?;
        match read_text_layer(&bytes, self.min_text_chars) {
            PdfContent::Text(text) => Ok(text),
            PdfContent::ScannedImage => Err(IntakeError::Recognition(
                "no usable text layer (scanned document)".to_string(),
            )),
            PdfContent::Error(e) => Err(IntakeError::Recognition(e)),
        }
    }
}

/// Rasterizes the first page with `pdftoppm` and reads it with `tesseract`.
pub struct TesseractOcr {
    pub pdftoppm_cmd: String,
    pub tesseract_cmd: String,
    pub language: String,
    pub dpi: u32,
}

impl TesseractOcr {
    fn run(cmd: &mut Command, what: &str) -> Result<Vec<u8>, IntakeError> {
        let output = cmd
            .output()
            .map_err(|e| IntakeError::Recognition(format!("failed to run {what}: {e}")))?;
        if !output.status.success() {
            return Err(IntakeError::Recognition(format!(
                "{what} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl TextRecognizer for TesseractOcr {
    fn recognize_text(&self, pdf_path: &Path) -> Result<String, IntakeError> {
        let workdir = tempfile::tempdir()?;
        let prefix = workdir.path().join("page");

        Self::run(
            Command::new(&self.pdftoppm_cmd)
                .args(["-png", "-singlefile", "-f", "1", "-l", "1", "-r"])
                .arg(self.dpi.to_string())
                .arg(pdf_path)
                .arg(&prefix),
            "pdftoppm",
        )?;

        let image = prefix.with_extension("png");
        let stdout = Self::run(
            Command::new(&self.tesseract_cmd)
                .arg(&image)
                .arg("stdout")
                .arg("-l")
                .arg(&self.language),
            "tesseract",
        )?;

        let text = String::from_utf8_lossy(&stdout).into_owned();
        info!(chars = text.len(), "OCR complete");
        Ok(text)
    }
}

/// Text layer first, OCR when the document has none.
pub struct LayeredRecognizer {
    pub text_layer: Option<PdfTextLayer>,
    pub ocr: TesseractOcr,
}

impl LayeredRecognizer {
    pub fn from_config(cfg: &OcrConfig) -> Self {
        Self {
            text_layer: cfg.prefer_text_layer.then(|| PdfTextLayer {
                min_text_chars: cfg.min_text_chars,
            }),
            ocr: TesseractOcr {
                pdftoppm_cmd: cfg.pdftoppm_cmd.clone(),
                tesseract_cmd: cfg.tesseract_cmd.clone(),
                language: cfg.language.clone(),
                dpi: cfg.dpi,
            },
        }
    }
}

impl TextRecognizer for LayeredRecognizer {
    fn recognize_text(&self, pdf_path: &Path) -> Result<String, IntakeError> {
        if let Some(layer) = &self.text_layer {
            match layer.recognize_text(pdf_path) {
                Ok(text) => return Ok(text),
                Err(IntakeError::Recognition(reason)) => {
                    info!(reason = %reason, "Falling back to OCR");
                }
                Err(e) => return Err(e),
            }
        }
        self.ocr.recognize_text(pdf_path)
    }
}

/// Minimal PDFs built with lopdf for tests.
#[cfg(test)]
pub(crate) mod test_pdf {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    fn finish(mut doc: Document, pages_id: lopdf::ObjectId, page_id: lopdf::ObjectId) -> Vec<u8> {
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    /// One page, one Courier text line per entry, top to bottom.
    pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });

        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 760.into()]),
        ];
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                operations.push(Operation::new("Td", vec![0.into(), (-16).into()]));
            }
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        finish(doc, pages_id, page_id)
    }

    /// One page that only paints a 1x1 grey image.
    pub fn image_only_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0x80],
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![500.into(), 0.into(), 0.into(), 700.into(), 40.into(), 60.into()],
                ),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });
        finish(doc, pages_id, page_id)
    }
}
