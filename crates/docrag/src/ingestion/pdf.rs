//! PDF page text and embedded image discovery

use lopdf::{Dictionary, Document as PdfDocument, Object, ObjectId};
use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::raster;
use crate::error::{Error, Result};

/// Seconds to wait on pdf-extract before falling back to lopdf
const EXTRACT_TIMEOUT_SECS: u64 = 60;

/// Nested form XObjects are followed this deep
const MAX_FORM_DEPTH: usize = 4;

/// A parsed PDF with its page tree resolved
pub struct PdfFile {
    doc: PdfDocument,
    /// Page object ids in document order
    pages: Vec<ObjectId>,
}

impl PdfFile {
    /// Parse PDF bytes
    pub fn load(filename: &str, data: &[u8]) -> Result<Self> {
        let doc = PdfDocument::load_mem(data)
            .map_err(|e| Error::extraction(filename, format!("Failed to load PDF: {}", e)))?;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(Error::extraction(filename, "PDF has no pages"));
        }

        Ok(Self { doc, pages })
    }

    /// Number of pages
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Plain text of every page, in order.
    ///
    /// pdf-extract gives the best layout, but it can hang or panic on odd
    /// fonts and occasionally reports a different page count. In those cases
    /// each page is re-read through lopdf so no page goes missing.
    pub fn page_texts(&self, filename: &str, data: &[u8]) -> Vec<String> {
        match extract_by_pages_with_timeout(data) {
            Some(texts) if texts.len() == self.pages.len() => {
                texts.into_iter().map(|t| clean_text(&t)).collect()
            }
            Some(texts) => {
                tracing::warn!(
                    "{}: pdf-extract returned {} pages, expected {}; using lopdf text",
                    filename,
                    texts.len(),
                    self.pages.len()
                );
                self.lopdf_texts(filename)
            }
            None => self.lopdf_texts(filename),
        }
    }

    fn lopdf_texts(&self, filename: &str) -> Vec<String> {
        (1..=self.pages.len() as u32)
            .map(|page_num| match self.doc.extract_text(&[page_num]) {
                Ok(text) => clean_text(&text),
                Err(e) => {
                    tracing::warn!("{}: no text on page {}: {}", filename, page_num, e);
                    String::new()
                }
            })
            .collect()
    }

    /// PNG-encoded RGB images drawn on a page (0-indexed)
    pub fn page_images(&self, filename: &str, index: usize) -> Vec<Vec<u8>> {
        let Some(&page_id) = self.pages.get(index) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut images = Vec::new();

        if let Some(resources) = self.page_resources(page_id) {
            self.collect_images(resources, 0, &mut seen, &mut images, filename, index + 1);
        }

        images
    }

    /// Resources of a page, inherited from the page tree when absent
    fn page_resources(&self, page_id: ObjectId) -> Option<&Dictionary> {
        let mut node = self.doc.get_dictionary(page_id).ok()?;

        for _ in 0..32 {
            if let Ok(resources) = node.get(b"Resources") {
                return self.resolve(resources)?.as_dict().ok();
            }
            let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
            node = self.doc.get_dictionary(parent).ok()?;
        }

        None
    }

    fn collect_images(
        &self,
        resources: &Dictionary,
        depth: usize,
        seen: &mut HashSet<ObjectId>,
        images: &mut Vec<Vec<u8>>,
        filename: &str,
        page_number: usize,
    ) {
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|obj| self.resolve(obj))
            .and_then(|obj| obj.as_dict().ok())
        else {
            return;
        };

        for (_, entry) in xobjects.iter() {
            let Ok(id) = entry.as_reference() else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            let Ok(stream) = self.doc.get_object(id).and_then(|obj| obj.as_stream()) else {
                continue;
            };

            match stream.dict.get(b"Subtype").and_then(|s| s.as_name()) {
                Ok(b"Image") => match raster::to_png(filename, &self.doc, stream) {
                    Ok(Some(png)) => images.push(png),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(
                        "{}: skipping image on page {}: {}",
                        filename,
                        page_number,
                        e
                    ),
                },
                Ok(b"Form") if depth < MAX_FORM_DEPTH => {
                    if let Some(nested) = stream
                        .dict
                        .get(b"Resources")
                        .ok()
                        .and_then(|obj| self.resolve(obj))
                        .and_then(|obj| obj.as_dict().ok())
                    {
                        self.collect_images(nested, depth + 1, seen, images, filename, page_number);
                    }
                }
                _ => {}
            }
        }
    }

    fn resolve<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        resolve(&self.doc, obj)
    }
}

/// Follow one level of indirection
pub(crate) fn resolve<'a>(doc: &'a PdfDocument, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Run pdf-extract on its own thread so a hang or panic cannot take the caller down
fn extract_by_pages_with_timeout(data: &[u8]) -> Option<Vec<String>> {
    let data_vec = data.to_vec();
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let result = pdf_extract::extract_text_from_mem_by_pages(&data_vec);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(Duration::from_secs(EXTRACT_TIMEOUT_SECS)) {
        Ok(Ok(pages)) => {
            let _ = handle.join();
            Some(pages)
        }
        Ok(Err(e)) => {
            let _ = handle.join();
            tracing::warn!("pdf-extract failed: {}, using lopdf", e);
            None
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::error!("pdf-extract timed out after {}s", EXTRACT_TIMEOUT_SECS);
            None
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            tracing::error!("pdf-extract thread panicked");
            None
        }
    }
}

/// Drop NUL bytes and trailing whitespace on each line
fn clean_text(text: &str) -> String {
    text.replace('\0', "")
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Build a PDF with one page per entry; each page shows its text and,
    /// when `with_image` is set, draws a 2x2 RGB image.
    pub fn build_pdf(pages: &[(&str, bool)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255],
        ));

        let mut kids = Vec::new();
        for (text, with_image) in pages {
            let mut operations = vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ];
            let mut xobjects = lopdf::Dictionary::new();
            if *with_image {
                operations.extend([
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![100.into(), 0.into(), 0.into(), 100.into(), 72.into(), 500.into()],
                    ),
                    Operation::new("Do", vec!["Im1".into()]),
                    Operation::new("Q", vec![]),
                ]);
                xobjects.set("Im1", image_id);
            }

            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().unwrap_or_default(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                    "XObject" => xobjects,
                },
            });
            kids.push(Object::Reference(page_id));
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

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }
}
