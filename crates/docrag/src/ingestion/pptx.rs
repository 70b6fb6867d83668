//! PowerPoint (.pptx) slide text extraction

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};

use crate::error::{Error, Result};
use crate::types::Page;

const SLIDE_PREFIX: &str = "ppt/slides/slide";

/// Extract one page per slide, in presentation order
pub fn extract_slides(filename: &str, data: &[u8]) -> Result<Vec<Page>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| Error::extraction(filename, e.to_string()))?;

    let slide_paths = match presentation_order(&mut archive) {
        Some(paths) if !paths.is_empty() => paths,
        _ => numbered_slides(&archive),
    };

    if slide_paths.is_empty() {
        return Err(Error::extraction(filename, "presentation contains no slides"));
    }

    let mut pages = Vec::with_capacity(slide_paths.len());
    for (idx, path) in slide_paths.iter().enumerate() {
        let xml = read_entry(&mut archive, path)
            .ok_or_else(|| Error::extraction(filename, format!("missing slide part {}", path)))?;
        pages.push(Page::text_only(idx as u32 + 1, slide_text(&xml)));
    }

    tracing::debug!("{}: extracted {} slides", filename, pages.len());
    Ok(pages)
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut xml = String::new();
    file.read_to_string(&mut xml).ok()?;
    Some(xml)
}

/// Slide parts listed in `ppt/presentation.xml`, resolved through its relationships
fn presentation_order<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Option<Vec<String>> {
    let presentation = read_entry(archive, "ppt/presentation.xml")?;
    let rels = read_entry(archive, "ppt/_rels/presentation.xml.rels")?;

    let mut targets = HashMap::new();
    let mut reader = Reader::from_str(&rels);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("unreadable presentation relationships: {}", e);
                return None;
            }
            _ => {}
        }
    }

    let mut order = Vec::new();
    let mut reader = Reader::from_str(&presentation);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sldId" => {
                let target = relationship_id(&e).and_then(|rid| targets.get(&rid))?;
                order.push(resolve_target(target));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("unreadable presentation part: {}", e);
                return None;
            }
            _ => {}
        }
    }

    Some(order)
}

/// Relationship targets are relative to `ppt/` unless absolute
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("ppt/{}", target.trim_start_matches("./")),
    }
}

/// Attribute value by local name
fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// The namespaced `r:id` of a slide entry (the bare `id` is a slide number)
fn relationship_id(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// `ppt/slides/slideN.xml` sorted by N
fn numbered_slides<R: Read + std::io::Seek>(archive: &zip::ZipArchive<R>) -> Vec<String> {
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix(SLIDE_PREFIX)?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();

    slides.sort();
    slides.into_iter().map(|(_, name)| name).collect()
}

/// Text of every text-bearing shape, one shape after another.
///
/// Paragraphs inside a shape are separated by newlines and each shape's
/// text is followed by a newline.
fn slide_text(xml: &str) -> String {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut out = String::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut shape_depth = 0usize;
    let mut has_text_body = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sp" => {
                    shape_depth += 1;
                    if shape_depth == 1 {
                        paragraphs.clear();
                        has_text_body = false;
                    }
                }
                b"txBody" if shape_depth > 0 => has_text_body = true,
                b"p" if shape_depth > 0 => current.clear(),
                b"t" if shape_depth > 0 => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if shape_depth > 0 && e.local_name().as_ref() == b"br" {
                    current.push('\n');
                }
            }
            Ok(Event::Text(e)) if in_text => {
                if let Ok(text) = e.unescape() {
                    current.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if shape_depth > 0 => paragraphs.push(std::mem::take(&mut current)),
                b"sp" if shape_depth > 0 => {
                    shape_depth -= 1;
                    if shape_depth == 0 && has_text_body {
                        out.push_str(&paragraphs.join("\n"));
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("stopping at malformed slide XML: {}", e);
                break;
            }
            _ => {}
        }
    }

    out
}
