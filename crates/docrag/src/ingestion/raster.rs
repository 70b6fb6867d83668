//! Conversion of PDF image XObjects to RGB PNG

use image::{DynamicImage, ImageFormat, RgbImage};
use lopdf::{Document as PdfDocument, Object, Stream};
use std::io::Cursor;

use super::pdf::resolve;
use crate::error::{Error, Result};

/// Color spaces we can turn into RGB
#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    /// Palette of `base` colors, packed per entry
    Indexed {
        base: Box<ColorSpace>,
        hival: usize,
        lookup: Vec<u8>,
    },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }
}

/// Decode an image XObject into PNG bytes.
///
/// Returns `Ok(None)` for images we deliberately skip: stencil masks and
/// encodings without a decoder here (JPEG 2000, JBIG2, CCITT).
pub fn to_png(filename: &str, doc: &PdfDocument, stream: &Stream) -> Result<Option<Vec<u8>>> {
    let dict = &stream.dict;

    if matches!(dict.get(b"ImageMask").and_then(|o| o.as_bool()), Ok(true)) {
        return Ok(None);
    }

    let filters = filter_names(doc, stream);
    if let Some(last) = filters.last() {
        match last.as_slice() {
            b"DCTDecode" => {
                let decoded = image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
                    .map_err(|e| Error::extraction(filename, format!("JPEG decode failed: {}", e)))?;
                return encode_png(filename, DynamicImage::ImageRgb8(decoded.to_rgb8())).map(Some);
            }
            b"JPXDecode" | b"JBIG2Decode" | b"CCITTFaxDecode" => {
                tracing::debug!(
                    "Skipping image with unsupported filter {}",
                    String::from_utf8_lossy(last)
                );
                return Ok(None);
            }
            _ => {}
        }
    }

    let width = dimension(filename, doc, stream, b"Width")?;
    let height = dimension(filename, doc, stream, b"Height")?;
    let bpc = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8) as usize;

    let Some(space) = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| parse_color_space(doc, o))
    else {
        tracing::debug!("Skipping image with unsupported color space");
        return Ok(None);
    };

    let raw = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|e| Error::extraction(filename, format!("Image stream decode failed: {}", e)))?
    };

    let samples = unpack_samples(&raw, width, height, space.components(), bpc)
        .ok_or_else(|| {
            Error::extraction(filename, format!("{}x{} image stream is truncated", width, height))
        })?;

    let rgb = to_rgb(&samples, &space, bpc);
    let buffer = RgbImage::from_raw(width as u32, height as u32, rgb)
        .ok_or_else(|| Error::extraction(filename, "RGB buffer size mismatch"))?;

    encode_png(filename, DynamicImage::ImageRgb8(buffer)).map(Some)
}

fn encode_png(filename: &str, img: DynamicImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| Error::extraction(filename, format!("PNG encode failed: {}", e)))?;
    Ok(out)
}

fn filter_names(doc: &PdfDocument, stream: &Stream) -> Vec<Vec<u8>> {
    let Some(filter) = stream.dict.get(b"Filter").ok().and_then(|o| resolve(doc, o)) else {
        return Vec::new();
    };

    match filter {
        Object::Name(name) => vec![name.clone()],
        Object::Array(items) => items
            .iter()
            .filter_map(|item| resolve(doc, item)?.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

fn dimension(filename: &str, doc: &PdfDocument, stream: &Stream, key: &[u8]) -> Result<usize> {
    stream
        .dict
        .get(key)
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_i64().ok())
        .filter(|v| *v > 0)
        .map(|v| v as usize)
        .ok_or_else(|| {
            Error::extraction(
                filename,
                format!("image has no valid {}", String::from_utf8_lossy(key)),
            )
        })
}

fn parse_color_space(doc: &PdfDocument, obj: &Object) -> Option<ColorSpace> {
    match resolve(doc, obj)? {
        Object::Name(name) => named_color_space(name),
        Object::Array(items) => {
            let family = resolve(doc, items.first()?)?.as_name().ok()?;
            match family {
                b"ICCBased" => {
                    let profile = resolve(doc, items.get(1)?)?.as_stream().ok()?;
                    let n = profile
                        .dict
                        .get(b"N")
                        .ok()
                        .and_then(|o| o.as_i64().ok())
                        .unwrap_or(3);
                    match n {
                        1 => Some(ColorSpace::Gray),
                        4 => Some(ColorSpace::Cmyk),
                        _ => Some(ColorSpace::Rgb),
                    }
                }
                b"CalRGB" | b"Lab" => Some(ColorSpace::Rgb),
                b"CalGray" => Some(ColorSpace::Gray),
                b"Indexed" | b"I" => {
                    let base = parse_color_space(doc, items.get(1)?)?;
                    let hival = resolve(doc, items.get(2)?)?.as_i64().ok()? as usize;
                    let lookup = match resolve(doc, items.get(3)?)? {
                        Object::String(bytes, _) => bytes.clone(),
                        Object::Stream(s) => s
                            .decompressed_content()
                            .unwrap_or_else(|_| s.content.clone()),
                        _ => return None,
                    };
                    if matches!(base, ColorSpace::Indexed { .. }) {
                        return None;
                    }
                    Some(ColorSpace::Indexed {
                        base: Box::new(base),
                        hival,
                        lookup,
                    })
                }
                other => named_color_space(other),
            }
        }
        _ => None,
    }
}

fn named_color_space(name: &[u8]) -> Option<ColorSpace> {
    match name {
        b"DeviceGray" | b"G" | b"CalGray" => Some(ColorSpace::Gray),
        b"DeviceRGB" | b"RGB" | b"CalRGB" => Some(ColorSpace::Rgb),
        b"DeviceCMYK" | b"CMYK" => Some(ColorSpace::Cmyk),
        _ => None,
    }
}

/// One byte per sample, rows padded to whole bytes as PDF stores them
fn unpack_samples(
    data: &[u8],
    width: usize,
    height: usize,
    components: usize,
    bpc: usize,
) -> Option<Vec<u8>> {
    let per_row = width.checked_mul(components)?;
    let total = per_row.checked_mul(height)?;

    match bpc {
        8 => data.get(..total).map(<[u8]>::to_vec),
        16 => {
            let bytes = data.get(..total.checked_mul(2)?)?;
            Some(bytes.chunks_exact(2).map(|pair| pair[0]).collect())
        }
        1 | 2 | 4 => {
            let row_bytes = (per_row * bpc).div_ceil(8);
            let data = data.get(..row_bytes.checked_mul(height)?)?;
            let mask = (1u8 << bpc) - 1;
            let mut out = Vec::with_capacity(total);
            for row in data.chunks_exact(row_bytes) {
                for i in 0..per_row {
                    let bit = i * bpc;
                    let shift = 8 - bpc - (bit % 8);
                    out.push((row[bit / 8] >> shift) & mask);
                }
            }
            Some(out)
        }
        _ => None,
    }
}

/// Palette fallback for out-of-range entries
static BLACK: [u8; 4] = [0; 4];

fn to_rgb(samples: &[u8], space: &ColorSpace, bpc: usize) -> Vec<u8> {
    let max = if bpc >= 8 { 255u32 } else { (1u32 << bpc) - 1 };
    let scale = |v: u8| ((v as u32 * 255) / max) as u8;

    match space {
        ColorSpace::Gray => samples.iter().flat_map(|&g| [scale(g); 3]).collect(),
        ColorSpace::Rgb => samples.iter().map(|&v| scale(v)).collect(),
        ColorSpace::Cmyk => samples
            .chunks_exact(4)
            .flat_map(|px| cmyk_to_rgb(scale(px[0]), scale(px[1]), scale(px[2]), scale(px[3])))
            .collect(),
        ColorSpace::Indexed { base, hival, lookup } => {
            let comps = base.components();
            samples
                .iter()
                .flat_map(|&idx| {
                    let idx = (idx as usize).min(*hival);
                    let entry = lookup
                        .get(idx * comps..(idx + 1) * comps)
                        .unwrap_or(&BLACK[..comps]);
                    match base.as_ref() {
                        ColorSpace::Gray => [entry[0]; 3],
                        ColorSpace::Cmyk => cmyk_to_rgb(entry[0], entry[1], entry[2], entry[3]),
                        _ => [entry[0], entry[1], entry[2]],
                    }
                })
                .collect()
        }
    }
}

fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let k = 255 - k as u32;
    let channel = |v: u8| ((255 - v as u32) * k / 255) as u8;
    [channel(c), channel(m), channel(y)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn image_stream(color_space: Object, bpc: i64, width: i64, content: Vec<u8>) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => 1,
                "ColorSpace" => color_space,
                "BitsPerComponent" => bpc,
            },
            content,
        )
    }

    fn decode(png: &[u8]) -> RgbImage {
        image::load_from_memory(png).unwrap().to_rgb8()
    }

    #[test]
    fn test_cmyk_becomes_rgb() {
        let doc = PdfDocument::with_version("1.5");
        let stream = image_stream("DeviceCMYK".into(), 8, 2, vec![0, 0, 0, 0, 0, 255, 255, 0]);
        let png = to_png("scan.pdf", &doc, &stream).unwrap().unwrap();
        let img = decode(&png);
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_indexed_palette_lookup() {
        let doc = PdfDocument::with_version("1.5");
        let space = Object::Array(vec![
            "Indexed".into(),
            "DeviceRGB".into(),
            1.into(),
            Object::string_literal(vec![10u8, 20, 30, 200, 100, 50]),
        ]);
        let stream = image_stream(space, 8, 3, vec![1, 0, 1]);
        let img = decode(&to_png("scan.pdf", &doc, &stream).unwrap().unwrap());
        assert_eq!(img.get_pixel(0, 0).0, [200, 100, 50]);
        assert_eq!(img.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_one_bit_gray() {
        let doc = PdfDocument::with_version("1.5");
        let stream = image_stream("DeviceGray".into(), 1, 3, vec![0b1010_0000]);
        let img = decode(&to_png("scan.pdf", &doc, &stream).unwrap().unwrap());
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(2, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_unsupported_filter_is_skipped() {
        let doc = PdfDocument::with_version("1.5");
        let mut stream = image_stream("DeviceRGB".into(), 8, 1, vec![0, 0, 0]);
        stream.dict.set("Filter", "JPXDecode");
        assert!(to_png("scan.pdf", &doc, &stream).unwrap().is_none());
    }

    #[test]
    fn test_truncated_stream_is_an_extraction_error() {
        let doc = PdfDocument::with_version("1.5");
        let stream = image_stream("DeviceRGB".into(), 8, 4, vec![1, 2, 3]);
        let err = to_png("scan.pdf", &doc, &stream).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Extraction);
        assert!(matches!(err, Error::Extraction { ref filename, .. } if filename == "scan.pdf"));
    }

    #[test]
    fn test_corrupt_jpeg_is_an_extraction_error() {
        let doc = PdfDocument::with_version("1.5");
        let mut stream = image_stream("DeviceRGB".into(), 8, 1, vec![0xff, 0xd8, 0x00]);
        stream.dict.set("Filter", "DCTDecode");
        let err = to_png("scan.pdf", &doc, &stream).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Extraction);
    }
}
