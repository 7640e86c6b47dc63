//! Per-kind ID3v2 frame bodies.
//!
//! Decoding is schema-driven: the frame table in the parent module maps a
//! frame id onto a target, and the target's kind decides how the body is
//! read. Anything that fails mid-frame is logged and skipped without
//! touching the rest of the tag.

use crate::core::io::BufStream;
use crate::err::{DecodeError, Result, ValidationError};
use crate::id3v2::{table, Target, Version};
use crate::meta::genres;
use crate::meta::picture::Picture;
use crate::meta::value::{Kind, Value};
use crate::meta::{kind_of, Metadata};
use crate::string::{self, Encoding};
use log::warn;
use regex::Regex;
use std::sync::OnceLock;

const ENC_LATIN1: u8 = 0x00;
const ENC_UTF16: u8 = 0x01;
const ENC_UTF16BE: u8 = 0x02;
const ENC_UTF8: u8 = 0x03;

fn encoding_from(byte: u8) -> Option<Encoding> {
    match byte {
        ENC_LATIN1 => Some(Encoding::Latin1),
        ENC_UTF16 => Some(Encoding::Utf16),
        ENC_UTF16BE => Some(Encoding::Utf16Be),
        ENC_UTF8 => Some(Encoding::Utf8),
        _ => None,
    }
}

fn genre_index_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\(([0-9]+)\)$").unwrap())
}

/// Decodes one recognized frame body into `meta`.
pub(crate) fn decode(
    meta: &mut Metadata,
    version: Version,
    id: &str,
    target: Target,
    payload: &[u8],
) {
    let outcome = match target {
        Target::Scalar(attr) => decode_scalar(meta, id, attr, payload),
        Target::Comment => decode_entry(meta, payload, true),
        Target::Lyrics => decode_entry(meta, payload, false),
        Target::Image => decode_picture(meta, version, payload),
    };

    if let Err(err) = outcome {
        warn!("{}: skipping frame ({})", id, err);
    }
}

fn decode_scalar(meta: &mut Metadata, id: &str, attr: &'static str, payload: &[u8]) -> Result<()> {
    let kind = kind_of(attr).unwrap_or(Kind::Text);

    if kind == Kind::Volume {
        return decode_volume(meta, id, payload);
    }

    let text = read_text(payload);
    if text.is_empty() {
        return Ok(());
    }

    // A "(21)" genre is an index into the genre table.
    if kind == Kind::Genre {
        if let Some(caps) = genre_index_pattern().captures(&text) {
            if let Ok(index) = caps[1].parse::<i64>() {
                meta.set(attr, index)?;
                return Ok(());
            }
        }
    }

    meta.set(attr, text)?;
    Ok(())
}

/// Reads a text body: an encoding byte then data up to the encoding's
/// terminator. A body with no recognizable encoding byte is read as
/// unterminated ASCII. Text past the first terminator is discarded.
fn read_text(payload: &[u8]) -> String {
    match payload.first() {
        Some(&byte) if byte <= ENC_UTF8 => {
            let encoding = encoding_from(byte).unwrap();
            string::read_terminated(encoding, &mut BufStream::new(&payload[1..]))
        }
        _ => {
            let body = payload.split(|&byte| byte == 0).next().unwrap_or(&[]);
            string::decode_ascii(body)
        }
    }
}

fn parse_encoding(stream: &mut BufStream) -> Result<Encoding> {
    let byte = stream.read_u8()?;

    encoding_from(byte).ok_or_else(|| {
        warn!("unrecognized text encoding {}", byte);
        DecodeError::MalformedData.into()
    })
}

/// Comment and lyrics frames: encoding, language, described key, value.
fn decode_entry(meta: &mut Metadata, payload: &[u8], comment: bool) -> Result<()> {
    let mut stream = BufStream::new(payload);

    let encoding = parse_encoding(&mut stream)?;
    let lang = string::decode_ascii(&stream.read_array::<3>()?);
    let key = string::read_terminated(encoding, &mut stream);
    let value = string::read(encoding, &mut stream);

    let key = if key.is_empty() {
        None
    } else {
        Some(key.as_str())
    };

    if comment {
        meta.set_comment(&lang, key, value)?;
    } else {
        meta.set_lyrics(&lang, key, value)?;
    }

    Ok(())
}

fn decode_picture(meta: &mut Metadata, version: Version, payload: &[u8]) -> Result<()> {
    let mut stream = BufStream::new(payload);

    let encoding = parse_encoding(&mut stream)?;

    if version == Version::V22 {
        // A fixed 3-byte format tag.
        stream.skip(3)?;
    } else {
        // A NUL-terminated MIME string.
        string::read_terminated(Encoding::Latin1, &mut stream);
    }

    let ptype = stream.read_u8()?;
    let desc = string::read_terminated(encoding, &mut stream);

    let picture = Picture::from_bytes(stream.take_rest().to_vec())
        .map_err(|err| ValidationError::new("image", err.to_string()))?;

    let key = if desc.is_empty() {
        None
    } else {
        Some(desc.as_str())
    };

    meta.set_image(key, picture, ptype)?;
    Ok(())
}

fn decode_volume(meta: &mut Metadata, id: &str, payload: &[u8]) -> Result<()> {
    let mut stream = BufStream::new(payload);

    let percent = if id == "RVA2" {
        // Identification string, then the first channel's adjustment in
        // 1/512 dB units. Further channels and peak data are not read.
        string::read_terminated(Encoding::Latin1, &mut stream);
        stream.read_u8()?;

        let db = f64::from(stream.read_be_i16()?) / 512.0;
        100.0 * (10f64.powf(db / 20.0) - 1.0)
    } else {
        // RVA/RVAD: inc/dec bitmap, bit width, right then left adjustment.
        let incdec = stream.read_u8()?;
        let bits = stream.read_u8()?;
        let width = (usize::from(bits) + 7) / 8;

        if width == 0 || width > 4 {
            return Err(DecodeError::MalformedData.into());
        }

        let mut right = read_uint(&mut stream, width)? as f64;
        if incdec & 0x01 == 0 {
            right = -right;
        }

        let mut left = read_uint(&mut stream, width)? as f64;
        if incdec & 0x02 == 0 {
            left = -left;
        }

        (right + left) / 2.0 / (((1u64 << bits) - 1) as f64) * 100.0
    };

    meta.set("volume", percent)?;
    Ok(())
}

fn read_uint(stream: &mut BufStream, width: usize) -> Result<u64> {
    Ok(stream
        .slice(width)?
        .iter()
        .fold(0u64, |sum, &byte| (sum << 8) | u64::from(byte)))
}

/// Truthiness drives which fields are written, matching how a set-but-false
/// flag or a 0.0 volume produces no frame.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(val) => *val,
        Value::Float(val) => *val != 0.0,
        Value::Int(val) => *val != 0,
        Value::Text(val) => !val.is_empty(),
        _ => true,
    }
}

/// Builds every frame payload for `version`, in frame-table order.
pub(crate) fn encode_all(
    meta: &Metadata,
    version: Version,
    preserve_unknown: bool,
) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();

    for &(id, target) in table(version) {
        match target {
            Target::Scalar(attr) => {
                if let Some(payload) = encode_scalar(meta, id, attr) {
                    out.push((id.to_string(), payload));
                }
            }
            Target::Comment => {
                for ((lang, key), value) in meta.comments() {
                    out.push((id.to_string(), encode_entry(lang, key.as_deref(), value)));
                }
            }
            Target::Lyrics => {
                for ((lang, key), value) in meta.lyrics_map() {
                    out.push((id.to_string(), encode_entry(lang, key.as_deref(), value)));
                }
            }
            Target::Image => {
                for (key, (picture, ptype)) in meta.images() {
                    let payload = encode_picture(version, key.as_deref(), picture, *ptype);
                    out.push((id.to_string(), payload));
                }
            }
        }
    }

    if preserve_unknown {
        for (id, payloads) in meta.unknown() {
            for payload in payloads {
                out.push((id.clone(), payload.clone()));
            }
        }
    }

    out
}

fn encode_scalar(meta: &Metadata, id: &str, attr: &'static str) -> Option<Vec<u8>> {
    let value = meta.get(attr)?;

    if !truthy(&value) {
        return None;
    }

    match kind_of(attr)? {
        Kind::Volume => Some(encode_volume(id, value.as_volume()?)),
        Kind::Bool => Some(render_prefixed("1")),
        Kind::Genre => {
            let text = value.as_text()?;
            let text = match genres::index(text) {
                Some(index) => format!("({})", index),
                None => text.to_string(),
            };
            Some(render_prefixed(&text))
        }
        Kind::Uint16 | Kind::Uint32 => Some(render_prefixed(&value.as_int()?.to_string())),
        Kind::Uint16X2 => {
            let (a, b) = value.as_pair()?;
            let text = if b == 0 {
                a.to_string()
            } else {
                format!("{}/{}", a, b)
            };
            Some(render_prefixed(&text))
        }
        _ => Some(render_prefixed(value.as_text()?)),
    }
}

/// Picks the minimal encoding and its prefix byte.
fn prefer(text: &str) -> (Encoding, u8) {
    match string::pick(text) {
        Encoding::Latin1 => (Encoding::Latin1, ENC_LATIN1),
        _ => (Encoding::Utf16, ENC_UTF16),
    }
}

fn render_prefixed(text: &str) -> Vec<u8> {
    let (encoding, prefix) = prefer(text);

    let mut out = vec![prefix];
    out.extend(string::render(encoding, text));
    out
}

fn lang_bytes(lang: &str) -> [u8; 3] {
    let mut out = [b' '; 3];

    for (i, &byte) in lang.as_bytes().iter().take(3).enumerate() {
        out[i] = byte;
    }

    out
}

fn encode_entry(lang: &str, key: Option<&str>, value: &Value) -> Vec<u8> {
    let key = key.unwrap_or("");
    let value = match value {
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Text(text) => text.clone(),
        other => format!("{:?}", other),
    };

    // The key and value share one encoding byte, so a non-Latin-1 side
    // promotes both to UTF-16.
    let (encoding, prefix) = match (string::pick(key), string::pick(&value)) {
        (Encoding::Latin1, Encoding::Latin1) => (Encoding::Latin1, ENC_LATIN1),
        _ => (Encoding::Utf16, ENC_UTF16),
    };

    let mut out = vec![prefix];
    out.extend(&lang_bytes(lang));
    out.extend(string::render_terminated(encoding, key));
    out.extend(string::render(encoding, &value));
    out
}

fn encode_picture(version: Version, key: Option<&str>, picture: &Picture, ptype: u8) -> Vec<u8> {
    let desc = key.unwrap_or("");
    let (encoding, prefix) = prefer(desc);

    let mut out = vec![prefix];

    if version == Version::V22 {
        out.extend(picture.format_tag().as_bytes());
    } else {
        out.extend(picture.mime().as_bytes());
        out.push(0);
    }

    out.push(ptype);
    out.extend(string::render_terminated(encoding, desc));
    out.extend(picture.data());
    out
}

fn encode_volume(id: &str, percent: f64) -> Vec<u8> {
    if id == "RVA2" {
        // Empty identification string, master channel, 1/512 dB units, no
        // peak data.
        let db = (percent / 100.0 + 1.0).log10() * 20.0;
        let stored = (db * 512.0) as i16;

        let mut out = vec![0x00, 0x01];
        out.extend(&stored.to_be_bytes());
        out.push(0x00);
        out
    } else {
        let raw = (percent * 655.35) as i64;
        let (incdec, magnitude) = if raw < 0 {
            (0x00, -raw as u16)
        } else {
            (0x03, raw as u16)
        };

        let mut out = vec![incdec, 0x10];
        out.extend(&magnitude.to_be_bytes());
        out.extend(&magnitude.to_be_bytes());
        out.extend(&[0, 0, 0, 0]);
        out
    }
}
