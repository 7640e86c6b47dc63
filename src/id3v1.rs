//! The ID3v1 trailer.
//!
//! A fixed 128-byte block at the very end of the file: `"TAG"`, then
//! NUL-padded name/artist/album/year/comment fields and a genre byte. The
//! "ID3v1.1" track-number convention (a NUL at comment byte 28 followed by a
//! nonzero byte) is honored both ways.

use crate::err::{DecodeError, Result};
use crate::meta::value::Value;
use crate::meta::{genres, Metadata};

/// Total size of the trailer.
pub(crate) const SIZE: u64 = 128;

/// Parses a 128-byte trailer into `meta`.
///
/// Individual fields that fail validation are skipped; only a missing `TAG`
/// marker errors.
pub(crate) fn parse(meta: &mut Metadata, raw: &[u8; SIZE as usize]) -> Result<()> {
    if &raw[0..3] != b"TAG" {
        return Err(DecodeError::NotFound.into());
    }

    let _ = meta.set("name", Value::Bytes(raw[3..33].to_vec()));
    let _ = meta.set("artist", Value::Bytes(raw[33..63].to_vec()));
    let _ = meta.set("album", Value::Bytes(raw[63..93].to_vec()));
    let _ = meta.set("year", Value::Bytes(raw[93..97].to_vec()));

    let comment = &raw[97..127];

    if comment[28] == 0x00 && comment[29] != 0x00 {
        let _ = meta.set("comment", Value::Bytes(comment[..28].to_vec()));
        let _ = meta.set("track", Value::Int(i64::from(comment[29])));
    } else {
        let _ = meta.set("comment", Value::Bytes(comment.to_vec()));
    }

    if raw[127] != 0xFF {
        // An unassigned genre byte fails validation and stays unset.
        let _ = meta.set("genre", Value::Int(i64::from(raw[127])));
    }

    Ok(())
}

/// True when any field the trailer can carry is present.
pub(crate) fn have_fields(meta: &Metadata) -> bool {
    ["name", "artist", "album", "year", "comment", "track", "genre"]
        .iter()
        .any(|&attr| meta.get(attr).is_some())
}

/// Renders the 128-byte trailer.
pub(crate) fn render(meta: &Metadata) -> [u8; SIZE as usize] {
    let mut out = [0u8; SIZE as usize];
    out[0..3].copy_from_slice(b"TAG");

    write_padded(&mut out[3..33], meta.get("name"));
    write_padded(&mut out[33..63], meta.get("artist"));
    write_padded(&mut out[63..93], meta.get("album"));
    write_padded(&mut out[93..97], meta.get("year"));

    let track = meta
        .get("track")
        .and_then(|value| value.as_pair())
        .map(|(a, _)| a);

    match track {
        Some(track) if (1..=255).contains(&track) => {
            write_padded(&mut out[97..125], meta.get("comment"));
            out[125] = 0x00;
            out[126] = track as u8;
        }
        _ => write_padded(&mut out[97..127], meta.get("comment")),
    }

    out[127] = meta
        .get("genre")
        .as_ref()
        .and_then(Value::as_text)
        .and_then(genres::index)
        .map_or(0xFF, |index| index as u8);

    out
}

/// Writes a value as stripped ASCII, NUL-padded to the slot width.
fn write_padded(slot: &mut [u8], value: Option<Value>) {
    let text = match &value {
        Some(Value::Text(text)) => text.clone(),
        Some(Value::Int(val)) => val.to_string(),
        _ => return,
    };

    let bytes: Vec<u8> = text
        .trim()
        .bytes()
        .filter(|&byte| byte < 0x80)
        .take(slot.len())
        .collect();

    slot[..bytes.len()].copy_from_slice(&bytes);
}
