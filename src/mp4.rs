//! MPEG-4 atom walking.
//!
//! Atoms are a 4-byte big-endian size (header inclusive) plus a fourcc. The
//! decoder insists on a leading `ftyp`, then walks the fixed
//! `moov.udta.meta.ilst` path. Leaf atoms under `ilst` wrap a `data` atom
//! whose type code says how the payload reads. Everything else is skipped.

use crate::core::io::{BufStream, Source};
use crate::err::{DecodeError, Result};
use crate::meta::value::Value;
use crate::meta::Metadata;
use log::warn;
use std::convert::TryInto;

const DATA_UTF8: u32 = 1;
const DATA_JPEG: u32 = 13;
const DATA_PNG: u32 = 14;
const DATA_UINT: u32 = 21;
const DATA_U16S: u32 = 0;

/// Leaf atoms under `moov.udta.meta.ilst` and the fields they carry.
const LEAVES: &[(&[u8; 4], &str)] = &[
    (b"aART", "album_artist"),
    (b"covr", "image"),
    (b"cpil", "compilation"),
    (b"desc", "video_description"),
    (b"disk", "disk"),
    (b"gnre", "genre"),
    (b"pgap", "gapless"),
    (b"soaa", "sort_album_artist"),
    (b"soal", "sort_album"),
    (b"soar", "sort_artist"),
    (b"soco", "sort_composer"),
    (b"sonm", "sort_name"),
    (b"sosn", "sort_video_show"),
    (b"tmpo", "bpm"),
    (b"trkn", "track"),
    (b"tven", "video_episode_id"),
    (b"tves", "video_episode"),
    (b"tvsh", "video_show"),
    (b"tvsn", "video_season"),
    (b"\xa9ART", "artist"),
    (b"\xa9alb", "album"),
    (b"\xa9cmt", "comment"),
    (b"\xa9day", "year"),
    (b"\xa9gen", "genre"),
    (b"\xa9grp", "grouping"),
    (b"\xa9lyr", "lyrics"),
    (b"\xa9nam", "name"),
    (b"\xa9too", "encoder"),
    (b"\xa9wrt", "composer"),
];

fn leaf_attr(id: &[u8; 4]) -> Option<&'static str> {
    LEAVES
        .iter()
        .find(|(leaf, _)| *leaf == id)
        .map(|&(_, attr)| attr)
}

const ILST_PATH: [[u8; 4]; 4] = [*b"moov", *b"udta", *b"meta", *b"ilst"];

enum Step {
    /// Recurse into the payload.
    Enter,
    /// Recurse into the payload, past 4 bytes of version/flags.
    EnterSkip,
    /// Read the nested `data` atom into a field.
    Leaf(&'static str),
    Skip,
}

fn classify(path: &[[u8; 4]]) -> Step {
    match path.len() {
        1 | 2 | 4 if path[..] == ILST_PATH[..path.len()] => Step::Enter,
        3 if path[..] == ILST_PATH[..3] => Step::EnterSkip,
        5 if path[..4] == ILST_PATH => match leaf_attr(&path[4]) {
            Some(attr) => Step::Leaf(attr),
            None => Step::Skip,
        },
        _ => Step::Skip,
    }
}

/// Decodes the metadata in an MPEG-4 atom tree.
pub(crate) fn parse(src: &mut Source) -> Result<Metadata> {
    // The very first atom must be ftyp, or this is not an MPEG-4 file.
    src.seek(0)?;
    let head: [u8; 8] = src.read_array()?;
    if &head[4..8] != b"ftyp" {
        return Err(DecodeError::NotFound.into());
    }

    let mut meta = Metadata::new();
    let end = src.len()?;

    walk(&mut meta, src, 0, end, &mut Vec::new())?;

    meta.reset();
    Ok(meta)
}

fn walk(
    meta: &mut Metadata,
    src: &mut Source,
    mut pos: u64,
    end: u64,
    path: &mut Vec<[u8; 4]>,
) -> Result<()> {
    while pos + 8 <= end {
        src.seek(pos)?;
        let head: [u8; 8] = src.read_array()?;

        let size = u32::from_be_bytes(head[0..4].try_into().unwrap());
        let name: [u8; 4] = head[4..8].try_into().unwrap();

        // A zero size ends the current scope; a size below the header
        // length cannot advance.
        if size < 8 {
            break;
        }

        let body = pos + 8;
        let next = pos + u64::from(size);

        path.push(name);

        match classify(path) {
            Step::Enter => walk(meta, src, body, u64::min(next, end), path)?,
            Step::EnterSkip => walk(meta, src, body + 4, u64::min(next, end), path)?,
            Step::Leaf(attr) => {
                if let Some((type_code, payload)) = read_data(src, body, u64::min(next, end))? {
                    apply(meta, attr, &name, type_code, payload);
                }
            }
            Step::Skip => {}
        }

        path.pop();
        pos = next;
    }

    Ok(())
}

/// Finds the `data` atom inside a leaf and returns its type code and
/// payload. The payload starts past the 8-byte data header, the 4-byte type
/// and 4 reserved bytes.
fn read_data(src: &mut Source, mut pos: u64, end: u64) -> Result<Option<(u32, Vec<u8>)>> {
    while pos + 8 <= end {
        src.seek(pos)?;
        let head: [u8; 8] = src.read_array()?;

        let size = u32::from_be_bytes(head[0..4].try_into().unwrap());
        let name: [u8; 4] = head[4..8].try_into().unwrap();

        if size < 8 {
            break;
        }

        if &name == b"data" && size >= 16 {
            let type_code = u32::from_be_bytes(src.read_array()?);
            src.read_array::<4>()?; // reserved
            let payload = src.read_up_to(size as usize - 16)?;
            return Ok(Some((type_code, payload)));
        }

        pos += u64::from(size);
    }

    Ok(None)
}

fn apply(meta: &mut Metadata, attr: &'static str, name: &[u8; 4], type_code: u32, payload: Vec<u8>) {
    let value = match type_code {
        DATA_UTF8 => Value::Text(String::from_utf8_lossy(&payload).into_owned()),

        DATA_UINT => {
            if payload.is_empty() || payload.len() > 8 {
                warn!("{}: bad uint payload", attr);
                return;
            }

            let val = payload
                .iter()
                .fold(0u64, |sum, &byte| (sum << 8) | u64::from(byte));
            Value::Int(val as i64)
        }

        DATA_U16S => {
            let mut stream = BufStream::new(&payload);
            let mut vals = Vec::new();
            while let Ok(val) = stream.read_be_u16() {
                vals.push(val);
            }

            match vals.len() {
                0 => return,
                // The genre atom is a 1-based index into the ID3 table.
                1 if name == b"gnre" => Value::Int(i64::from(vals[0]) - 1),
                1 => Value::Int(i64::from(vals[0])),
                // Track and disk atoms pad the pair: 0, a, b, 0.
                _ => Value::Pair(vals[1], *vals.get(2).unwrap_or(&0)),
            }
        }

        DATA_JPEG | DATA_PNG => Value::Bytes(payload),

        other => {
            warn!("{}: unsupported data atom type {}", attr, other);
            return;
        }
    };

    if let Err(err) = meta.set(attr, value) {
        warn!("skipping atom value ({})", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::picture::tests::TINY_PNG;

    fn atom(name: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(&(body.len() as u32 + 8).to_be_bytes());
        out.extend(name);
        out.extend(body);
        out
    }

    fn data_atom(type_code: u32, payload: &[u8]) -> Vec<u8> {
        let mut body = type_code.to_be_bytes().to_vec();
        body.extend(&[0, 0, 0, 0]);
        body.extend(payload);
        atom(b"data", &body)
    }

    fn m4a(ilst_children: &[u8]) -> Vec<u8> {
        let ilst = atom(b"ilst", ilst_children);

        let mut meta_body = vec![0, 0, 0, 0]; // version/flags
        meta_body.extend(&ilst);
        let meta = atom(b"meta", &meta_body);

        let udta = atom(b"udta", &meta);
        let moov = atom(b"moov", &udta);

        let mut out = atom(b"ftyp", b"M4A \x00\x00\x00\x00");
        out.extend(&moov);
        out
    }

    #[test]
    fn requires_ftyp() {
        let mut src = Source::memory(atom(b"moov", b""));
        assert!(parse(&mut src).is_err());
    }

    #[test]
    fn reads_text_atoms() {
        let mut children = atom(b"\xa9nam", &data_atom(DATA_UTF8, b"My Song"));
        children.extend(atom(b"\xa9ART", &data_atom(DATA_UTF8, b"Me")));
        children.extend(atom(b"\xa9day", &data_atom(DATA_UTF8, b"2005")));

        let mut src = Source::memory(m4a(&children));
        let meta = parse(&mut src).unwrap();

        assert_eq!(meta.get("name").unwrap().as_text(), Some("My Song"));
        assert_eq!(meta.get("artist").unwrap().as_text(), Some("Me"));
        assert_eq!(meta.get("year").unwrap().as_int(), Some(2005));
    }

    #[test]
    fn reads_numeric_atoms() {
        let mut children = atom(b"tmpo", &data_atom(DATA_UINT, &[0x00, 0x78]));
        children.extend(atom(b"tves", &data_atom(DATA_UINT, &[0x00, 0x00, 0x00, 0x2A])));
        children.extend(atom(b"cpil", &data_atom(DATA_UINT, &[0x01])));
        children.extend(atom(
            b"trkn",
            &data_atom(DATA_U16S, &[0x00, 0x00, 0x00, 0x03, 0x00, 0x0A, 0x00, 0x00]),
        ));

        let mut src = Source::memory(m4a(&children));
        let meta = parse(&mut src).unwrap();

        assert_eq!(meta.get("bpm").unwrap().as_int(), Some(120));
        assert_eq!(meta.get("video_episode").unwrap().as_int(), Some(42));
        assert_eq!(meta.get("compilation").unwrap().as_bool(), Some(true));
        assert_eq!(meta.get("track").unwrap().as_pair(), Some((3, 10)));
    }

    #[test]
    fn genre_atom_is_one_based() {
        let children = atom(b"gnre", &data_atom(DATA_U16S, &[0x00, 0x16]));

        let mut src = Source::memory(m4a(&children));
        let meta = parse(&mut src).unwrap();

        // Stored 22 means table index 21.
        assert_eq!(meta.get("genre").unwrap().as_text(), Some("Ska"));
    }

    #[test]
    fn reads_cover_art() {
        let children = atom(b"covr", &data_atom(DATA_PNG, TINY_PNG));

        let mut src = Source::memory(m4a(&children));
        let meta = parse(&mut src).unwrap();

        assert_eq!(meta.image().unwrap().data(), TINY_PNG);
    }

    #[test]
    fn gapless_atom_routes() {
        let children = atom(b"pgap", &data_atom(DATA_UINT, &[0x01]));

        let mut src = Source::memory(m4a(&children));
        let meta = parse(&mut src).unwrap();

        assert_eq!(meta.gapless(), Some(true));
    }

    #[test]
    fn unknown_leaves_skipped() {
        let mut children = atom(b"xxxx", &data_atom(DATA_UTF8, b"ignored"));
        children.extend(atom(b"\xa9nam", &data_atom(DATA_UTF8, b"My Song")));

        let mut src = Source::memory(m4a(&children));
        let meta = parse(&mut src).unwrap();

        assert_eq!(meta.get("name").unwrap().as_text(), Some("My Song"));
        assert_eq!(meta.public_fields().count(), 1);
    }
}
