//! IFF container walking (AIFF and RIFF/WAV).
//!
//! A chunk is a 4-byte id plus a size whose endianness follows the top-level
//! container: little-endian under `RIFF`, big-endian under the AIFF family.
//! Container chunks carry a form type and recurse; selected leaf chunks map
//! to text attributes, an `ID3 ` chunk holds a whole ID3v2 tag, and a `data`
//! chunk may hold MP3 frames, which can be passed through to a fresh MP3
//! copy with [`Iff::dump`](Iff::dump).

use crate::core::io::Source;
use crate::err::{DecodeError, EncodeError, Result};
use crate::mp3::{self, SaveOpts, Span, TagState};
use crate::meta::Metadata;
use crate::id3v2::Version;
use std::convert::TryInto;
use std::io::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Endian {
    Big,
    Little,
}

const TEXT_CHUNKS: &[(&[u8; 4], &str)] = &[
    (b"ANNO", "comment"),
    (b"AUTH", "artist"),
    (b"IART", "artist"),
    (b"ICMT", "comment"),
    (b"ICRD", "year"),
    (b"IGNR", "genre"),
    (b"INAM", "name"),
    (b"ISFT", "encoder"),
    (b"NAME", "name"),
];

fn chunk_attr(id: &[u8; 4]) -> Option<&'static str> {
    TEXT_CHUNKS
        .iter()
        .find(|(chunk, _)| *chunk == id)
        .map(|&(_, attr)| attr)
}

fn is_container(id: &[u8; 4]) -> bool {
    matches!(id, b"RIFF" | b"FORM" | b"LIST" | b"CAT ")
}

/// A decoded IFF container.
///
/// Read-only, except that a container with an embedded MP3 `data` chunk can
/// be dumped back out as a bare MP3.
pub struct Iff {
    state: TagState,
    src: Source,
}

impl Iff {
    /// Scans `src` as an IFF container.
    pub(crate) fn scan(src: &mut Source) -> Result<TagState> {
        let mut state = TagState::default();

        // Some taggers put an ID3v1 trailer after the container proper, so
        // probe it first and stop the walk where it starts.
        mp3::read_id3v1(&mut state, src);

        let end = match state.id3v1 {
            Some(span) => span.start,
            None => src.len()?,
        };

        src.seek(0)?;
        let endian = match &src.read_array::<4>()? {
            b"RIFF" => Endian::Little,
            b"FORM" | b"LIST" | b"CAT " => Endian::Big,
            _ => return Err(DecodeError::NotFound.into()),
        };

        walk(&mut state, src, endian, 0, end)?;

        state.meta.reset();
        Ok(state)
    }

    pub(crate) fn from_parts(state: TagState, src: Source) -> Self {
        Self { state, src }
    }

    /// Decodes `src` as an IFF container.
    pub(crate) fn parse(mut src: Source) -> Result<Self> {
        let state = Self::scan(&mut src)?;
        Ok(Self::from_parts(state, src))
    }

    pub fn metadata(&self) -> &Metadata {
        &self.state.meta
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.state.meta
    }

    /// True when a `data` chunk scanned as MP3 frames.
    pub fn has_mp3(&self) -> bool {
        self.state.mp3.is_some()
    }

    pub fn mp3_span(&self) -> Option<Span> {
        self.state.mp3
    }

    pub fn id3v2_version(&self) -> Option<Version> {
        self.state.id3v2_version
    }

    /// In-place saving of an IFF container is not supported.
    pub fn save(&mut self, _opts: &SaveOpts) -> Result<()> {
        Err(EncodeError::NotEditable.into())
    }

    /// Writes the embedded MP3 payload to `sink` as a bare MP3 file with
    /// fresh tags, dropping the IFF framing.
    pub fn dump<W: Write>(&mut self, sink: &mut W, opts: &SaveOpts) -> Result<()> {
        if self.state.mp3.is_none() {
            return Err(EncodeError::NoMp3Data.into());
        }

        if let Some(version) = mp3::dump_to(&self.state, &mut self.src, sink, opts)? {
            self.state.id3v2_version = Some(version);
        }

        Ok(())
    }

    /// [`dump`](Iff::dump) into a byte buffer.
    pub fn dump_vec(&mut self, opts: &SaveOpts) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.dump(&mut out, opts)?;
        Ok(out)
    }
}

fn walk(state: &mut TagState, src: &mut Source, endian: Endian, mut pos: u64, end: u64) -> Result<()> {
    while pos + 8 <= end {
        src.seek(pos)?;
        let head: [u8; 8] = src.read_array()?;

        let id: [u8; 4] = head[0..4].try_into().unwrap();
        let size = match endian {
            Endian::Little => u32::from_le_bytes(head[4..8].try_into().unwrap()),
            Endian::Big => u32::from_be_bytes(head[4..8].try_into().unwrap()),
        };

        if size == 0 {
            break;
        }

        let body = pos + 8;
        // Chunks are padded to even length.
        let next = body + u64::from(size) + u64::from(size % 2);

        if is_container(&id) {
            // Skip the 4-byte form type, then recurse with the same endian.
            walk(state, src, endian, body + 4, u64::min(next, end))?;
        } else if &id == b"ID3 " {
            mp3::read_id3v2(state, src, body);
        } else if &id == b"data" {
            if let Ok(at) = mp3::find_sync(src, body) {
                state.mp3 = Some(Span {
                    start: at,
                    end: body + u64::from(size),
                });
            }
        } else if let Some(attr) = chunk_attr(&id) {
            let data = src.read_up_to(size as usize)?;
            let text = String::from_utf8_lossy(&data).into_owned();
            let _ = state.meta.set(attr, text);
        }

        pos = next;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp3::tests::fake_mp3;

    fn chunk_le(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(id);
        out.extend(&(body.len() as u32).to_le_bytes());
        out.extend(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn chunk_be(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(id);
        out.extend(&(body.len() as u32).to_be_bytes());
        out.extend(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn riff(form: &[u8; 4], chunks: &[u8]) -> Vec<u8> {
        let mut body = form.to_vec();
        body.extend(chunks);
        chunk_le(b"RIFF", &body)
    }

    #[test]
    fn riff_id3_chunk() {
        let tag = b"ID3\x03\x00\x00\x00\x00\x00\x0D\
                    TIT2\x00\x00\x00\x03\x00\x00\x00Hi";

        let data = riff(b"WAVE", &chunk_le(b"ID3 ", tag));
        let iff = Iff::parse(Source::memory(data)).unwrap();

        assert_eq!(iff.metadata().get("name").unwrap().as_text(), Some("Hi"));
        assert_eq!(iff.id3v2_version(), Some(Version::V23));
    }

    #[test]
    fn aiff_text_chunks() {
        let mut chunks = chunk_be(b"NAME", b"My Song");
        chunks.extend(chunk_be(b"AUTH", b"Me"));
        chunks.extend(chunk_be(b"ANNO", b"hello"));

        let mut body = b"AIFF".to_vec();
        body.extend(&chunks);
        let data = chunk_be(b"FORM", &body);

        let iff = Iff::parse(Source::memory(data)).unwrap();
        let meta = iff.metadata();

        assert_eq!(meta.get("name").unwrap().as_text(), Some("My Song"));
        assert_eq!(meta.get("artist").unwrap().as_text(), Some("Me"));
        assert_eq!(meta.comment(), Some("hello"));
    }

    #[test]
    fn riff_info_list() {
        let mut info = b"INFO".to_vec();
        info.extend(chunk_le(b"INAM", b"My Song"));
        info.extend(chunk_le(b"ISFT", b"Encoder 1.0"));

        let data = riff(b"WAVE", &chunk_le(b"LIST", &info));
        let iff = Iff::parse(Source::memory(data)).unwrap();

        assert_eq!(iff.metadata().get("name").unwrap().as_text(), Some("My Song"));
        assert_eq!(
            iff.metadata().get("encoder").unwrap().as_text(),
            Some("Encoder 1.0")
        );
    }

    #[test]
    fn data_chunk_scans_mp3() {
        let audio = fake_mp3(3);
        let data = riff(b"WAVE", &chunk_le(b"data", &audio));

        let iff = Iff::parse(Source::memory(data)).unwrap();
        assert!(iff.has_mp3());

        let span = iff.mp3_span().unwrap();
        // RIFF header (8) + form (4) + chunk header (8).
        assert_eq!(span.start, 20);
        assert_eq!(span.len(), audio.len() as u64);
    }

    #[test]
    fn rejects_other_formats() {
        assert!(Iff::parse(Source::memory(b"fLaC\x00\x00\x00\x00".to_vec())).is_err());
    }

    #[test]
    fn save_not_supported() {
        let data = riff(b"WAVE", &chunk_le(b"data", &fake_mp3(3)));
        let mut iff = Iff::parse(Source::memory(data)).unwrap();

        assert!(matches!(
            iff.save(&SaveOpts::default()),
            Err(crate::err::Error::Encode(EncodeError::NotEditable))
        ));
    }

    #[test]
    fn dump_requires_mp3() {
        let data = riff(b"WAVE", &chunk_le(b"INAM", b"My Song"));
        let mut iff = Iff::parse(Source::memory(data)).unwrap();

        assert!(iff.dump_vec(&SaveOpts::default()).is_err());
    }

    #[test]
    fn dump_extracts_mp3() {
        let audio = fake_mp3(3);
        let mut chunks = chunk_le(b"INAM", b"My Song");
        chunks.extend(chunk_le(b"data", &audio));

        let data = riff(b"WAVE", &chunks);
        let mut iff = Iff::parse(Source::memory(data)).unwrap();

        let out = iff.dump_vec(&SaveOpts::default()).unwrap();

        // New ID3v2 tag, then the untouched audio, then an ID3v1 trailer.
        assert_eq!(&out[0..3], b"ID3");
        let audio_at = out.len() - 128 - audio.len();
        assert_eq!(&out[audio_at..audio_at + audio.len()], &audio[..]);
        assert_eq!(&out[out.len() - 128..out.len() - 125], b"TAG");
    }
}
