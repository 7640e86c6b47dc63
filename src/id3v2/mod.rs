//! ID3v2 tag reading and writing.
//!
//! Supports the three incompatible wire layouts (ID3v2.2, ID3v2.3, ID3v2.4).
//! Parsing is tolerant: a damaged frame is skipped or kept as raw unknown
//! data, and only a broken tag header aborts the tag. The writer produces
//! any of the three versions, either out-of-place with padding or in-place
//! within the existing tag span.

pub(crate) mod frames;
pub(crate) mod syncdata;

use crate::core::io::{BufStream, Source};
use crate::err::{DecodeError, EncodeError, Result};
use crate::meta::Metadata;
use log::{error, warn};
use regex::Regex;
use std::convert::TryInto;
use std::fmt::{self, Display, Formatter};
use std::sync::OnceLock;

/// How many zero bytes follow the last frame when writing a fresh tag.
pub const DEFAULT_PADDING: usize = 128;

/// The version of an ID3v2 tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Version {
    V22,
    V23,
    V24,
}

impl Version {
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            2 => Some(Self::V22),
            3 => Some(Self::V23),
            4 => Some(Self::V24),
            _ => None,
        }
    }

    pub(crate) fn byte(self) -> u8 {
        match self {
            Self::V22 => 2,
            Self::V23 => 3,
            Self::V24 => 4,
        }
    }

    /// Frame id width in this layout.
    pub(crate) fn id_len(self) -> usize {
        match self {
            Self::V22 => 3,
            _ => 4,
        }
    }

    /// Frame size-field width in this layout.
    fn size_len(self) -> usize {
        match self {
            Self::V22 => 3,
            _ => 4,
        }
    }

    /// Frame flag-field width in this layout.
    fn flags_len(self) -> usize {
        match self {
            Self::V22 => 0,
            _ => 2,
        }
    }

    fn frame_header_len(self) -> usize {
        self.id_len() + self.size_len() + self.flags_len()
    }

    /// Whether frame sizes are syncsafe. Tag sizes always are.
    fn syncsafe_frames(self) -> bool {
        self == Self::V24
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::V22 => write![f, "ID3v2.2"],
            Self::V23 => write![f, "ID3v2.3"],
            Self::V24 => write![f, "ID3v2.4"],
        }
    }
}

/// What a recognized frame id maps to.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Target {
    /// A scalar public field, decoded according to its kind.
    Scalar(&'static str),
    Comment,
    Lyrics,
    Image,
}

use Target::{Comment, Image, Lyrics, Scalar};

const FRAMES_V22: &[(&str, Target)] = &[
    ("COM", Comment),
    ("PIC", Image),
    ("RVA", Scalar("volume")),
    ("TAL", Scalar("album")),
    ("TBP", Scalar("bpm")),
    ("TCM", Scalar("composer")),
    ("TCO", Scalar("genre")),
    ("TCP", Scalar("compilation")),
    ("TEN", Scalar("encoder")),
    ("TP1", Scalar("artist")),
    ("TP2", Scalar("album_artist")),
    ("TPA", Scalar("disk")),
    ("TRK", Scalar("track")),
    ("TS2", Scalar("sort_album_artist")),
    ("TSA", Scalar("sort_album")),
    ("TSC", Scalar("sort_composer")),
    ("TSP", Scalar("sort_artist")),
    ("TST", Scalar("sort_name")),
    ("TT1", Scalar("grouping")),
    ("TT2", Scalar("name")),
    ("TT3", Scalar("video_description")),
    ("TYE", Scalar("year")),
    ("ULT", Lyrics),
];

const FRAMES_V23: &[(&str, Target)] = &[
    ("APIC", Image),
    ("COMM", Comment),
    ("RVAD", Scalar("volume")),
    ("TALB", Scalar("album")),
    ("TBPM", Scalar("bpm")),
    ("TCMP", Scalar("compilation")),
    ("TCOM", Scalar("composer")),
    ("TCON", Scalar("genre")),
    ("TENC", Scalar("encoder")),
    ("TIT1", Scalar("grouping")),
    ("TIT2", Scalar("name")),
    ("TIT3", Scalar("video_description")),
    ("TPE1", Scalar("artist")),
    ("TPE2", Scalar("album_artist")),
    ("TPOS", Scalar("disk")),
    ("TRCK", Scalar("track")),
    ("TSO2", Scalar("sort_album_artist")),
    ("TSOC", Scalar("sort_composer")),
    ("TYER", Scalar("year")),
    ("USLT", Lyrics),
];

const FRAMES_V24: &[(&str, Target)] = &[
    ("APIC", Image),
    ("COMM", Comment),
    ("RVA2", Scalar("volume")),
    ("TALB", Scalar("album")),
    ("TBPM", Scalar("bpm")),
    ("TCMP", Scalar("compilation")),
    ("TCOM", Scalar("composer")),
    ("TCON", Scalar("genre")),
    ("TDRC", Scalar("year")),
    ("TENC", Scalar("encoder")),
    ("TIT1", Scalar("grouping")),
    ("TIT2", Scalar("name")),
    ("TIT3", Scalar("video_description")),
    ("TPE1", Scalar("artist")),
    ("TPE2", Scalar("album_artist")),
    ("TPOS", Scalar("disk")),
    ("TRCK", Scalar("track")),
    ("TSO2", Scalar("sort_album_artist")),
    ("TSOA", Scalar("sort_album")),
    ("TSOC", Scalar("sort_composer")),
    ("TSOP", Scalar("sort_artist")),
    ("TSOT", Scalar("sort_name")),
    ("USLT", Lyrics),
];

pub(crate) fn table(version: Version) -> &'static [(&'static str, Target)] {
    match version {
        Version::V22 => FRAMES_V22,
        Version::V23 => FRAMES_V23,
        Version::V24 => FRAMES_V24,
    }
}

fn target(version: Version, id: &str) -> Option<Target> {
    table(version)
        .iter()
        .find(|(tag, _)| *tag == id)
        .map(|&(_, target)| target)
}

fn tag_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[A-Z0-9 ]{3,4}$").unwrap())
}

/// A parsed tag header.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TagInfo {
    pub version: Version,
    /// Size of the frame area, excluding the 10-byte header.
    pub size: u32,
}

/// Parses the ID3v2 tag at `pos` into `meta`.
///
/// Frame damage is recovered from: unparseable frames are skipped and
/// unrecognized ids are kept raw under `_unknown`. Only a missing or
/// malformed tag header errors.
pub(crate) fn parse(meta: &mut Metadata, src: &mut Source, pos: u64) -> Result<TagInfo> {
    src.seek(pos)?;

    let head: [u8; 10] = src.read_array()?;

    if &head[0..3] != b"ID3" {
        return Err(DecodeError::NotFound.into());
    }

    let version = match Version::from_byte(head[3]) {
        Some(version) => version,
        None => {
            error!("ID3v2.{} is not supported", head[3]);
            return Err(DecodeError::Unsupported.into());
        }
    };

    // Unknown revisions and tag-level flags are not interpreted, but they
    // are no reason to throw the tag away.
    if head[4] != 0 {
        warn!("ignoring id3v2 revision {}", head[4]);
    }

    if head[5] != 0 {
        warn!("ignoring tag header flags {:#04x}", head[5]);
    }

    let size = syncdata::to_u28(head[6..10].try_into().unwrap());
    let data = src.read_vec(size as usize)?;

    parse_frames(meta, version, &data);

    Ok(TagInfo { version, size })
}

fn parse_frames(meta: &mut Metadata, version: Version, data: &[u8]) {
    let mut stream = BufStream::new(data);

    while stream.remaining() >= version.frame_header_len() {
        let id_raw = match stream.slice(version.id_len()) {
            Ok(id) => id,
            Err(_) => break,
        };

        let id = String::from_utf8_lossy(id_raw).into_owned();

        // Anything that does not look like a frame id is taken as the start
        // of the padding.
        if !tag_id_pattern().is_match(&id) {
            break;
        }

        let size = match read_frame_size(version, &mut stream) {
            Ok(size) => size,
            Err(_) => break,
        };

        if version.flags_len() > 0 {
            match stream.slice(version.flags_len()) {
                Ok(flags) if flags.iter().any(|&b| b != 0) => {
                    warn!("{}: ignoring frame flags {:?}", id, flags);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        if size > stream.remaining() {
            warn!("{}: frame size {} overruns the tag", id, size);
            break;
        }

        let payload = match stream.slice(size) {
            Ok(payload) => payload,
            Err(_) => break,
        };

        match target(version, &id) {
            Some(target) => frames::decode(meta, version, &id, target, payload),
            None => meta.push_unknown(&id, payload.to_vec()),
        }
    }
}

fn read_frame_size(version: Version, stream: &mut BufStream) -> Result<usize> {
    let size = match version.size_len() {
        3 => {
            let raw: [u8; 3] = stream.read_array()?;
            u32::from_be_bytes([0, raw[0], raw[1], raw[2]])
        }
        _ if version.syncsafe_frames() => syncdata::to_u28(stream.read_array()?),
        _ => stream.read_be_u32()?,
    };

    Ok(size as usize)
}

/// True when any field writable in this version's frame set is present.
pub(crate) fn have_fields(meta: &Metadata, version: Version) -> bool {
    let scalars = table(version).iter().any(|&(_, target)| match target {
        Scalar(attr) => meta.get(attr).map_or(false, |value| frames::truthy(&value)),
        _ => false,
    });

    scalars
        || !meta.comments().is_empty()
        || !meta.lyrics_map().is_empty()
        || !meta.images().is_empty()
}

/// Renders the frame area for `version` with no header or padding.
pub(crate) fn render_frames(
    meta: &Metadata,
    version: Version,
    preserve_unknown: bool,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    for (id, payload) in frames::encode_all(meta, version, preserve_unknown) {
        if id.len() != version.id_len() {
            // Typically an unknown frame preserved across a version change.
            error!("frame id {} does not fit {}", id, version);
            return Err(EncodeError::BadFrameId.into());
        }

        out.extend(id.as_bytes());

        let size = (payload.len() as u32).to_be_bytes();
        match version.size_len() {
            3 => out.extend(&size[1..]),
            _ if version.syncsafe_frames() => out.extend(syncdata::from_u28(payload.len() as u32)),
            _ => out.extend(size),
        }

        out.extend(std::iter::repeat(0).take(version.flags_len()));
        out.extend(payload);
    }

    Ok(out)
}

/// Wraps a rendered frame area in a tag header plus `padding` zero bytes.
pub(crate) fn render_tag(frames: &[u8], version: Version, padding: usize) -> Vec<u8> {
    let size = frames.len() + padding;

    let mut out = Vec::with_capacity(10 + size);
    out.extend(b"ID3");
    out.push(version.byte());
    out.push(0);
    out.push(0);
    out.extend(syncdata::from_u28(size as u32));
    out.extend(frames);
    out.extend(std::iter::repeat(0).take(padding));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::value::Value;
    use crate::meta::Select;

    fn parse_bytes(data: &[u8]) -> (Metadata, TagInfo) {
        let mut meta = Metadata::new();
        let mut src = Source::memory(data.to_vec());
        let info = parse(&mut meta, &mut src, 0).unwrap();
        (meta, info)
    }

    #[test]
    fn parses_v23_text_frame() {
        let data = b"ID3\x03\x00\x00\x00\x00\x00\x11\
                     TALB\x00\x00\x00\x07\x00\x00\x00Album!";

        let (meta, info) = parse_bytes(data);

        assert_eq!(info.version, Version::V23);
        assert_eq!(info.size, 0x11);
        assert_eq!(meta.get("album"), Some(Value::Text("Album!".to_string())));
    }

    #[test]
    fn parses_v22_frame() {
        let data = b"ID3\x02\x00\x00\x00\x00\x00\x0E\
                     TT2\x00\x00\x08\x00My Song";

        let (meta, _) = parse_bytes(data);
        assert_eq!(meta.get("name"), Some(Value::Text("My Song".to_string())));
    }

    #[test]
    fn parses_v24_syncsafe_frame_size() {
        // 0x81 bytes of payload would need a syncsafe 0x00 0x00 0x01 0x01.
        let payload_len = 0x81;
        let mut data = b"ID3\x04\x00\x00\x00\x00\x01\x0B\
                         TIT2\x00\x00\x01\x01\x00\x00"
            .to_vec();
        data.push(0x00); // latin-1
        data.extend(std::iter::repeat(b'x').take(payload_len - 1));

        let (meta, _) = parse_bytes(&data);
        let name = meta.get("name").unwrap();
        assert_eq!(name.as_text().unwrap().len(), payload_len - 1);
    }

    #[test]
    fn keeps_unknown_frames() {
        let data = b"ID3\x03\x00\x00\x00\x00\x00\x14\
                     WOAR\x00\x00\x00\x0Ahttp://a.b";

        let (meta, _) = parse_bytes(data);
        assert_eq!(meta.unknown()["WOAR"], vec![b"http://a.b".to_vec()]);
    }

    #[test]
    fn stops_at_padding() {
        let data = b"ID3\x03\x00\x00\x00\x00\x00\x21\
                     TALB\x00\x00\x00\x07\x00\x00\x00Album!\
                     \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";

        let (meta, _) = parse_bytes(data);
        assert_eq!(meta.get("album"), Some(Value::Text("Album!".to_string())));
        assert!(!meta.has_unknown());
    }

    #[test]
    fn rejects_non_id3(){
        let mut meta = Metadata::new();
        let mut src = Source::memory(b"RIFF\x00\x00\x00\x00\x00\x00\x00\x00".to_vec());
        assert!(parse(&mut meta, &mut src, 0).is_err());
    }

    #[test]
    fn ignores_revision_and_flags() {
        let data = b"ID3\x03\x01\x80\x00\x00\x00\x11\
                     TALB\x00\x00\x00\x07\x00\x00\x00Album!";

        let (meta, _) = parse_bytes(data);
        assert_eq!(meta.get("album"), Some(Value::Text("Album!".to_string())));
    }

    #[test]
    fn parses_comment_frame() {
        let data = b"ID3\x03\x00\x00\x00\x00\x00\x1E\
                     COMM\x00\x00\x00\x14\x00\x00\x03engDescription\x00Text";

        let (meta, _) = parse_bytes(data);
        assert_eq!(
            meta.comment_entry(Select::Key(Some("Description")))
                .and_then(Value::as_text),
            Some("Text")
        );
    }

    #[test]
    fn renders_what_it_parses() {
        let mut meta = Metadata::new();
        meta.set("album", "Album!").unwrap();
        meta.set("track", "3/10").unwrap();

        let frames = render_frames(&meta, Version::V23, false).unwrap();
        let tag = render_tag(&frames, Version::V23, DEFAULT_PADDING);

        let (reread, info) = parse_bytes(&tag);
        assert_eq!(info.version, Version::V23);
        assert_eq!(reread.get("album"), Some(Value::Text("Album!".to_string())));
        assert_eq!(reread.get("track"), Some(Value::Pair(3, 10)));
    }

    #[test]
    fn unknown_ids_do_not_cross_versions() {
        let mut meta = Metadata::new();
        meta.push_unknown("WOAR", b"http://a.b".to_vec());

        assert!(render_frames(&meta, Version::V22, true).is_err());
        assert!(render_frames(&meta, Version::V23, true).is_ok());
    }
}
