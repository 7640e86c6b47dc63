//! MP3 frame logic and the editable MP3 decoder.
//!
//! An MP3 file is at most three regions: an ID3v2 tag up front, the MP3
//! frame payload, and an ID3v1 trailer. Decoding locates all three; a
//! failure in either tag leaves the others intact, but a file with no
//! locatable MP3 sync is not an MP3. Saving rewrites the tag regions and
//! passes the frame payload through untouched.

use crate::core::io::Source;
use crate::err::{DecodeError, EncodeError, Result};
use crate::id3v1;
use crate::id3v2::{self, Version, DEFAULT_PADDING};
use crate::meta::Metadata;
use std::convert::TryInto;
use std::io::Write;

/// How much leading junk the sync scan reads through.
const MAX_JUNK: usize = 65536;

/// MP3 frame header width.
const HEADER_LEN: usize = 4;

/// Bitrates in kbps. Rows: (v1,L1), (v1,L2), (v1,L3), (v2/v2.5,L1),
/// (v2/v2.5,L2/L3). Columns: bitrate index 1..=14.
const BITRATES: [[u32; 14]; 5] = [
    [32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    [32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

/// Sample rates in Hz. Rows: raw version field (v2.5, reserved, v2, v1).
const SAMPLE_RATES: [[u32; 3]; 4] = [
    [11025, 12000, 8000],
    [0, 0, 0],
    [22050, 24000, 16000],
    [44100, 48000, 32000],
];

/// A decoded 4-byte MP3 frame header.
///
/// Fields are kept in their raw on-wire form so that a valid header packs
/// back to the exact bytes it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    sync: bool,
    /// Raw version field: 0 = v2.5, 1 = reserved, 2 = v2, 3 = v1.
    version: u8,
    /// Raw layer field; the layer number is `4 - raw`.
    layer_raw: u8,
    protected: bool,
    bitrate_raw: u8,
    srate_raw: u8,
    padding: bool,
    private: bool,
    mode: u8,
    mode_ext: u8,
    copyright: bool,
    original: bool,
    emphasis: u8,
}

impl FrameHeader {
    pub fn decode(raw: [u8; HEADER_LEN]) -> Self {
        let val = u32::from_be_bytes(raw);

        Self {
            sync: val & 0xFFE0_0000 == 0xFFE0_0000,
            version: (val >> 19 & 0x03) as u8,
            layer_raw: (val >> 17 & 0x03) as u8,
            protected: val >> 16 & 0x01 == 0x00,
            bitrate_raw: (val >> 12 & 0x0F) as u8,
            srate_raw: (val >> 10 & 0x03) as u8,
            padding: val >> 9 & 0x01 == 0x01,
            private: val >> 8 & 0x01 == 0x01,
            mode: (val >> 6 & 0x03) as u8,
            mode_ext: (val >> 4 & 0x03) as u8,
            copyright: val >> 3 & 0x01 == 0x01,
            original: val >> 2 & 0x01 == 0x01,
            emphasis: (val & 0x03) as u8,
        }
    }

    pub fn pack(&self) -> [u8; HEADER_LEN] {
        let val = (if self.sync { 0xFFE0_0000u32 } else { 0 })
            | u32::from(self.version) << 19
            | u32::from(self.layer_raw) << 17
            | u32::from(!self.protected) << 16
            | u32::from(self.bitrate_raw) << 12
            | u32::from(self.srate_raw) << 10
            | u32::from(self.padding) << 9
            | u32::from(self.private) << 8
            | u32::from(self.mode) << 6
            | u32::from(self.mode_ext) << 4
            | u32::from(self.copyright) << 3
            | u32::from(self.original) << 2
            | u32::from(self.emphasis);

        val.to_be_bytes()
    }

    /// The layer number, 1 to 3. 4 is the reserved encoding.
    pub fn layer(&self) -> u8 {
        4 - self.layer_raw
    }

    fn v2(&self) -> bool {
        self.version == 2
    }

    fn v25(&self) -> bool {
        self.version == 0
    }

    /// A header is valid when the sync bits are set and no field holds a
    /// reserved encoding.
    pub fn valid(&self) -> bool {
        self.sync
            && self.version != 1
            && self.layer_raw != 0
            && (1..=14).contains(&self.bitrate_raw)
            && self.srate_raw != 3
    }

    /// Bitrate in kbps. Only meaningful for valid headers.
    pub fn bitrate(&self) -> u32 {
        let row = if self.version == 3 {
            usize::from(self.layer()) - 1
        } else if self.layer() == 1 {
            3
        } else {
            4
        };

        BITRATES[row][usize::from(self.bitrate_raw) - 1]
    }

    /// Sample rate in Hz. Only meaningful for valid headers.
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[usize::from(self.version)][usize::from(self.srate_raw)]
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let bitrate = u64::from(self.bitrate());
        let padding = u64::from(self.padding);

        let len = if self.layer() == 1 {
            (bitrate * 12000 / u64::from(self.sample_rate()) + padding) * 4
        } else {
            // v2/v2.5 layer III frames span half as many samples.
            let mut srate = u64::from(self.sample_rate());
            if (self.v2() || self.v25()) && self.layer() == 3 {
                srate *= 2;
            }

            bitrate * 144000 / srate + padding
        };

        len as usize
    }
}

/// Scans forward from `pos` for an MP3 sync whose look-ahead frame also
/// validates, reading through up to 64 KiB of junk.
///
/// The second check is what keeps image payloads and stray `0xFF` bytes from
/// passing as audio.
pub(crate) fn find_sync(src: &mut Source, pos: u64) -> Result<u64> {
    src.seek(pos)?;
    let sample = src.read_up_to(MAX_JUNK)?;

    let mut i = 0;
    while i + HEADER_LEN <= sample.len() {
        if sample[i] != 0xFF {
            i += 1;
            continue;
        }

        let head = FrameHeader::decode(sample[i..i + HEADER_LEN].try_into().unwrap());

        if head.valid() {
            let next = i + head.frame_len();

            if next + HEADER_LEN <= sample.len() {
                let ahead = FrameHeader::decode(sample[next..next + HEADER_LEN].try_into().unwrap());
                if ahead.valid() {
                    return Ok(pos + i as u64);
                }
            }
        }

        i += 1;
    }

    Err(DecodeError::NotFound.into())
}

/// A byte region of the source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The decoded layout shared by the MP3 and IFF decoders.
#[derive(Default)]
pub(crate) struct TagState {
    pub meta: Metadata,
    pub id3v1: Option<Span>,
    pub id3v2: Option<Span>,
    pub id3v2_version: Option<Version>,
    pub mp3: Option<Span>,
}

/// Probes the last 128 bytes for an ID3v1 trailer. Failure leaves the state
/// untouched.
pub(crate) fn read_id3v1(state: &mut TagState, src: &mut Source) {
    let attempt = || -> Result<Span> {
        let len = src.len()?;
        if len < id3v1::SIZE {
            return Err(DecodeError::NotFound.into());
        }

        src.seek_end(id3v1::SIZE)?;
        let raw = src.read_array()?;
        id3v1::parse(&mut state.meta, &raw)?;

        Ok(Span {
            start: len - id3v1::SIZE,
            end: len,
        })
    }();

    if let Ok(span) = attempt {
        state.id3v1 = Some(span);
    }
}

/// Probes for an ID3v2 tag at `pos`. Failure leaves the state untouched.
pub(crate) fn read_id3v2(state: &mut TagState, src: &mut Source, pos: u64) {
    if let Ok(info) = id3v2::parse(&mut state.meta, src, pos) {
        state.id3v2 = Some(Span {
            start: pos,
            end: pos + 10 + u64::from(info.size),
        });
        state.id3v2_version = Some(info.version);
    }
}

/// Options for [`Mp3::save`](Mp3::save) and [`Mp3::dump`](Mp3::dump).
#[derive(Clone, Copy, Debug, Default)]
pub struct SaveOpts {
    /// The ID3v2 version to write. Defaults to the version that was read,
    /// or ID3v2.2 for a source with no tag.
    pub version: Option<Version>,
    /// Re-emit unrecognized frames that were kept at decode time.
    pub preserve_unknown: bool,
    /// Zero bytes appended after the last frame when writing out-of-place.
    /// Defaults to 128.
    pub padding: Option<usize>,
}

fn pick_version(state: &TagState, opts: &SaveOpts) -> Version {
    opts.version
        .or(state.id3v2_version)
        .unwrap_or(Version::V22)
}

/// Rewrites the tag regions of `src` in place.
///
/// The rendered ID3v2 frames must fit within the existing tag span; the
/// remainder of the span becomes padding, so the file never shifts. A source
/// with no ID3v2 region keeps none. The ID3v1 trailer is rewritten, or
/// appended when fields exist and the source had none.
pub(crate) fn save_in_place(state: &mut TagState, src: &mut Source, opts: &SaveOpts) -> Result<()> {
    let version = pick_version(state, opts);

    if let Some(span) = state.id3v2 {
        let frames = id3v2::render_frames(&state.meta, version, opts.preserve_unknown)?;
        let avail = span.len() as usize - 10;

        if frames.len() > avail {
            return Err(EncodeError::NoRoom.into());
        }

        let tag = id3v2::render_tag(&frames, version, avail - frames.len());
        src.seek(span.start)?;
        src.write_all(&tag)?;
        state.id3v2_version = Some(version);
    }

    if let Some(span) = state.id3v1 {
        src.seek(span.start)?;
        src.write_all(&id3v1::render(&state.meta))?;
    } else if id3v1::have_fields(&state.meta) {
        let end = src.len()?;
        src.seek(end)?;
        src.write_all(&id3v1::render(&state.meta))?;
        state.id3v1 = Some(Span {
            start: end,
            end: end + id3v1::SIZE,
        });
    }

    src.flush()?;
    Ok(())
}

/// Writes a fresh copy of the file to `sink`: a new ID3v2 tag with padding,
/// the MP3 payload byte-for-byte, and an ID3v1 trailer when fields exist.
///
/// Returns the ID3v2 version written, if a tag was.
pub(crate) fn dump_to(
    state: &TagState,
    src: &mut Source,
    sink: &mut dyn Write,
    opts: &SaveOpts,
) -> Result<Option<Version>> {
    let version = pick_version(state, opts);
    let mut wrote = None;

    let have_unknown = opts.preserve_unknown && state.meta.has_unknown();

    if id3v2::have_fields(&state.meta, version) || have_unknown {
        let frames = id3v2::render_frames(&state.meta, version, opts.preserve_unknown)?;
        let padding = opts.padding.unwrap_or(DEFAULT_PADDING);
        sink.write_all(&id3v2::render_tag(&frames, version, padding))?;
        wrote = Some(version);
    }

    let span = state.mp3.unwrap_or(Span { start: 0, end: 0 });
    let mut frames = Frames {
        src,
        pos: span.start,
        end: span.end,
        done: span.is_empty(),
    };

    while let Some((head, body)) = frames.next() {
        sink.write_all(&head.pack())?;
        sink.write_all(&body)?;
    }

    if id3v1::have_fields(&state.meta) {
        sink.write_all(&id3v1::render(&state.meta))?;
    }

    sink.flush()?;
    Ok(wrote)
}

/// A lazy walk over the MP3 frames in a span.
///
/// Iteration stops at the first invalid header or at the end of the span,
/// whichever comes first. Each item is the decoded header plus the frame
/// body (which may fall short for a truncated final frame).
pub struct Frames<'a> {
    src: &'a mut Source,
    pos: u64,
    end: u64,
    done: bool,
}

impl<'a> Iterator for Frames<'a> {
    type Item = (FrameHeader, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos + HEADER_LEN as u64 > self.end {
            self.done = true;
            return None;
        }

        let attempt = || -> Result<(FrameHeader, Vec<u8>)> {
            self.src.seek(self.pos)?;
            let head = FrameHeader::decode(self.src.read_array()?);

            if !head.valid() {
                return Err(DecodeError::NotFound.into());
            }

            let len = u64::min(head.frame_len() as u64, self.end - self.pos);
            let body = self.src.read_up_to(len as usize - HEADER_LEN)?;

            Ok((head, body))
        }();

        match attempt {
            Ok((head, body)) => {
                self.pos += (HEADER_LEN + body.len()) as u64;
                Some((head, body))
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

/// An editable MP3 source.
///
/// Decoding keeps the source open; metadata mutations go through
/// [`metadata_mut`](Mp3::metadata_mut) and land back on disk with
/// [`save`](Mp3::save) or into a fresh copy with [`dump`](Mp3::dump).
pub struct Mp3 {
    state: TagState,
    src: Source,
}

impl Mp3 {
    /// Scans `src` as an MP3.
    ///
    /// Either side-tag may be missing or damaged, but a sync scan must find
    /// actual MP3 frames.
    pub(crate) fn scan(src: &mut Source) -> Result<TagState> {
        let mut state = TagState::default();

        read_id3v1(&mut state, src);
        read_id3v2(&mut state, src, 0);

        let start = state.id3v2.map_or(0, |span| span.end);
        let end = match state.id3v1 {
            Some(span) => span.start,
            None => src.len()?,
        };

        let at = find_sync(src, start)?;
        state.mp3 = Some(Span { start: at, end });

        state.meta.reset();
        Ok(state)
    }

    pub(crate) fn from_parts(state: TagState, src: Source) -> Self {
        Self { state, src }
    }

    /// Decodes `src` as an MP3, keeping the source for later writes.
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

    pub fn id3v2_version(&self) -> Option<Version> {
        self.state.id3v2_version
    }

    pub fn id3v1_span(&self) -> Option<Span> {
        self.state.id3v1
    }

    pub fn id3v2_span(&self) -> Option<Span> {
        self.state.id3v2
    }

    pub fn mp3_span(&self) -> Option<Span> {
        self.state.mp3
    }

    /// Walks the MP3 frames from the start of the payload. Each call
    /// restarts from the recorded span.
    pub fn frames(&mut self) -> Frames {
        let span = self.state.mp3.unwrap_or(Span { start: 0, end: 0 });

        Frames {
            src: &mut self.src,
            pos: span.start,
            end: span.end,
            done: span.is_empty(),
        }
    }

    /// Average bitrate across all frames, in kbps.
    pub fn bitrate(&mut self) -> f64 {
        let mut count = 0u64;
        let mut sum = 0.0;

        for (head, _) in self.frames() {
            count += 1;
            sum += f64::from(head.bitrate());
        }

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Rewrites the tags in place. See [`save_in_place`](save_in_place).
    pub fn save(&mut self, opts: &SaveOpts) -> Result<()> {
        save_in_place(&mut self.state, &mut self.src, opts)
    }

    /// Writes a fresh copy of the whole file to `sink`.
    pub fn dump<W: Write>(&mut self, sink: &mut W, opts: &SaveOpts) -> Result<()> {
        if let Some(version) = dump_to(&self.state, &mut self.src, sink, opts)? {
            self.state.id3v2_version = Some(version);
        }

        Ok(())
    }

    /// [`dump`](Mp3::dump) into a byte buffer.
    pub fn dump_vec(&mut self, opts: &SaveOpts) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.dump(&mut out, opts)?;
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A valid v2/layer-III header whose 24-byte frames tile end to end, so
    /// any repetition of it scans as real audio.
    pub(crate) const FAKE_FRAME: [u8; 4] = [0xFF, 0xF3, 0x14, 0xC4];

    pub(crate) fn fake_mp3(frames: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for _ in 0..frames * 6 {
            out.extend(&FAKE_FRAME);
        }
        out.truncate(frames * 24);
        out
    }

    #[test]
    fn decodes_typical_header() {
        // MPEG1 layer III, 128 kbps, 44100 Hz, no padding.
        let head = FrameHeader::decode([0xFF, 0xFB, 0x90, 0x40]);

        assert!(head.valid());
        assert_eq!(head.layer(), 3);
        assert_eq!(head.bitrate(), 128);
        assert_eq!(head.sample_rate(), 44100);
        assert_eq!(head.frame_len(), 417);
    }

    #[test]
    fn pack_restores_bytes() {
        for raw in &[[0xFF, 0xFB, 0x90, 0x40], FAKE_FRAME, [0xFF, 0xFB, 0x91, 0x40]] {
            let head = FrameHeader::decode(*raw);
            assert!(head.valid());
            assert_eq!(&head.pack(), raw);
        }
    }

    #[test]
    fn padding_extends_frame() {
        let plain = FrameHeader::decode([0xFF, 0xFB, 0x90, 0x40]);
        let padded = FrameHeader::decode([0xFF, 0xFB, 0x92, 0x40]);

        assert_eq!(padded.frame_len(), plain.frame_len() + 1);
    }

    #[test]
    fn rejects_reserved_fields() {
        // No sync.
        assert!(!FrameHeader::decode([0x12, 0x34, 0x56, 0x78]).valid());
        // Reserved version.
        assert!(!FrameHeader::decode([0xFF, 0xEB, 0x90, 0x40]).valid());
        // Reserved layer.
        assert!(!FrameHeader::decode([0xFF, 0xF9, 0x90, 0x40]).valid());
        // Free-format bitrate.
        assert!(!FrameHeader::decode([0xFF, 0xFB, 0x00, 0x40]).valid());
        // Bad bitrate index.
        assert!(!FrameHeader::decode([0xFF, 0xFB, 0xF0, 0x40]).valid());
        // Reserved sample rate.
        assert!(!FrameHeader::decode([0xFF, 0xFB, 0x9C, 0x40]).valid());
    }

    #[test]
    fn fake_frame_tiles() {
        let head = FrameHeader::decode(FAKE_FRAME);
        assert!(head.valid());
        assert_eq!(head.frame_len(), 24);
    }

    #[test]
    fn sync_scan_skips_junk() {
        let mut data = b"garbage bytes before audio".to_vec();
        let junk = data.len() as u64;
        data.extend(fake_mp3(3));

        let mut src = Source::memory(data);
        assert_eq!(find_sync(&mut src, 0).unwrap(), junk);
    }

    #[test]
    fn sync_scan_rejects_false_sync() {
        // A lone 0xFF with no valid look-ahead frame.
        let mut src = Source::memory(b"\xFF\xFB\x90\x40 and then nothing".to_vec());
        assert!(find_sync(&mut src, 0).is_err());
    }

    #[test]
    fn frames_walk_and_clamp() {
        let data = fake_mp3(3);
        let len = data.len() as u64;
        let mut src = Source::memory(data);

        let mut frames = Frames {
            src: &mut src,
            pos: 0,
            end: len,
            done: false,
        };

        let collected: Vec<_> = (&mut frames).collect();
        assert_eq!(collected.len(), 3);
        assert!(collected.iter().all(|(head, body)| {
            head.pack() == FAKE_FRAME && body.len() == 20
        }));
    }

    #[test]
    fn parse_requires_sync() {
        let src = Source::memory(b"definitely not audio data".to_vec());
        assert!(Mp3::parse(src).is_err());
    }

    #[test]
    fn parse_locates_spans() {
        let mut data = fake_mp3(4);
        let audio = data.len() as u64;
        data.extend(&id3v1::render(&{
            let mut meta = Metadata::new();
            meta.set("name", "My Song").unwrap();
            meta
        }));

        let mp3 = Mp3::parse(Source::memory(data)).unwrap();

        assert_eq!(mp3.id3v2_span(), None);
        assert_eq!(mp3.mp3_span(), Some(Span { start: 0, end: audio }));
        assert_eq!(
            mp3.id3v1_span(),
            Some(Span {
                start: audio,
                end: audio + 128
            })
        );
        assert_eq!(mp3.metadata().get("name").unwrap().as_text(), Some("My Song"));
    }

    #[test]
    fn average_bitrate() {
        let mut mp3 = Mp3::parse(Source::memory(fake_mp3(4))).unwrap();
        assert!((mp3.bitrate() - 8.0).abs() < f64::EPSILON);
    }
}
