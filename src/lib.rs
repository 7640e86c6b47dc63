//! Audiometa reads, normalizes and (for MP3) rewrites music file metadata.
//!
//! Every supported container decodes into the same [`Metadata`](Metadata)
//! schema: MP3 with ID3v1/ID3v2 side-tags, AIFF and RIFF/WAV containers
//! (which may themselves embed MP3 and ID3v2), MPEG-4 atom trees, FLAC, and
//! OGG. [`tagopen`](tagopen) tries each decoder in turn and returns the
//! first that accepts the file; MP3 sources stay open for in-place
//! [`save`](Mp3::save) or a fresh [`dump`](Mp3::dump).

#![forbid(unsafe_code)]

mod core;
pub mod err;
mod flac;
mod id3v1;
pub mod id3v2;
pub mod iff;
pub mod meta;
pub mod mp3;
mod mp4;
mod ogg;
pub mod string;
mod vorbis;

pub use crate::core::io::{Handle, Source};
pub use crate::err::{DecodeError, EncodeError, Error, Result, ValidationError};
pub use crate::id3v2::Version;
pub use crate::iff::Iff;
pub use crate::meta::picture::Picture;
pub use crate::meta::value::{Kind, Value};
pub use crate::meta::{Metadata, Select, GAPLESS, LANG};
pub use crate::mp3::{FrameHeader, Mp3, SaveOpts, Span};

use std::fmt::{self, Display, Formatter};
use std::path::Path;

/// The container format a source decoded as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Flac,
    M4a,
    Ogg,
    Iff,
    Mp3,
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Flac => write![f, "flac"],
            Self::M4a => write![f, "m4a"],
            Self::Ogg => write![f, "ogg"],
            Self::Iff => write![f, "iff"],
            Self::Mp3 => write![f, "mp3"],
        }
    }
}

/// A decoded file.
///
/// The read-only formats carry just their metadata; MP3 and IFF keep the
/// source open for writing.
pub enum Tagged {
    Flac(Metadata),
    M4a(Metadata),
    Ogg(Metadata),
    Iff(Iff),
    Mp3(Mp3),
}

impl Tagged {
    pub fn format(&self) -> Format {
        match self {
            Self::Flac(_) => Format::Flac,
            Self::M4a(_) => Format::M4a,
            Self::Ogg(_) => Format::Ogg,
            Self::Iff(_) => Format::Iff,
            Self::Mp3(_) => Format::Mp3,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::Flac(meta) | Self::M4a(meta) | Self::Ogg(meta) => meta,
            Self::Iff(iff) => iff.metadata(),
            Self::Mp3(mp3) => mp3.metadata(),
        }
    }

    pub fn into_metadata(self) -> Metadata {
        match self {
            Self::Flac(meta) | Self::M4a(meta) | Self::Ogg(meta) => meta,
            Self::Iff(iff) => iff.metadata().clone(),
            Self::Mp3(mp3) => mp3.metadata().clone(),
        }
    }
}

/// Squeezes one probe attempt into "keep trying" or a fatal error.
fn declined(err: Error) -> Result<()> {
    match err.into_probe_failure() {
        Error::InvalidMedia => Ok(()),
        fatal => Err(fatal),
    }
}

/// Decodes `src` with the first decoder that accepts it.
///
/// # Errors
/// [`Error::InvalidMedia`](Error::InvalidMedia) when every decoder declines;
/// an IO error aborts the probe immediately.
pub fn tagopen_from(mut src: Source) -> Result<Tagged> {
    match flac::parse(&mut src) {
        Ok(meta) => return Ok(Tagged::Flac(meta)),
        Err(err) => declined(err)?,
    }

    match mp4::parse(&mut src) {
        Ok(meta) => return Ok(Tagged::M4a(meta)),
        Err(err) => declined(err)?,
    }

    match ogg::parse(&mut src) {
        Ok(meta) => return Ok(Tagged::Ogg(meta)),
        Err(err) => declined(err)?,
    }

    match Iff::scan(&mut src) {
        Ok(state) => return Ok(Tagged::Iff(Iff::from_parts(state, src))),
        Err(err) => declined(err)?,
    }

    match Mp3::scan(&mut src) {
        Ok(state) => return Ok(Tagged::Mp3(Mp3::from_parts(state, src))),
        Err(err) => declined(err)?,
    }

    Err(Error::InvalidMedia)
}

/// Opens `path` and decodes it with the first decoder that accepts it.
///
/// The file is opened writable when possible so an MP3 can be saved in
/// place, falling back to read-only.
pub fn tagopen<P: AsRef<Path>>(path: P) -> Result<Tagged> {
    let src = match Source::open_rw(path.as_ref()) {
        Ok(src) => src,
        Err(_) => Source::open(path.as_ref())?,
    };

    tagopen_from(src)
}

/// Decodes `src` and returns a detached metadata snapshot, releasing the
/// source.
pub fn tagmeta_from(src: Source) -> Result<Metadata> {
    Ok(tagopen_from(src)?.into_metadata())
}

/// Opens `path` read-only and returns a detached metadata snapshot.
pub fn tagmeta<P: AsRef<Path>>(path: P) -> Result<Metadata> {
    tagmeta_from(Source::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flac::tests::fake_flac;
    use crate::mp3::tests::fake_mp3;
    use crate::ogg::tests::fake_ogg;

    #[test]
    fn dispatch_picks_format() {
        let flac = tagopen_from(Source::memory(fake_flac(&["TITLE=Song"]))).unwrap();
        assert_eq!(flac.format(), Format::Flac);

        let ogg = tagopen_from(Source::memory(fake_ogg(&["TITLE=Song"]))).unwrap();
        assert_eq!(ogg.format(), Format::Ogg);

        let mp3 = tagopen_from(Source::memory(fake_mp3(3))).unwrap();
        assert_eq!(mp3.format(), Format::Mp3);
    }

    #[test]
    fn dispatch_rejects_junk() {
        let result = tagmeta_from(Source::memory(b"just some text, nothing more".to_vec()));
        assert!(matches!(result, Err(Error::InvalidMedia)));
    }

    #[test]
    fn snapshot_detaches() {
        let meta = tagmeta_from(Source::memory(fake_flac(&["TITLE=Song"]))).unwrap();
        assert_eq!(meta.get("name").unwrap().as_text(), Some("Song"));
    }
}
