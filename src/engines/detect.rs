//! Container sniffing from the first bytes of a source.
//!
//! Only used to guess which elementary streams a raw byte source carries so
//! the worker has something to select. A real demuxer reports its own.

use crate::core::engine::StreamKind;

/// Number of header bytes needed by [`detect_container`].
pub const PROBE_BYTES: usize = 192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    /// MKV/WebM
    Matroska,
    TransportStream,
    Wave,
    Mp3,
    Flac,
    Ogg,
    Unknown,
}

/// Detect container format from header bytes.
pub fn detect_container(header: &[u8]) -> ContainerFormat {
    // MP4/MOV: bytes 4..8 == "ftyp"
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return ContainerFormat::Mp4;
    }
    // EBML magic
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return ContainerFormat::Matroska;
    }
    // Sync byte at 0 and at the next 188-byte packet
    if header.len() > 188 && header[0] == 0x47 && header[188] == 0x47 {
        return ContainerFormat::TransportStream;
    }
    if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE" {
        return ContainerFormat::Wave;
    }
    if header.starts_with(b"fLaC") {
        return ContainerFormat::Flac;
    }
    if header.starts_with(b"OggS") {
        return ContainerFormat::Ogg;
    }
    if header.starts_with(b"ID3") || (header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0) {
        return ContainerFormat::Mp3;
    }
    ContainerFormat::Unknown
}

impl ContainerFormat {
    /// Streams such a container typically carries.
    pub fn streams(self) -> Vec<StreamKind> {
        match self {
            ContainerFormat::Mp4 | ContainerFormat::Matroska | ContainerFormat::TransportStream => {
                vec![StreamKind::Video, StreamKind::Audio]
            }
            ContainerFormat::Wave
            | ContainerFormat::Mp3
            | ContainerFormat::Flac
            | ContainerFormat::Ogg => vec![StreamKind::Audio],
            ContainerFormat::Unknown => vec![StreamKind::Data],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_mp4() {
        let mut header = vec![0u8; 32];
        header[4..8].copy_from_slice(b"ftyp");
        assert_eq!(detect_container(&header), ContainerFormat::Mp4);
        assert_eq!(
            ContainerFormat::Mp4.streams(),
            vec![StreamKind::Video, StreamKind::Audio]
        );
    }

    #[test]
    fn test_detect_matroska() {
        let header = [0x1A, 0x45, 0xDF, 0xA3, 0x01, 0x00];
        assert_eq!(detect_container(&header), ContainerFormat::Matroska);
    }

    #[test]
    fn test_detect_transport_stream() {
        let mut header = vec![0u8; PROBE_BYTES];
        header[0] = 0x47;
        header[188] = 0x47;
        assert_eq!(detect_container(&header), ContainerFormat::TransportStream);

        // Single sync byte is not enough
        header[188] = 0;
        assert_eq!(detect_container(&header), ContainerFormat::Unknown);
    }

    #[test]
    fn test_detect_audio_only() {
        assert_eq!(detect_container(b"fLaC\0\0\0\x22"), ContainerFormat::Flac);
        assert_eq!(detect_container(b"ID3\x04\0\0"), ContainerFormat::Mp3);
        assert_eq!(detect_container(b"RIFF\0\0\0\0WAVEfmt "), ContainerFormat::Wave);
        assert_eq!(ContainerFormat::Ogg.streams(), vec![StreamKind::Audio]);
    }

    #[test]
    fn test_short_or_unknown_header() {
        assert_eq!(detect_container(b""), ContainerFormat::Unknown);
        assert_eq!(detect_container(b"hello world"), ContainerFormat::Unknown);
        assert_eq!(ContainerFormat::Unknown.streams(), vec![StreamKind::Data]);
    }
}
