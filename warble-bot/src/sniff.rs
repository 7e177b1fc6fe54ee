//! Magic-byte media type detection.
//!
//! Just enough sniffing to route a file to the right message kind and fill
//! the mimetype when the caller didn't supply one. Unrecognized content is
//! `application/octet-stream` and goes out as a document.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sniffed {
    pub mime: &'static str,
    pub ext: &'static str,
}

const OCTET_STREAM: Sniffed = Sniffed { mime: "application/octet-stream", ext: "bin" };

pub fn detect(data: &[u8]) -> Sniffed {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Sniffed { mime: "image/jpeg", ext: "jpg" };
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Sniffed { mime: "image/png", ext: "png" };
    }
    if data.starts_with(b"GIF8") {
        return Sniffed { mime: "image/gif", ext: "gif" };
    }
    if data.len() >= 12 && data.starts_with(b"RIFF") {
        if &data[8..12] == b"WEBP" {
            return Sniffed { mime: "image/webp", ext: "webp" };
        }
        if &data[8..12] == b"WAVE" {
            return Sniffed { mime: "audio/wav", ext: "wav" };
        }
    }
    // ISO-BMFF: the brand box sits at offset 4
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return Sniffed { mime: "video/mp4", ext: "mp4" };
    }
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Sniffed { mime: "video/webm", ext: "webm" };
    }
    if data.starts_with(b"OggS") {
        return Sniffed { mime: "audio/ogg", ext: "ogg" };
    }
    if data.starts_with(b"ID3") || data.starts_with(&[0xFF, 0xFB]) {
        return Sniffed { mime: "audio/mpeg", ext: "mp3" };
    }
    if data.starts_with(b"%PDF") {
        return Sniffed { mime: "application/pdf", ext: "pdf" };
    }
    OCTET_STREAM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_formats() {
        assert_eq!(detect(&[0xFF, 0xD8, 0xFF, 0xE0]).mime, "image/jpeg");
        assert_eq!(detect(b"\x89PNG\r\n\x1a\n").mime, "image/png");
        assert_eq!(detect(b"GIF89a...").mime, "image/gif");
        assert_eq!(detect(b"RIFF\x00\x00\x00\x00WEBPVP8 ").mime, "image/webp");
        assert_eq!(detect(b"RIFF\x00\x00\x00\x00WAVEfmt ").mime, "audio/wav");
        assert_eq!(detect(b"\x00\x00\x00\x18ftypmp42").mime, "video/mp4");
        assert_eq!(detect(b"OggS\x00\x02").mime, "audio/ogg");
        assert_eq!(detect(b"ID3\x04\x00").mime, "audio/mpeg");
        assert_eq!(detect(b"%PDF-1.7").mime, "application/pdf");
    }

    #[test]
    fn unknown_is_octet_stream() {
        assert_eq!(detect(b"hello world").mime, "application/octet-stream");
        assert_eq!(detect(&[]).mime, "application/octet-stream");
    }
}
