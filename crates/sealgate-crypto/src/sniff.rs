//! MIME detection from the head of a plaintext buffer

/// Bytes inspected for detection
pub const SNIFF_LEN: usize = 512;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"OggS\x00", "application/ogg"),
];

/// Detect the content type of `data` from its first 512 bytes.
pub fn detect_mime(data: &[u8]) -> &'static str {
    let head = &data[..data.len().min(SNIFF_LEN)];

    if head.is_empty() {
        return "text/plain; charset=utf-8";
    }

    for (magic, mime) in SIGNATURES {
        if head.starts_with(magic) {
            return mime;
        }
    }

    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp";
    }

    let text = skip_leading_space(head);
    if starts_with_ignore_case(text, b"<!doctype html")
        || starts_with_ignore_case(text, b"<html")
        || starts_with_ignore_case(text, b"<head")
        || starts_with_ignore_case(text, b"<body")
    {
        return "text/html; charset=utf-8";
    }
    if text.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if looks_like_text(head) {
        if matches!(text.first(), Some(b'{') | Some(b'[')) {
            return "application/json";
        }
        return "text/plain; charset=utf-8";
    }

    "application/octet-stream"
}

fn skip_leading_space(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// UTF-8 with no control bytes other than whitespace. A multi-byte sequence
/// cut off at the sniff boundary still counts as text.
fn looks_like_text(head: &[u8]) -> bool {
    let valid = match std::str::from_utf8(head) {
        Ok(s) => s,
        Err(e) if e.error_len().is_none() => {
            // Truncated trailing sequence; `valid_up_to` is a char boundary
            match std::str::from_utf8(&head[..e.valid_up_to()]) {
                Ok(s) => s,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    !valid
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_signatures() {
        assert_eq!(detect_mime(b"%PDF-1.7\n..."), "application/pdf");
        assert_eq!(detect_mime(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), "image/png");
        assert_eq!(detect_mime(b"\xff\xd8\xff\xe0\0\x10JFIF"), "image/jpeg");
        assert_eq!(detect_mime(b"GIF89a\x01\x00"), "image/gif");
        assert_eq!(detect_mime(b"PK\x03\x04\x14\x00"), "application/zip");
        assert_eq!(detect_mime(b"\x1f\x8b\x08\x00"), "application/x-gzip");
        assert_eq!(detect_mime(b"RIFF\x24\0\0\0WEBPVP8 "), "image/webp");
    }

    #[test]
    fn test_text_kinds() {
        assert_eq!(detect_mime(b"hello world\n"), "text/plain; charset=utf-8");
        assert_eq!(
            detect_mime(b"  <!DOCTYPE html><html></html>"),
            "text/html; charset=utf-8"
        );
        assert_eq!(detect_mime(b"<?xml version=\"1.0\"?>"), "text/xml; charset=utf-8");
        assert_eq!(detect_mime(b"{\"a\": 1}"), "application/json");
        assert_eq!(detect_mime("héllo wörld".as_bytes()), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_binary_fallback() {
        assert_eq!(detect_mime(&[0u8, 1, 2, 3, 0xfe, 0xff]), "application/octet-stream");
    }

    #[test]
    fn test_only_head_is_inspected() {
        let mut data = vec![b'a'; SNIFF_LEN];
        data.extend_from_slice(&[0u8; 64]);
        assert_eq!(detect_mime(&data), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_multibyte_cut_at_boundary() {
        let mut data = vec![b'a'; SNIFF_LEN - 1];
        data.extend_from_slice("é".as_bytes());
        assert_eq!(detect_mime(&data), "text/plain; charset=utf-8");
    }
}
