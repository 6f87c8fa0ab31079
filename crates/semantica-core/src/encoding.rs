//! Encoding Detector (C2).
//!
//! Identifies the text encoding of a raw byte buffer and decodes it to
//! Unicode. BOM sniffing and the actual byte decode are delegated to
//! `encoding_rs`; step 3 of spec.md §4.2 ("library-style statistical
//! detection") is delegated to `chardetng`'s `EncodingDetector`, the same
//! pairing `jburrow-fast_code_search` uses for its own text-encoding
//! detection. Legacy Mac Roman disambiguation stays a small in-crate
//! heuristic layered on top, since neither crate's detector distinguishes
//! it from windows-1252/Latin-1 (chardetng targets the WHATWG encodings a
//! browser actually negotiates; Mac Roman predates that set).

use chardetng::EncodingDetector;

/// Detected text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-16, little-endian.
    Utf16Le,
    /// UTF-16, big-endian.
    Utf16Be,
    /// UTF-8.
    Utf8,
    /// Windows-1252 (cp1252).
    Windows1252,
    /// ISO-8859-1 (Latin-1).
    Iso8859_1,
    /// Mac OS Roman.
    MacRoman,
}

impl Encoding {
    /// Lowercase identifier matching spec.md §8 scenario S6 expectations.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
            Self::Utf8 => "utf-8",
            Self::Windows1252 => "windows-1252",
            Self::Iso8859_1 => "iso-8859-1",
            Self::MacRoman => "macintosh",
        }
    }

    /// The `encoding_rs` label backing this variant's decode.
    fn to_encoding_rs(self) -> &'static encoding_rs::Encoding {
        match self {
            Self::Utf8 => encoding_rs::UTF_8,
            Self::Utf16Le => encoding_rs::UTF_16LE,
            Self::Utf16Be => encoding_rs::UTF_16BE,
            // The WHATWG "iso-8859-1" label is itself an alias for
            // windows-1252 in encoding_rs; there is no distinct Latin-1
            // decoder, matching how every modern browser resolves it.
            Self::Windows1252 | Self::Iso8859_1 => encoding_rs::WINDOWS_1252,
            Self::MacRoman => encoding_rs::MACINTOSH,
        }
    }

    fn from_encoding_rs(enc: &'static encoding_rs::Encoding) -> Self {
        match enc {
            _ if *enc == encoding_rs::UTF_8 => Self::Utf8,
            _ if *enc == encoding_rs::UTF_16LE => Self::Utf16Le,
            _ if *enc == encoding_rs::UTF_16BE => Self::Utf16Be,
            _ if *enc == encoding_rs::MACINTOSH => Self::MacRoman,
            // chardetng can also guess e.g. Shift_JIS/GBK for non-Western
            // text; spec.md §4.2 only names the encodings above, so
            // anything else collapses to the common web-legacy default.
            _ => Self::Windows1252,
        }
    }
}

/// Detect the encoding of `bytes`, following spec.md §4.2's ordered
/// algorithm (first match wins).
pub fn detect(bytes: &[u8]) -> Encoding {
    // 1. BOM sniffing via encoding_rs, which recognizes the UTF-8/UTF-16LE/
    // UTF-16BE BOMs spec.md names.
    if let Some((enc, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        if bom_len > 0 && enc != encoding_rs::UTF_8 {
            return Encoding::from_encoding_rs(enc);
        }
    }

    // 2. Null-byte parity heuristic for BOM-less UTF-16LE.
    let probe = &bytes[..bytes.len().min(100)];
    let null_count = probe.iter().filter(|&&b| b == 0).count();
    if null_count > 20 {
        let odd_nulls = probe
            .iter()
            .enumerate()
            .filter(|(i, &b)| i % 2 == 1 && b == 0)
            .count();
        let even_nulls = probe
            .iter()
            .enumerate()
            .filter(|(i, &b)| i % 2 == 0 && b == 0)
            .count();
        if odd_nulls > even_nulls * 2 {
            return Encoding::Utf16Le;
        }
    }

    // 3. Statistical detection via chardetng, which wins outright on
    // valid UTF-8 and otherwise guesses from its legacy-encoding corpus.
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let mut statistical = Encoding::from_encoding_rs(detector.guess(None, true));

    // 4. Mac Roman disambiguation: chardetng has no Mac Roman in its
    // target set, so a document that statistically lands on
    // windows-1252/Latin-1 gets a second look for the high-bit marker
    // bytes that are near-unambiguous in Mac Roman but control codes
    // everywhere else.
    if matches!(statistical, Encoding::Windows1252 | Encoding::Iso8859_1) {
        let window = &bytes[..bytes.len().min(1000)];
        let looks_mac_roman = window.windows(2).any(|pair| {
            let (a, b) = (pair[0], pair[1]);
            let marker = |x: u8| x == 0x8E || x == 0xD0;
            let ascii = |x: u8| (0x20..=0x7E).contains(&x);
            (marker(a) && ascii(b)) || (ascii(a) && marker(b))
        });
        if looks_mac_roman {
            statistical = Encoding::MacRoman;
        }
    }

    statistical
}

/// Decode `bytes` using `encoding`, falling back through
/// ISO-8859-1 -> windows-1252 -> UTF-8-with-replacement on failure.
pub fn decode(bytes: &[u8], encoding: Encoding) -> String {
    if let Some(s) = try_decode(bytes, encoding) {
        return s;
    }
    if let Some(s) = try_decode(bytes, Encoding::Iso8859_1) {
        return s;
    }
    if let Some(s) = try_decode(bytes, Encoding::Windows1252) {
        return s;
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn try_decode(bytes: &[u8], encoding: Encoding) -> Option<String> {
    if encoding == Encoding::Utf8 {
        return std::str::from_utf8(bytes).ok().map(str::to_owned);
    }
    let (decoded, _, had_errors) = encoding.to_encoding_rs().decode(bytes);
    if had_errors {
        None
    } else {
        Some(decoded.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_utf16le_bom() {
        let bytes = [0xFF, 0xFE, b'H', 0x00, b'e', 0x00];
        assert_eq!(detect(&bytes), Encoding::Utf16Le);
        assert_eq!(decode(&bytes, detect(&bytes)), "He");
    }

    #[test]
    fn detects_utf16be_bom() {
        let bytes = [0xFE, 0xFF, 0x00, b'H', 0x00, b'e'];
        assert_eq!(detect(&bytes), Encoding::Utf16Be);
    }

    #[test]
    fn detects_valid_utf8() {
        let bytes = "hello world".as_bytes();
        assert_eq!(detect(bytes), Encoding::Utf8);
    }

    #[test]
    fn detects_mac_roman_marker() {
        let mut bytes = vec![b'A', b'B', 0x8E, b'C'];
        bytes.extend_from_slice(&[0xFF; 996]);
        // force non-UTF8 so step 3 lands on windows-1252 before disambiguation
        bytes[bytes.len() - 1] = 0xC0;
        assert_eq!(detect(&bytes), Encoding::MacRoman);
    }

    #[test]
    fn decodes_windows_1252_curly_quotes() {
        let bytes = [0x93, b'h', b'i', 0x94];
        let decoded = decode(&bytes, Encoding::Windows1252);
        assert_eq!(decoded, "\u{201C}hi\u{201D}");
    }
}
