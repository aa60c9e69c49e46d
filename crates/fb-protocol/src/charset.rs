//! Server character sets.
//!
//! Each character set has a numeric id sent in descriptor slots and a
//! maximum byte width per character, which is used to size CHAR/VARCHAR
//! slots from a declared character length.

use encoding_rs::Encoding;

/// A server character set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset {
    name: &'static str,
    id: i16,
    bytes_per_char: u8,
    encoding: Option<&'static Encoding>,
}

macro_rules! charset {
    ($name:literal, $id:literal, $width:literal) => {
        Charset {
            name: $name,
            id: $id,
            bytes_per_char: $width,
            encoding: None,
        }
    };
    ($name:literal, $id:literal, $width:literal, $enc:path) => {
        Charset {
            name: $name,
            id: $id,
            bytes_per_char: $width,
            encoding: Some(&$enc),
        }
    };
}

static CHARSETS: &[Charset] = &[
    charset!("NONE", 0, 1),
    charset!("OCTETS", 1, 1),
    charset!("ASCII", 2, 1),
    charset!("UNICODE_FSS", 3, 3),
    charset!("UTF8", 4, 4),
    charset!("SJIS_0208", 5, 2, encoding_rs::SHIFT_JIS_INIT),
    charset!("EUCJ_0208", 6, 2, encoding_rs::EUC_JP_INIT),
    charset!("ISO8859_1", 21, 1, encoding_rs::WINDOWS_1252_INIT),
    charset!("ISO8859_2", 22, 1, encoding_rs::ISO_8859_2_INIT),
    charset!("KSC_5601", 44, 2, encoding_rs::EUC_KR_INIT),
    charset!("DOS866", 48, 1, encoding_rs::IBM866_INIT),
    charset!("WIN1250", 51, 1, encoding_rs::WINDOWS_1250_INIT),
    charset!("WIN1251", 52, 1, encoding_rs::WINDOWS_1251_INIT),
    charset!("WIN1252", 53, 1, encoding_rs::WINDOWS_1252_INIT),
    charset!("WIN1253", 54, 1, encoding_rs::WINDOWS_1253_INIT),
    charset!("WIN1254", 55, 1, encoding_rs::WINDOWS_1254_INIT),
    charset!("BIG_5", 56, 2, encoding_rs::BIG5_INIT),
    charset!("GB_2312", 57, 2, encoding_rs::GBK_INIT),
    charset!("KOI8R", 63, 1, encoding_rs::KOI8_R_INIT),
];

impl Charset {
    /// The `NONE` character set (bytes passed through untranslated).
    pub const NONE: Charset = charset!("NONE", 0, 1);
    /// The `OCTETS` character set (binary data).
    pub const OCTETS: Charset = charset!("OCTETS", 1, 1);
    /// The `UTF8` character set.
    pub const UTF8: Charset = charset!("UTF8", 4, 4);

    /// Look up a character set by name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Charset> {
        let name = name.trim();
        CHARSETS
            .iter()
            .find(|cs| cs.name.eq_ignore_ascii_case(name))
            .copied()
    }

    /// Look up a character set by id.
    #[must_use]
    pub fn from_id(id: i16) -> Option<Charset> {
        CHARSETS.iter().find(|cs| cs.id == id).copied()
    }

    /// Canonical name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Numeric id.
    #[must_use]
    pub fn id(&self) -> i16 {
        self.id
    }

    /// Maximum bytes per character.
    #[must_use]
    pub fn bytes_per_char(&self) -> u8 {
        self.bytes_per_char
    }

    /// Encode text in this character set.
    ///
    /// Returns `None` if the text contains characters the character set
    /// cannot represent.
    #[must_use]
    pub fn encode(&self, text: &str) -> Option<Vec<u8>> {
        match self.encoding {
            Some(encoding) => {
                let (bytes, _, had_errors) = encoding.encode(text);
                (!had_errors).then(|| bytes.into_owned())
            }
            None if self.id == 2 => text.is_ascii().then(|| text.as_bytes().to_vec()),
            None => Some(text.as_bytes().to_vec()),
        }
    }

    /// Decode bytes received in this character set.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self.encoding {
            Some(encoding) => encoding.decode_without_bom_handling(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::fmt::Display for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let cs = Charset::from_name("win1251").unwrap();
        assert_eq!(cs.id(), 52);
        assert_eq!(Charset::from_name("UTF8"), Some(Charset::UTF8));
        assert_eq!(Charset::from_name("KLINGON"), None);
        assert_eq!(Charset::from_id(1), Some(Charset::OCTETS));
    }

    #[test]
    fn test_encode_single_byte() {
        let cs = Charset::from_name("WIN1252").unwrap();
        assert_eq!(cs.encode("caf\u{e9}").unwrap(), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(cs.decode(&[b'c', b'a', b'f', 0xE9]), "caf\u{e9}");
    }

    #[test]
    fn test_encode_unmappable() {
        let cs = Charset::from_name("WIN1252").unwrap();
        assert!(cs.encode("\u{4e2d}").is_none());
        assert!(Charset::from_name("ASCII").unwrap().encode("\u{e9}").is_none());
    }

    #[test]
    fn test_utf8_passthrough() {
        assert_eq!(Charset::UTF8.encode("\u{e9}").unwrap(), "\u{e9}".as_bytes());
        assert_eq!(Charset::UTF8.bytes_per_char(), 4);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn utf8_text_survives_the_wire(text in "\\PC{0,64}") {
                let bytes = Charset::UTF8.encode(&text).unwrap();
                prop_assert!(bytes.len() <= text.chars().count() * usize::from(Charset::UTF8.bytes_per_char()));
                prop_assert_eq!(Charset::UTF8.decode(&bytes), text);
            }

            #[test]
            fn single_byte_charsets_use_one_byte_per_char(text in "[a-zA-Z0-9 \u{e0}-\u{ff}]{0,40}") {
                let cs = Charset::from_name("WIN1252").unwrap();
                let bytes = cs.encode(&text).unwrap();
                prop_assert_eq!(bytes.len(), text.chars().count());
                prop_assert_eq!(cs.decode(&bytes), text);
            }
        }
    }
}
