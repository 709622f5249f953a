use chardetng::EncodingDetector;
use encoding_rs::{UTF_8, WINDOWS_1252};

use crate::error::Error;

/// How received bytes are turned into text for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Auto,
    Utf8,
    Ascii,
    Latin1,
}

impl std::str::FromStr for TextEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "ascii" => Ok(Self::Ascii),
            "latin1" | "latin-1" | "iso-8859-1" | "windows-1252" => Ok(Self::Latin1),
            _ => Err(Error::UnknownEncoding(s.to_string())),
        }
    }
}

impl TextEncoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Auto => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_owned(),
                Err(_) => {
                    let mut detector = EncodingDetector::new();
                    detector.feed(bytes, true);
                    detector.guess(None, true).decode(bytes).0.into_owned()
                }
            },
            Self::Utf8 => UTF_8.decode(bytes).0.into_owned(),
            // 7-bit frames only ever carry ASCII; anything above is shown as a placeholder
            Self::Ascii => bytes.iter().map(|&b| if b < 128 { b as char } else { '?' }).collect(),
            Self::Latin1 => WINDOWS_1252.decode(bytes).0.into_owned(),
        }
    }
}
