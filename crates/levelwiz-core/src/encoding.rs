use encoding_rs::{GBK, UTF_8, WINDOWS_1252};
use std::fmt;

/// Text encoding applied to lines received from the firmware.
///
/// Stock Marlin speaks ASCII, but vendor forks print localized `echo:`
/// messages, so the decoder is selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Auto,
    Utf8,
    Ascii,
    Latin1,
    Gbk,
}

impl std::str::FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "auto" => Self::Auto,
            "utf-8" | "utf8" => Self::Utf8,
            "ascii" => Self::Ascii,
            "latin1" | "latin-1" | "windows-1252" => Self::Latin1,
            "gbk" | "gb2312" => Self::Gbk,
            other => return Err(format!("unknown encoding `{other}`")),
        })
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Utf8 => "utf-8",
            Self::Ascii => "ascii",
            Self::Latin1 => "latin1",
            Self::Gbk => "gbk",
        })
    }
}

impl TextEncoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Auto => detect_and_decode(bytes),
            Self::Utf8 => UTF_8.decode(bytes).0.into_owned(),
            Self::Ascii => bytes.iter().map(|&b| if b < 128 { b as char } else { '?' }).collect(),
            Self::Latin1 => WINDOWS_1252.decode(bytes).0.into_owned(),
            Self::Gbk => GBK.decode(bytes).0.into_owned(),
        }
    }
}

fn detect_and_decode(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    encoding.decode(bytes).0.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_replaces_high_bytes() {
        assert_eq!(TextEncoding::Ascii.decode(b"ok\xff"), "ok?");
    }

    #[test]
    fn auto_passes_utf8_through() {
        assert_eq!(TextEncoding::Auto.decode("echo:Z 偏移".as_bytes()), "echo:Z 偏移");
    }

    #[test]
    fn names_round_trip() {
        for enc in [
            TextEncoding::Auto,
            TextEncoding::Utf8,
            TextEncoding::Ascii,
            TextEncoding::Latin1,
            TextEncoding::Gbk,
        ] {
            assert_eq!(enc.to_string().parse::<TextEncoding>(), Ok(enc));
        }
        assert!("ebcdic".parse::<TextEncoding>().is_err());
    }
}
