//! File name encoding policies.
//!
//! ZIP stores file names as raw bytes. General-purpose bit 11 marks them as
//! UTF-8; without it readers fall back to whatever codepage they consider
//! "legacy". The [`EncodingResolver`] pairs the process-wide policy with that
//! legacy codepage and is handed to the writer and reader at construction.

use std::borrow::Cow;

use encoding_rs::Encoding;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Environment variable that overrides locale detection for the legacy codepage.
pub const CODEPAGE_ENV: &str = "ZIPWRAP_CODEPAGE";

/// How file names are produced on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingPolicy {
    /// Locale codepage, UTF-8 flag clear.
    Legacy,
    /// Always UTF-8, UTF-8 flag set.
    Utf8,
}

/// A legacy single- or multi-byte codepage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codepage {
    /// IBM PC codepage 437, the historical ZIP default.
    Ibm437,
    /// Hosts whose locale charset already is UTF-8.
    Utf8,
    /// Any ASCII-compatible encoding known to `encoding_rs` (GBK, Shift_JIS, windows-1252, ...).
    Other(&'static Encoding),
}

impl Codepage {
    /// Resolve a charset label such as `GBK`, `cp936`, `UTF-8` or `437`.
    ///
    /// Returns `None` for unknown labels and for encodings that are not
    /// ASCII-compatible (UTF-16), which cannot hold path separators.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        match label.as_str() {
            "utf-8" | "utf8" => return Some(Codepage::Utf8),
            "cp437" | "437" | "ibm437" | "ibm-437" => return Some(Codepage::Ibm437),
            "cp936" | "936" | "ms936" => return Some(Codepage::Other(encoding_rs::GBK)),
            _ => {}
        }

        let encoding = Encoding::for_label(label.as_bytes())?;
        if encoding == encoding_rs::UTF_8 {
            Some(Codepage::Utf8)
        } else if encoding.is_ascii_compatible() && encoding != encoding_rs::REPLACEMENT {
            Some(Codepage::Other(encoding))
        } else {
            None
        }
    }

    /// Determine the codepage from the process environment.
    ///
    /// `ZIPWRAP_CODEPAGE` wins, then the charset part of the first non-empty
    /// `LC_ALL`, `LC_CTYPE`, `LANG`. Anything unresolvable yields IBM437.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(label) = lookup(CODEPAGE_ENV).filter(|v| !v.is_empty()) {
            match Self::from_label(&label) {
                Some(codepage) => return codepage,
                None => warn!("Unknown {CODEPAGE_ENV} value '{label}', ignoring it"),
            }
        }

        let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .find_map(|key| lookup(key).filter(|v| !v.is_empty()));

        let Some(locale) = locale else {
            return Codepage::Ibm437;
        };

        match locale_charset(&locale) {
            Some(charset) => Self::from_label(charset).unwrap_or_else(|| {
                warn!("Unknown locale charset '{charset}', falling back to IBM437");
                Codepage::Ibm437
            }),
            None => Codepage::Ibm437,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codepage::Ibm437 => "IBM437",
            Codepage::Utf8 => "UTF-8",
            Codepage::Other(encoding) => encoding.name(),
        }
    }

    pub fn encode(&self, name: &str) -> Result<Vec<u8>> {
        let unencodable = || Error::UnencodableName {
            name: name.to_string(),
            codepage: self.name(),
        };

        match self {
            Codepage::Utf8 => Ok(name.as_bytes().to_vec()),
            Codepage::Ibm437 => name
                .chars()
                .map(|c| cp437_byte(c).ok_or_else(unencodable))
                .collect(),
            Codepage::Other(encoding) => {
                let (bytes, used, had_errors) = encoding.encode(name);
                if had_errors || used != *encoding {
                    return Err(unencodable());
                }
                Ok(bytes.into_owned())
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let invalid = || Error::InvalidEncoding {
            bytes: bytes.to_vec(),
            codepage: self.name(),
        };

        match self {
            Codepage::Utf8 => decode_utf8(bytes),
            Codepage::Ibm437 => Ok(bytes.iter().copied().map(cp437_char).collect()),
            Codepage::Other(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(Cow::into_owned)
                .ok_or_else(invalid),
        }
    }
}

/// File name bytes as they go into a header, plus the bit 11 flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedName {
    pub bytes: Vec<u8>,
    pub utf8: bool,
}

/// Converts between relative path strings and stored file name bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingResolver {
    policy: EncodingPolicy,
    codepage: Codepage,
}

impl EncodingResolver {
    pub fn new(policy: EncodingPolicy, codepage: Codepage) -> Self {
        Self { policy, codepage }
    }

    /// Resolver for `policy` with the legacy codepage taken from the environment.
    pub fn from_env(policy: EncodingPolicy) -> Self {
        let codepage = Codepage::from_env();
        debug!(?policy, codepage = codepage.name(), "Resolved file name encoding");
        Self::new(policy, codepage)
    }

    pub fn policy(&self) -> EncodingPolicy {
        self.policy
    }

    pub fn codepage(&self) -> Codepage {
        self.codepage
    }

    pub fn encode(&self, path: &str) -> Result<EncodedName> {
        match self.policy {
            EncodingPolicy::Utf8 => Ok(EncodedName {
                bytes: path.as_bytes().to_vec(),
                utf8: true,
            }),
            EncodingPolicy::Legacy => Ok(EncodedName {
                bytes: self.codepage.encode(path)?,
                utf8: false,
            }),
        }
    }

    /// Decode stored name bytes. The flag decides, not the policy, so
    /// archives from other tools read correctly under either variant.
    pub fn decode(&self, bytes: &[u8], utf8_flag: bool) -> Result<String> {
        if utf8_flag {
            decode_utf8(bytes)
        } else {
            self.codepage.decode(bytes)
        }
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| Error::InvalidEncoding {
            bytes: bytes.to_vec(),
            codepage: "UTF-8",
        })
}

/// `zh_CN.GBK` -> `GBK`, `en_US.UTF-8@euro` -> `UTF-8`, `C` -> `None`.
fn locale_charset(locale: &str) -> Option<&str> {
    let (_, rest) = locale.split_once('.')?;
    let charset = rest.split('@').next().unwrap_or(rest);
    (!charset.is_empty()).then_some(charset)
}

const CP437_HIGH: [char; 128] = [
    '\u{00c7}', '\u{00fc}', '\u{00e9}', '\u{00e2}', '\u{00e4}', '\u{00e0}', '\u{00e5}', '\u{00e7}',
    '\u{00ea}', '\u{00eb}', '\u{00e8}', '\u{00ef}', '\u{00ee}', '\u{00ec}', '\u{00c4}', '\u{00c5}',
    '\u{00c9}', '\u{00e6}', '\u{00c6}', '\u{00f4}', '\u{00f6}', '\u{00f2}', '\u{00fb}', '\u{00f9}',
    '\u{00ff}', '\u{00d6}', '\u{00dc}', '\u{00a2}', '\u{00a3}', '\u{00a5}', '\u{20a7}', '\u{0192}',
    '\u{00e1}', '\u{00ed}', '\u{00f3}', '\u{00fa}', '\u{00f1}', '\u{00d1}', '\u{00aa}', '\u{00ba}',
    '\u{00bf}', '\u{2310}', '\u{00ac}', '\u{00bd}', '\u{00bc}', '\u{00a1}', '\u{00ab}', '\u{00bb}',
    '\u{2591}', '\u{2592}', '\u{2593}', '\u{2502}', '\u{2524}', '\u{2561}', '\u{2562}', '\u{2556}',
    '\u{2555}', '\u{2563}', '\u{2551}', '\u{2557}', '\u{255d}', '\u{255c}', '\u{255b}', '\u{2510}',
    '\u{2514}', '\u{2534}', '\u{252c}', '\u{251c}', '\u{2500}', '\u{253c}', '\u{255e}', '\u{255f}',
    '\u{255a}', '\u{2554}', '\u{2569}', '\u{2566}', '\u{2560}', '\u{2550}', '\u{256c}', '\u{2567}',
    '\u{2568}', '\u{2564}', '\u{2565}', '\u{2559}', '\u{2558}', '\u{2552}', '\u{2553}', '\u{256b}',
    '\u{256a}', '\u{2518}', '\u{250c}', '\u{2588}', '\u{2584}', '\u{258c}', '\u{2590}', '\u{2580}',
    '\u{03b1}', '\u{00df}', '\u{0393}', '\u{03c0}', '\u{03a3}', '\u{03c3}', '\u{00b5}', '\u{03c4}',
    '\u{03a6}', '\u{0398}', '\u{03a9}', '\u{03b4}', '\u{221e}', '\u{03c6}', '\u{03b5}', '\u{2229}',
    '\u{2261}', '\u{00b1}', '\u{2265}', '\u{2264}', '\u{2320}', '\u{2321}', '\u{00f7}', '\u{2248}',
    '\u{00b0}', '\u{2219}', '\u{00b7}', '\u{221a}', '\u{207f}', '\u{00b2}', '\u{25a0}', '\u{00a0}',
];

fn cp437_char(byte: u8) -> char {
    if byte < 0x80 {
        byte as char
    } else {
        CP437_HIGH[(byte - 0x80) as usize]
    }
}

fn cp437_byte(c: char) -> Option<u8> {
    if c.is_ascii() {
        return Some(c as u8);
    }
    CP437_HIGH
        .iter()
        .position(|&high| high == c)
        .map(|i| 0x80 + i as u8)
}
