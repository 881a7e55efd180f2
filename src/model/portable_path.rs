//! Remaps filesystem paths recorded on another operating system.
//!
//! Artifacts exported on Windows carry paths such as `C:\Users\me\cracks`;
//! loaded on a POSIX host these are rewritten to `/c/Users/me/cracks`. POSIX
//! paths loaded on Windows get their separators flipped. Paths already in the
//! native convention pass through untouched.

use serde::{Deserialize, Deserializer};
use std::path::{PathBuf, MAIN_SEPARATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConvention {
    Windows,
    Posix,
}

impl PathConvention {
    pub fn native() -> Self {
        if MAIN_SEPARATOR == '\\' {
            PathConvention::Windows
        } else {
            PathConvention::Posix
        }
    }

    /// Guesses the convention a raw path string was written in.
    pub fn detect(raw: &str) -> Self {
        if drive_prefix(raw).is_some() || raw.contains('\\') {
            PathConvention::Windows
        } else {
            PathConvention::Posix
        }
    }
}

/// Returns the drive letter of `C:`, `C:\...` or `C:/...` style paths.
fn drive_prefix(raw: &str) -> Option<char> {
    let mut chars = raw.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_alphabetic() || chars.next()? != ':' {
        return None;
    }
    match chars.next() {
        None | Some('\\') | Some('/') => Some(letter),
        Some(_) => None,
    }
}

/// Converts `raw` to the native path convention.
pub fn to_native(raw: &str) -> PathBuf {
    remap(raw, PathConvention::native())
}

/// Converts `raw` to `target`, used directly by tests for the non-native
/// direction.
pub fn remap(raw: &str, target: PathConvention) -> PathBuf {
    match (PathConvention::detect(raw), target) {
        (PathConvention::Windows, PathConvention::Posix) => PathBuf::from(windows_to_posix(raw)),
        (PathConvention::Posix, PathConvention::Windows) => PathBuf::from(raw.replace('/', "\\")),
        _ => PathBuf::from(raw),
    }
}

fn windows_to_posix(raw: &str) -> String {
    // UNC share: \\server\share\dir -> //server/share/dir
    if let Some(rest) = raw.strip_prefix("\\\\") {
        return format!("//{}", join_components(rest));
    }

    match drive_prefix(raw) {
        Some(letter) => {
            let rest = join_components(&raw[2..]);
            if rest.is_empty() {
                format!("/{}", letter.to_ascii_lowercase())
            } else {
                format!("/{}/{}", letter.to_ascii_lowercase(), rest)
            }
        }
        None => {
            let joined = join_components(raw);
            if raw.starts_with('\\') || raw.starts_with('/') {
                format!("/{}", joined)
            } else {
                joined
            }
        }
    }
}

fn join_components(raw: &str) -> String {
    raw.split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// `deserialize_with` hook for optional path fields.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| to_native(&s)))
}
