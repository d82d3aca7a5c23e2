// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Archive filenames and storage keys.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

use super::ArchiveError;

/// Archive filename for a recording: `{alias}_{name}_{YYYYMMDDTHHMMSSZ}.jfr`.
///
/// Runs of characters other than ASCII letters, digits and `-` in the alias
/// and the name collapse to a single `-`, which keeps `_` free to delimit the
/// three fields.
pub fn archive_filename(alias: &str, recording_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}.jfr",
        normalize(alias),
        normalize(recording_name),
        at.format("%Y%m%dT%H%M%SZ")
    )
}

/// `filename` with `-{seq}` before its `.jfr` extension, distinguishing
/// archives made within the same second.
pub fn numbered_filename(filename: &str, seq: u32) -> String {
    match filename.strip_suffix(".jfr") {
        Some(stem) => format!("{}-{}.jfr", stem, seq),
        None => format!("{}-{}", filename, seq),
    }
}

fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

/// Storage key of an archived recording.
pub fn storage_key(jvm_id: &str, filename: &str) -> String {
    format!("{}/{}", jvm_id, filename)
}

/// Listing prefix for one JVM's archives.
pub fn jvm_prefix(jvm_id: &str) -> String {
    format!("{}/", jvm_id)
}

/// Opaque token for `(jvm_id, filename)`: unpadded URL-safe base64 of the key.
pub fn encode_key(jvm_id: &str, filename: &str) -> String {
    URL_SAFE_NO_PAD.encode(storage_key(jvm_id, filename))
}

/// Inverse of [`encode_key`]. Splits on the first `/`.
pub fn decode_key(token: &str) -> Result<(String, String), ArchiveError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| ArchiveError::InvalidKey(format!("{}: {}", token, e)))?;
    let key = String::from_utf8(raw)
        .map_err(|_| ArchiveError::InvalidKey(format!("{}: not UTF-8", token)))?;
    split_key(&key)
}

/// Split a storage key into `(jvm_id, filename)` on the first `/`.
pub fn split_key(key: &str) -> Result<(String, String), ArchiveError> {
    key.split_once('/')
        .map(|(jvm_id, filename)| (jvm_id.to_string(), filename.to_string()))
        .ok_or_else(|| ArchiveError::InvalidKey(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_archive_filename_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        assert_eq!(
            archive_filename("app", "test", at),
            "app_test_20250314T150926Z.jfr"
        );
    }

    #[test]
    fn test_archive_filename_normalizes_separators() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            archive_filename("my_app.prod", "cpu profile", at),
            "my-app-prod_cpu-profile_20250102T030405Z.jfr"
        );
        assert_eq!(
            archive_filename("host:9091", "a__b", at),
            "host-9091_a-b_20250102T030405Z.jfr"
        );
    }

    #[test]
    fn test_numbered_filename() {
        assert_eq!(
            numbered_filename("app_test_20250314T150926Z.jfr", 1),
            "app_test_20250314T150926Z-1.jfr"
        );
        assert_eq!(numbered_filename("pushed", 2), "pushed-2");
    }

    #[test]
    fn test_key_round_trip() {
        let cases = [
            ("abc123", "app_test_20250101T000000Z.jfr"),
            ("jvm-id+with=chars", "file with spaces.jfr"),
            ("", "empty-jvm.jfr"),
            ("jvm", ""),
        ];
        for (jvm_id, filename) in cases {
            let token = encode_key(jvm_id, filename);
            assert!(!token.contains('='));
            assert!(!token.contains('+'));
            assert_eq!(
                decode_key(&token).unwrap(),
                (jvm_id.to_string(), filename.to_string())
            );
        }
    }

    #[test]
    fn test_decode_splits_on_first_separator() {
        let token = URL_SAFE_NO_PAD.encode("jvm/dir/file.jfr");
        assert_eq!(
            decode_key(&token).unwrap(),
            ("jvm".to_string(), "dir/file.jfr".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_key("!!!").is_err());
        assert!(decode_key(&URL_SAFE_NO_PAD.encode("no-separator")).is_err());
    }
}
