// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Encoding of recording metadata as object tags.
//!
//! Object tag charsets are restricted, so every key and value is URL-safe
//! base64 encoded on write and decoded on read.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::model::{LABEL_CONNECT_URL, LABEL_JVM_ID, Metadata, Target};
use crate::object_store::Tag;

/// Tag key holding the expiry of transient archives. Namespaced so that it
/// cannot collide with a user label.
pub const EXPIRY_TAG: &str = "flightdeck.expiry";

/// Tags for an archive of a recording on `target`.
pub fn archive_tags(target: &Target, metadata: &Metadata) -> Vec<Tag> {
    let mut labels = metadata.labels.clone();
    labels.insert(LABEL_CONNECT_URL.to_string(), target.connect_url.clone());
    labels.insert(LABEL_JVM_ID.to_string(), target.jvm_id.clone());
    encode(&Metadata {
        labels,
        expiry: metadata.expiry,
    })
}

/// Encode metadata into tags.
pub fn encode(metadata: &Metadata) -> Vec<Tag> {
    let mut tags: Vec<Tag> = metadata
        .labels
        .iter()
        .map(|(k, v)| Tag::new(URL_SAFE.encode(k), URL_SAFE.encode(v)))
        .collect();
    if let Some(expiry) = metadata.expiry {
        tags.push(Tag::new(
            URL_SAFE.encode(EXPIRY_TAG),
            URL_SAFE.encode(expiry.to_rfc3339()),
        ));
    }
    tags
}

/// Decode tags into metadata. Undecodable tags are skipped.
pub fn decode(tags: &[Tag]) -> Metadata {
    let mut metadata = Metadata::default();
    for tag in tags {
        let (Some(key), Some(value)) = (decode_part(&tag.key), decode_part(&tag.value)) else {
            warn!(tag_key = %tag.key, "Skipping undecodable object tag");
            continue;
        };
        if key == EXPIRY_TAG {
            match DateTime::parse_from_rfc3339(&value) {
                Ok(expiry) => metadata.expiry = Some(expiry.with_timezone(&Utc)),
                Err(e) => warn!(value = %value, error = %e, "Ignoring malformed expiry tag"),
            }
        } else {
            metadata.labels.insert(key, value);
        }
    }
    metadata
}

fn decode_part(s: &str) -> Option<String> {
    URL_SAFE
        .decode(s)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn target() -> Target {
        Target {
            id: 3,
            connect_url: "service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi".to_string(),
            alias: "app".to_string(),
            jvm_id: "jvm-3".to_string(),
        }
    }

    #[test]
    fn test_archive_tags_include_target_identity() {
        let mut labels = BTreeMap::new();
        labels.insert("env".to_string(), "prod/eu".to_string());
        let tags = archive_tags(&target(), &Metadata::with_labels(labels));

        for tag in &tags {
            assert!(tag.key.chars().all(|c| c.is_ascii_alphanumeric() || "-_=".contains(c)));
            assert!(tag.value.chars().all(|c| c.is_ascii_alphanumeric() || "-_=".contains(c)));
        }

        let decoded = decode(&tags);
        assert_eq!(decoded.labels.get("env").map(String::as_str), Some("prod/eu"));
        assert_eq!(
            decoded.labels.get(LABEL_CONNECT_URL).map(String::as_str),
            Some("service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi")
        );
        assert_eq!(decoded.labels.get(LABEL_JVM_ID).map(String::as_str), Some("jvm-3"));
        assert!(decoded.expiry.is_none());
    }

    #[test]
    fn test_expiry_tag() {
        let expiry = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let metadata = Metadata {
            labels: BTreeMap::new(),
            expiry: Some(expiry),
        };
        let decoded = decode(&encode(&metadata));
        assert_eq!(decoded.expiry, Some(expiry));
        assert!(decoded.labels.is_empty());
    }

    #[test]
    fn test_expiry_label_is_not_an_expiry() {
        let mut labels = BTreeMap::new();
        labels.insert("expiry".to_string(), "after-release".to_string());
        let decoded = decode(&encode(&Metadata::with_labels(labels)));
        assert!(decoded.expiry.is_none());
        assert_eq!(
            decoded.labels.get("expiry").map(String::as_str),
            Some("after-release")
        );

        let expiry = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let mut labels = BTreeMap::new();
        labels.insert("expiry".to_string(), "2031-01-01T00:00:00Z".to_string());
        let decoded = decode(&encode(&Metadata {
            labels,
            expiry: Some(expiry),
        }));
        assert_eq!(decoded.expiry, Some(expiry));
        assert_eq!(
            decoded.labels.get("expiry").map(String::as_str),
            Some("2031-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_undecodable_tags_skipped() {
        let tags = vec![
            Tag::new("not base64!", "x"),
            Tag::new(URL_SAFE.encode("ok"), URL_SAFE.encode("yes")),
        ];
        let decoded = decode(&tags);
        assert_eq!(decoded.labels.len(), 1);
        assert_eq!(decoded.labels.get("ok").map(String::as_str), Some("yes"));
    }
}
