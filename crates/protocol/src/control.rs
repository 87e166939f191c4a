//! Control messages carried as text frames on the data channel.
//!
//! Binary frames on the same channel are raw file bytes. A transfer is
//! always `file-metadata`, zero or more binary chunks, then `file-end`.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// One entry of the sender's offered file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub index: usize,
}

/// Closed set of data-channel control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Sender to receiver: files available for download.
    FileList { files: Vec<FileEntry> },

    /// Receiver to sender: please transfer the file at `file_index`.
    #[serde(rename_all = "camelCase")]
    DownloadRequest { file_index: usize },

    /// Sender to receiver: a file's bytes follow.
    #[serde(rename_all = "camelCase")]
    FileMetadata {
        name: String,
        size: u64,
        file_index: usize,
        total_files: usize,
    },

    /// Sender to receiver: every byte of the current file has been sent.
    FileEnd,
}

const KNOWN_KINDS: &[&str] = &["file-list", "download-request", "file-metadata", "file-end"];

impl ControlMessage {
    /// Parses a text frame, distinguishing unknown kinds from malformed ones.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?;
        if !KNOWN_KINDS.contains(&kind) {
            return Err(ProtocolError::UnknownKind(kind.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serializes to the text-frame representation.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileList { .. } => "file-list",
            Self::DownloadRequest { .. } => "download-request",
            Self::FileMetadata { .. } => "file-metadata",
            Self::FileEnd => "file-end",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_wire_shape() {
        let msg = ControlMessage::FileMetadata {
            name: "a.bin".into(),
            size: 42,
            file_index: 1,
            total_files: 3,
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({"type": "file-metadata", "name": "a.bin", "size": 42, "fileIndex": 1, "totalFiles": 3})
        );
    }

    #[test]
    fn parses_download_request() {
        let msg = ControlMessage::parse(r#"{"type":"download-request","fileIndex":4}"#).unwrap();
        assert_eq!(msg, ControlMessage::DownloadRequest { file_index: 4 });
    }

    #[test]
    fn parses_file_end() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"file-end"}"#).unwrap(),
            ControlMessage::FileEnd
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = ControlMessage::parse(r#"{"type":"file-pause"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(k) if k == "file-pause"));
    }

    #[test]
    fn rejects_missing_type() {
        let err = ControlMessage::parse(r#"{"name":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));
    }

    #[test]
    fn rejects_known_kind_with_bad_payload() {
        let err = ControlMessage::parse(r#"{"type":"download-request"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn file_list_roundtrip() {
        let msg = ControlMessage::FileList {
            files: vec![
                FileEntry { name: "a".into(), size: 1, index: 0 },
                FileEntry { name: "b".into(), size: 0, index: 1 },
            ],
        };
        let parsed = ControlMessage::parse(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }
}
