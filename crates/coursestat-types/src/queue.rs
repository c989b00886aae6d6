//! Queue descriptor configuration.
//!
//! A descriptor selects one of the three interchangeable queue backings
//! and carries the backing-specific parameters.

use serde::{Deserialize, Serialize};

/// Discriminated queue-backing configuration.
///
/// Recognized variants mirror the daemon configuration file:
///
/// ```toml
/// [incoming_queue]
/// type = "file"
/// location = "/var/lib/coursestat/incoming.queue"
///
/// [work_queue]
/// type = "dir"
/// location = "/var/lib/coursestat/work"
/// prefix = "job-"
/// name = "item"
/// suffix = ".json"
/// ```
///
/// The `external` variant delegates ordering and durability to a
/// transactional queue table in Postgres.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueDescriptor {
    /// The whole queue is one serialized list in a single file.
    File { location: String },
    /// One file per item under `location`, named `prefix + name + seq + suffix`.
    Dir {
        location: String,
        #[serde(default = "default_prefix")]
        prefix: String,
        #[serde(default = "default_name")]
        name: String,
        #[serde(default = "default_suffix")]
        suffix: String,
    },
    /// External transactional queue (Postgres connection string).
    #[serde(rename = "external")]
    External { connection: String },
}

fn default_prefix() -> String {
    "item-".to_string()
}

fn default_name() -> String {
    "entry".to_string()
}

fn default_suffix() -> String {
    ".json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_descriptor_from_toml() {
        let parsed: QueueDescriptor =
            toml::from_str("type = \"file\"\nlocation = \"/tmp/q.json\"\n").unwrap();
        assert_eq!(
            parsed,
            QueueDescriptor::File {
                location: "/tmp/q.json".to_string()
            }
        );
    }

    #[test]
    fn test_dir_descriptor_defaults() {
        let parsed: QueueDescriptor =
            toml::from_str("type = \"dir\"\nlocation = \"/tmp/work\"\n").unwrap();
        match parsed {
            QueueDescriptor::Dir {
                prefix,
                name,
                suffix,
                ..
            } => {
                assert_eq!(prefix, "item-");
                assert_eq!(name, "entry");
                assert_eq!(suffix, ".json");
            }
            other => panic!("expected dir descriptor, got {:?}", other),
        }
    }

    #[test]
    fn test_external_descriptor() {
        let parsed: QueueDescriptor = serde_json::from_value(serde_json::json!({
            "type": "external",
            "connection": "postgres://localhost/coursestat"
        }))
        .unwrap();
        assert_eq!(
            parsed,
            QueueDescriptor::External {
                connection: "postgres://localhost/coursestat".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<QueueDescriptor, _> =
            serde_json::from_value(serde_json::json!({"type": "redis", "location": "x"}));
        assert!(result.is_err());
    }
}
