//! Queue payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to run one job definition, stored as the queue item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Identifier of the job definition to run
    pub job: String,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

impl JobDescriptor {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            requested_at: Utc::now(),
            triggered_by: None,
        }
    }

    pub fn with_triggered_by(mut self, who: impl Into<String>) -> Self {
        self.triggered_by = Some(who.into());
        self
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(item: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_minimal_payload() {
        let payload = br#"{"job":"airports","requested_at":"2024-03-01T12:00:00Z"}"#;
        let descriptor = JobDescriptor::decode(payload).unwrap();
        assert_eq!(descriptor.job, "airports");
        assert_eq!(descriptor.requested_at.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert!(descriptor.triggered_by.is_none());
    }

    #[test]
    fn test_encode_omits_missing_trigger() {
        let encoded = String::from_utf8(JobDescriptor::new("a").encode().unwrap()).unwrap();
        assert!(!encoded.contains("triggered_by"));

        let encoded = JobDescriptor::new("a").with_triggered_by("cron").encode().unwrap();
        assert_eq!(JobDescriptor::decode(&encoded).unwrap().triggered_by.as_deref(), Some("cron"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(JobDescriptor::decode(b"\x00\x01").is_err());
        assert!(JobDescriptor::decode(br#"{"requested_at":"2024-03-01T12:00:00Z"}"#).is_err());
    }
}
