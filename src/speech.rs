// Speech feed records and submission payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Topic recorded when a submission leaves it out.
pub const DEFAULT_DEBATE_TOPIC: &str = "General Debate";

/// Speech duration in seconds recorded when a submission leaves it out.
pub const DEFAULT_DURATION_SECS: i64 = 60;

/// A stored speech. Immutable after creation; `likes` is reserved for a
/// future increment operation and has no mutation in the current surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speech {
    pub id: i64,
    pub speaker: String,
    pub content: String,
    pub debate_topic: String,
    pub duration: i64,
    pub speech_time: DateTime<Utc>,
    pub likes: i64,
}

/// A speech submission, shared by `POST /api/speeches` and the realtime
/// `new_speech` frame. The JSON field is `debateTopic` to match the client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewSpeech {
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "debateTopic")]
    pub debate_topic: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
}

impl NewSpeech {
    /// Both `speaker` and `content` are required non-empty strings.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.speaker.trim().is_empty() {
            return Err(HubError::validation("speaker is required"));
        }
        if self.content.trim().is_empty() {
            return Err(HubError::validation("content is required"));
        }
        Ok(())
    }

    /// Topic with the default applied.
    pub fn topic(&self) -> &str {
        match self.debate_topic.as_deref() {
            Some(topic) if !topic.is_empty() => topic,
            _ => DEFAULT_DEBATE_TOPIC,
        }
    }

    /// Duration with the default applied.
    pub fn duration_secs(&self) -> i64 {
        self.duration.unwrap_or(DEFAULT_DURATION_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(speaker: &str, content: &str) -> NewSpeech {
        NewSpeech {
            speaker: speaker.to_string(),
            content: content.to_string(),
            ..NewSpeech::default()
        }
    }

    #[test]
    fn valid_submission_passes() {
        assert!(submission("Alice", "Opening statement").validate().is_ok());
    }

    #[test]
    fn empty_speaker_rejected() {
        let err = submission("", "x").validate().unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
    }

    #[test]
    fn whitespace_content_rejected() {
        let err = submission("Alice", "   ").validate().unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
    }

    #[test]
    fn defaults_applied_when_fields_missing() {
        let speech = submission("Alice", "x");
        assert_eq!(speech.topic(), DEFAULT_DEBATE_TOPIC);
        assert_eq!(speech.duration_secs(), DEFAULT_DURATION_SECS);
    }

    #[test]
    fn explicit_topic_and_duration_kept() {
        let speech = NewSpeech {
            debate_topic: Some("Climate Policy".to_string()),
            duration: Some(120),
            ..submission("Alice", "x")
        };
        assert_eq!(speech.topic(), "Climate Policy");
        assert_eq!(speech.duration_secs(), 120);
    }

    #[test]
    fn camel_case_topic_field_parses() {
        let speech: NewSpeech = serde_json::from_str(
            r#"{"speaker":"A","content":"B","debateTopic":"Ethics","duration":90}"#,
        )
        .unwrap();
        assert_eq!(speech.topic(), "Ethics");
        assert_eq!(speech.duration_secs(), 90);
    }

    #[test]
    fn empty_topic_string_falls_back_to_default() {
        let speech = NewSpeech {
            debate_topic: Some(String::new()),
            ..submission("Alice", "x")
        };
        assert_eq!(speech.topic(), DEFAULT_DEBATE_TOPIC);
    }
}
