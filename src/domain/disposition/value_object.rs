//! Disposition value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a call ended, as categorised by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Interested,
    NotInterested,
    MeetingBooked,
    Callback,
    LeftVoicemail,
    Gatekeeper,
    NoAnswer,
    WrongNumber,
}

impl Disposition {
    pub const ALL: [Disposition; 8] = [
        Disposition::Interested,
        Disposition::NotInterested,
        Disposition::MeetingBooked,
        Disposition::Callback,
        Disposition::LeftVoicemail,
        Disposition::Gatekeeper,
        Disposition::NoAnswer,
        Disposition::WrongNumber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Interested => "interested",
            Disposition::NotInterested => "not_interested",
            Disposition::MeetingBooked => "meeting_booked",
            Disposition::Callback => "callback",
            Disposition::LeftVoicemail => "left_voicemail",
            Disposition::Gatekeeper => "gatekeeper",
            Disposition::NoAnswer => "no_answer",
            Disposition::WrongNumber => "wrong_number",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s)
    }

    /// Whether a person (not a machine or a gatekeeper) answered
    ///
    /// Voicemail and gatekeeper answers look "completed" to the provider as
    /// well, so talk time or provider status alone must not decide this.
    pub fn is_human_pickup(&self) -> bool {
        matches!(
            self,
            Disposition::Interested
                | Disposition::NotInterested
                | Disposition::MeetingBooked
                | Disposition::Callback
        )
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
