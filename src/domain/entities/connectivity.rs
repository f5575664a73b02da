use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionQuality {
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "5g")]
    FiveG,
    Unknown,
}

impl ConnectionQuality {
    pub fn is_slow(&self) -> bool {
        matches!(self, ConnectionQuality::Slow2g | ConnectionQuality::TwoG)
    }

    pub fn is_fast(&self) -> bool {
        matches!(self, ConnectionQuality::FourG | ConnectionQuality::FiveG)
    }
}

impl From<&str> for ConnectionQuality {
    fn from(value: &str) -> Self {
        match value {
            "slow-2g" => ConnectionQuality::Slow2g,
            "2g" => ConnectionQuality::TwoG,
            "3g" => ConnectionQuality::ThreeG,
            "4g" => ConnectionQuality::FourG,
            "5g" => ConnectionQuality::FiveG,
            _ => ConnectionQuality::Unknown,
        }
    }
}

/// Transient connectivity view. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub last_online_transition: Option<i64>,
    pub quality_hint: Option<ConnectionQuality>,
}

impl ConnectivityState {
    pub fn offline() -> Self {
        Self {
            is_online: false,
            last_online_transition: None,
            quality_hint: None,
        }
    }

    /// Milliseconds spent offline since the last transition, zero while online.
    pub fn time_offline_ms(&self, now_ms: i64) -> i64 {
        match (self.is_online, self.last_online_transition) {
            (false, Some(since)) => now_ms.saturating_sub(since),
            _ => 0,
        }
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::offline()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformSignal {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityEvent {
    BecameOnline { at: i64 },
    WentOffline { at: i64 },
    ProbeFailed { at: i64 },
}
