use std::net::SocketAddr;
use serde::{Deserialize, Serialize};

use crate::callerid::CallerIdStrategy;
use crate::error::{DialerError, Result};

/// Top-level power dialer configuration
///
/// # Configuration Sections
///
/// - [`general`]: networking and system limits
/// - [`dialing`]: line counts and caller-ID strategy defaults
/// - [`timers`]: the safety timeouts that cap runaway calls
/// - [`bridge`]: operator softphone endpoint for audio bridging
/// - [`events`]: broadcast channel sizing and snapshot shaping
/// - [`database`]: persistent storage settings
///
/// # Examples
///
/// ```
/// use dialer_engine::DialerConfig;
///
/// let config = DialerConfig::default();
/// assert_eq!(config.dialing.default_max_lines, 3);
/// assert_eq!(config.timers.ring_timeout_secs, 30);
/// config.validate().expect("defaults are valid");
/// ```
///
/// [`general`]: GeneralConfig
/// [`dialing`]: DialingConfig
/// [`timers`]: TimerConfig
/// [`bridge`]: BridgeConfig
/// [`events`]: EventsConfig
/// [`database`]: DatabaseConfig
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialerConfig {
    /// General system settings
    pub general: GeneralConfig,

    /// Line-filling and caller-ID defaults
    pub dialing: DialingConfig,

    /// Safety timer settings
    pub timers: TimerConfig,

    /// Operator audio bridge settings
    pub bridge: BridgeConfig,

    /// Event broadcast settings
    pub events: EventsConfig,

    /// Persistent storage settings
    pub database: DatabaseConfig,
}

/// General system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Bind address for the HTTP control surface and webhook receiver
    pub bind_addr: SocketAddr,

    /// Publicly reachable URL the provider posts webhooks back to
    pub webhook_url: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            webhook_url: "http://127.0.0.1:8080/webhooks/telephony".to_string(),
        }
    }
}

/// Line-filling and caller-ID configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialingConfig {
    /// Default number of concurrent lines when a run does not specify one
    pub default_max_lines: u8,

    /// Absolute ceiling on concurrent lines per run
    ///
    /// Run requests are clamped to `min(requested, absolute_max_lines)`.
    pub absolute_max_lines: u8,

    /// Default caller-ID selection strategy
    pub default_strategy: CallerIdStrategy,
}

impl Default for DialingConfig {
    fn default() -> Self {
        Self {
            default_max_lines: 3,
            absolute_max_lines: 10,
            default_strategy: CallerIdStrategy::RoundRobin,
        }
    }
}

/// Safety timer configuration
///
/// These timers bound the cost of every outbound attempt. Firing against
/// a leg that already reached a terminal state is a guarded no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Seconds a leg may sit in dialing/ringing before it is forced to
    /// `no_answer` and hung up
    pub ring_timeout_secs: u64,

    /// Seconds a leg may sit with an unresolved AMD verdict before it is
    /// forced to `voicemail` and hung up
    pub amd_unknown_timeout_secs: u64,

    /// Hard per-call duration cap, enforced provider-side via the
    /// time-limit parameter on the call request
    pub max_call_duration_secs: u64,

    /// How long a completed leg stays visible in the run snapshot before
    /// it is pruned
    pub completed_display_secs: u64,

    /// How long a completed run's state is retained in memory to absorb
    /// straggling webhooks before it is discarded
    pub completion_grace_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 30,
            amd_unknown_timeout_secs: 45,
            max_call_duration_secs: 600,
            completed_display_secs: 4,
            completion_grace_secs: 15,
        }
    }
}

/// Operator audio bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Fixed softphone address the operator answers bridged calls on
    pub operator_endpoint: String,

    /// Whether the provider should play entry beeps into the conference
    pub entry_beep: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            operator_endpoint: "sip:operator@softphone.local".to_string(),
            entry_beep: false,
        }
    }
}

/// Event broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast channel capacity; slow subscribers lag rather than
    /// blocking the engine
    pub channel_capacity: usize,

    /// Number of queued contacts included in each run snapshot
    pub queue_preview_len: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            queue_preview_len: 10,
        }
    }
}

/// Persistent storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database URL; `None` runs fully in memory with no
    /// persistence
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None }
    }
}

impl DialerConfig {
    /// Validate the configuration
    ///
    /// Checks internal consistency of the line limits and timers. Called
    /// by the engine constructor; also usable directly when loading
    /// configuration from a file.
    pub fn validate(&self) -> Result<()> {
        if self.dialing.absolute_max_lines == 0 {
            return Err(DialerError::configuration(
                "absolute_max_lines must be at least 1",
            ));
        }
        if self.dialing.default_max_lines == 0
            || self.dialing.default_max_lines > self.dialing.absolute_max_lines
        {
            return Err(DialerError::configuration(format!(
                "default_max_lines must be in 1..={}",
                self.dialing.absolute_max_lines
            )));
        }
        if self.timers.ring_timeout_secs == 0 {
            return Err(DialerError::configuration("ring_timeout_secs must be non-zero"));
        }
        if self.timers.amd_unknown_timeout_secs < self.timers.ring_timeout_secs {
            return Err(DialerError::configuration(
                "amd_unknown_timeout_secs must not be shorter than ring_timeout_secs",
            ));
        }
        if self.timers.max_call_duration_secs <= self.timers.amd_unknown_timeout_secs {
            return Err(DialerError::configuration(
                "max_call_duration_secs must exceed amd_unknown_timeout_secs",
            ));
        }
        if self.bridge.operator_endpoint.is_empty() {
            return Err(DialerError::configuration("operator_endpoint must be set"));
        }
        if self.events.channel_capacity == 0 {
            return Err(DialerError::configuration("channel_capacity must be non-zero"));
        }
        Ok(())
    }
}
