use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub listener: ListenerSettings,
    pub emitter: EmitterSettings,
    pub log: LogSettings,
}

/// Subscription the binary registers, plus consumer tuning.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ListenerSettings {
    pub topic: String,
    pub channel: String,
    pub lookup: Vec<String>,
    pub nsqd: Vec<String>,
    pub handler_concurrency: usize,
    pub max_attempts: u16,
    pub requeue_delay_ms: u64,
    pub dial_timeout_ms: u64,
}

/// Publish-side connection used for replies.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EmitterSettings {
    pub address: Option<String>,
    pub dial_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub listener: Option<PartialListenerSettings>,
    pub emitter: Option<PartialEmitterSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialListenerSettings {
    pub topic: Option<String>,
    pub channel: Option<String>,
    pub lookup: Option<Vec<String>>,
    pub nsqd: Option<Vec<String>>,
    pub handler_concurrency: Option<usize>,
    pub max_attempts: Option<u16>,
    pub requeue_delay_ms: Option<u64>,
    pub dial_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialEmitterSettings {
    pub address: Option<String>,
    pub dial_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listener: ListenerSettings {
                topic: "requests".to_string(),
                channel: "busline".to_string(),
                lookup: Vec::new(),
                nsqd: Vec::new(),
                handler_concurrency: 1,
                max_attempts: 5,
                requeue_delay_ms: 0,
                dial_timeout_ms: 1000,
            },
            emitter: EmitterSettings {
                address: None,
                dial_timeout_ms: 1000,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlays whatever was provided on top of `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let listener = self.listener.unwrap_or_default();
        let emitter = self.emitter.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            listener: ListenerSettings {
                topic: listener.topic.unwrap_or(default.listener.topic),
                channel: listener.channel.unwrap_or(default.listener.channel),
                lookup: listener.lookup.unwrap_or(default.listener.lookup),
                nsqd: listener.nsqd.unwrap_or(default.listener.nsqd),
                handler_concurrency: listener
                    .handler_concurrency
                    .unwrap_or(default.listener.handler_concurrency),
                max_attempts: listener.max_attempts.unwrap_or(default.listener.max_attempts),
                requeue_delay_ms: listener
                    .requeue_delay_ms
                    .unwrap_or(default.listener.requeue_delay_ms),
                dial_timeout_ms: listener
                    .dial_timeout_ms
                    .unwrap_or(default.listener.dial_timeout_ms),
            },
            emitter: EmitterSettings {
                address: emitter.address.or(default.emitter.address),
                dial_timeout_ms: emitter
                    .dial_timeout_ms
                    .unwrap_or(default.emitter.dial_timeout_ms),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}
