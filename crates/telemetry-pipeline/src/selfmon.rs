//! Alerts pushed by the self-monitor
//!
//! The self-monitor posts Alertmanager-shaped alerts. Each alert name is
//! `<Signal><Rule>` (e.g. `TraceGatewayThrottling`) and an optional
//! `pipeline_name` label scopes it to one pipeline; without the label the
//! alert applies to every pipeline of the signal. Alerts expire after the
//! evaluation window unless the self-monitor sends them again. A resolved
//! alert (`status` resolved, or `endsAt` in the past) clears at once.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::conditions::reasons;
use crate::signal::Signal;

/// Label carrying the rule name
pub const ALERT_NAME_LABEL: &str = "alertname";
/// Label scoping an alert to one pipeline
pub const PIPELINE_NAME_LABEL: &str = "pipeline_name";

const WAKEUP_CAPACITY: usize = 64;

/// Rules in priority order with the flow reason they map to
const RULES: [(&[&str], &str); 7] = [
    (&["GatewayAllDataDropped"], reasons::SELF_MON_GATEWAY_ALL_DATA_DROPPED),
    (&["GatewaySomeDataDropped"], reasons::SELF_MON_GATEWAY_SOME_DATA_DROPPED),
    (&["GatewayThrottling"], reasons::SELF_MON_GATEWAY_THROTTLING),
    (
        &["AgentAllDataDropped", "FluentBitAllDataDropped"],
        reasons::SELF_MON_AGENT_ALL_DATA_DROPPED,
    ),
    (
        &["AgentSomeDataDropped", "FluentBitSomeDataDropped"],
        reasons::SELF_MON_AGENT_SOME_DATA_DROPPED,
    ),
    (
        &["FluentBitBufferInUse", "AgentBufferFillingUp", "GatewayBufferFillingUp"],
        reasons::SELF_MON_BUFFER_FILLING_UP,
    ),
    (&["FluentBitNoLogsDelivered"], reasons::SELF_MON_NO_LOGS_DELIVERED),
];

/// Alert state, either a bare word (`firing`, `resolved`) or Alertmanager's
/// `{"state": ...}` object
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AlertStatus {
    Word(String),
    Detailed { state: String },
}

impl AlertStatus {
    fn state(&self) -> &str {
        match self {
            Self::Word(state) | Self::Detailed { state } => state,
        }
    }
}

/// One alert as posted by the self-monitor
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Alert {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, rename = "endsAt")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<AlertStatus>,
}

impl Alert {
    /// Alert with the given name, optionally scoped to a pipeline
    pub fn new(name: &str, pipeline: Option<&str>) -> Self {
        let mut labels = BTreeMap::from([(ALERT_NAME_LABEL.to_string(), name.to_string())]);
        if let Some(pipeline) = pipeline {
            labels.insert(PIPELINE_NAME_LABEL.to_string(), pipeline.to_string());
        }
        Self {
            labels,
            ..Default::default()
        }
    }

    /// The same alert, marked as ended at `at`
    pub fn ended(mut self, at: DateTime<Utc>) -> Self {
        self.ends_at = Some(at);
        self
    }

    /// Whether the alert stopped firing by `now`
    pub fn is_resolved(&self, now: DateTime<Utc>) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.state().eq_ignore_ascii_case("resolved"))
            || self.ends_at.is_some_and(|ends_at| ends_at <= now)
    }

    fn name(&self) -> Option<&str> {
        self.labels.get(ALERT_NAME_LABEL).map(String::as_str)
    }

    fn pipeline(&self) -> Option<&str> {
        self.labels.get(PIPELINE_NAME_LABEL).map(String::as_str)
    }
}

/// Priority rank and flow reason of an unprefixed rule name
pub fn rule_reason(rule: &str) -> Option<(usize, &'static str)> {
    RULES
        .iter()
        .enumerate()
        .find(|(_, (names, _))| names.contains(&rule))
        .map(|(rank, (_, reason))| (rank, *reason))
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct AlertKey {
    signal: Signal,
    rule: String,
    pipeline: Option<String>,
}

/// Firing alerts shared between the receiver and the reconcilers
#[derive(Debug)]
pub struct AlertStore {
    firing: DashMap<AlertKey, DateTime<Utc>>,
    window: chrono::Duration,
    wakeups: broadcast::Sender<Signal>,
}

impl AlertStore {
    /// Store whose alerts expire after `window`
    pub fn new(window: Duration) -> Self {
        let (wakeups, _) = broadcast::channel(WAKEUP_CAPACITY);
        Self {
            firing: DashMap::new(),
            window: chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::weeks(52)),
            wakeups,
        }
    }

    /// Receiver of the signals whose alerts changed
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.wakeups.subscribe()
    }

    /// Record a batch of alerts and wake the controllers of the signals involved.
    ///
    /// Returns the signals the batch touched. Alerts without a known signal
    /// prefix are ignored; resolved ones are removed.
    pub fn record(&self, alerts: &[Alert], now: DateTime<Utc>) -> BTreeSet<Signal> {
        let mut touched = BTreeSet::new();
        for alert in alerts {
            let Some((signal, rule)) = alert.name().and_then(Signal::from_alert_prefix) else {
                continue;
            };
            touched.insert(signal);
            if rule_reason(rule).is_none() {
                debug!(alert = ?alert.name(), "alert does not map to a flow reason");
                continue;
            }
            let key = AlertKey {
                signal,
                rule: rule.to_string(),
                pipeline: alert.pipeline().map(str::to_string),
            };
            if alert.is_resolved(now) {
                self.firing.remove(&key);
            } else {
                self.firing.insert(key, now);
            }
        }
        for signal in &touched {
            // No subscriber is fine; the next resync picks the alerts up.
            let _ = self.wakeups.send(*signal);
        }
        touched
    }

    /// Highest-priority flow reason firing for `pipeline`
    pub fn flow_alert(&self, signal: Signal, pipeline: &str, now: DateTime<Utc>) -> Option<&'static str> {
        self.firing
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.signal == signal
                    && key.pipeline.as_deref().map_or(true, |p| p == pipeline)
                    && now - *entry.value() <= self.window
            })
            .filter_map(|entry| rule_reason(&entry.key().rule))
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, reason)| reason)
    }

    /// Drop alerts not re-sent within the window
    pub fn prune(&self, now: DateTime<Utc>) {
        self.firing.retain(|_, received| now - *received <= self.window);
    }

    /// Number of alerts currently stored
    pub fn len(&self) -> usize {
        self.firing.len()
    }

    /// Whether no alert is stored
    pub fn is_empty(&self) -> bool {
        self.firing.is_empty()
    }
}
