//! Mock device for testing.
//!
//! [`MockDevice`] keeps channel values, declared ranges and the operating mode
//! in memory and records every write, so schedule and orchestration logic can
//! be tested without a controller on the network.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use atmolog_types::{ChannelValues, SetOutcome, ValueRange, channels};

use crate::error::{Error, Result};
use crate::traits::DeviceInterface;

/// In-memory device.
///
/// Unknown channels read as `None` and reject writes as
/// [`SetOutcome::Unavailable`], like a controller without that option fitted.
///
/// # Example
///
/// ```
/// use atmolog_core::{DeviceInterface, MockDevice};
///
/// #[tokio::main]
/// async fn main() {
///     let device = MockDevice::new("mock-incubator")
///         .with_channel("TempSet", 37.0)
///         .with_range("TempSet", 0.0, 70.0);
///
///     let outcome = device.set("TempSet", 36.5).await.unwrap();
///     assert!(outcome.is_applied());
///     assert_eq!(device.writes().await, vec![("TempSet".to_string(), 36.5)]);
/// }
/// ```
pub struct MockDevice {
    identity: String,
    values: RwLock<BTreeMap<String, f64>>,
    ranges: RwLock<BTreeMap<String, ValueRange>>,
    unavailable: RwLock<BTreeSet<String>>,
    mode: RwLock<String>,
    writes: RwLock<Vec<(String, f64)>>,
    request_count: AtomicU32,
    offline: AtomicBool,
    /// Requests to fail before succeeding again (0 = governed by `offline`).
    remaining_failures: AtomicU32,
    /// Requests to answer before going offline (`u32::MAX` = never).
    offline_after: AtomicU32,
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("identity", &self.identity)
            .field("offline", &self.offline.load(Ordering::Relaxed))
            .field("requests", &self.request_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockDevice {
    /// Create a device with no channels, in `Manual` mode.
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            values: RwLock::new(BTreeMap::new()),
            ranges: RwLock::new(BTreeMap::new()),
            unavailable: RwLock::new(BTreeSet::new()),
            mode: RwLock::new("Manual".to_string()),
            writes: RwLock::new(Vec::new()),
            request_count: AtomicU32::new(0),
            offline: AtomicBool::new(false),
            remaining_failures: AtomicU32::new(0),
            offline_after: AtomicU32::new(u32::MAX),
        }
    }

    /// A device populated with the default channel catalogue and typical
    /// incubator ranges.
    pub fn incubator(identity: &str) -> Self {
        Self::new(identity)
            .with_channel(channels::TEMP_SET, 37.0)
            .with_channel(channels::HUM_SET, 60.0)
            .with_channel(channels::CO2_SET, 5.0)
            .with_channel(channels::O2_SET, 20.0)
            .with_channel(channels::FAN_SET, 50.0)
            .with_channel(channels::TEMP_READ, 36.9)
            .with_channel(channels::HUM_READ, 58.2)
            .with_channel(channels::CO2_READ, 5.1)
            .with_channel(channels::O2_READ, 19.8)
            .with_channel(channels::FAN_READ, 50.0)
            .with_range(channels::TEMP_SET, 0.0, 70.0)
            .with_range(channels::HUM_SET, 10.0, 95.0)
            .with_range(channels::CO2_SET, 0.0, 20.0)
            .with_range(channels::O2_SET, 1.0, 21.0)
            .with_range(channels::FAN_SET, 0.0, 100.0)
    }

    /// Set a channel's value (builder form).
    #[must_use]
    pub fn with_channel(mut self, name: &str, value: f64) -> Self {
        self.values.get_mut().insert(name.to_string(), value);
        self
    }

    /// Declare a channel's valid range (builder form).
    #[must_use]
    pub fn with_range(mut self, name: &str, min: f64, max: f64) -> Self {
        self.ranges
            .get_mut()
            .insert(name.to_string(), ValueRange::new(min, max));
        self
    }

    /// Mark a channel as present but rejecting writes (builder form).
    #[must_use]
    pub fn with_unavailable(mut self, name: &str) -> Self {
        self.unavailable.get_mut().insert(name.to_string());
        self
    }

    /// Set the operating mode.
    pub async fn set_mode(&self, mode: &str) {
        *self.mode.write().await = mode.to_string();
    }

    /// Current value of a channel.
    pub async fn value(&self, name: &str) -> Option<f64> {
        self.values.read().await.get(name).copied()
    }

    /// Every write the device applied, in order.
    pub async fn writes(&self) -> Vec<(String, f64)> {
        self.writes.read().await.clone()
    }

    /// Take the device off the network (every request fails) or bring it back.
    pub fn set_offline(&self, offline: bool) {
        self.offline_after.store(u32::MAX, Ordering::Relaxed);
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Fail the next `count` requests, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Answer the next `count` requests, then go offline.
    pub fn set_offline_after(&self, count: u32) {
        self.offline_after.store(count, Ordering::Relaxed);
    }

    /// Number of requests received, including failed ones.
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn check_reachable(&self) -> Result<()> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        match self.offline_after.load(Ordering::Relaxed) {
            u32::MAX => {}
            0 => self.offline.store(true, Ordering::Relaxed),
            n => self.offline_after.store(n - 1, Ordering::Relaxed),
        }
        if self.offline.load(Ordering::Relaxed) {
            return Err(Error::unreachable(&self.identity, "mock device offline"));
        }
        let remaining = self.remaining_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::Relaxed);
            return Err(Error::unreachable(&self.identity, "mock transient failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceInterface for MockDevice {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn get(&self, names: &[String]) -> Result<ChannelValues> {
        let values = self.values.read().await;
        let mut result = ChannelValues::new();
        let mut unreachable = None;
        let mut answered = false;
        for name in names {
            match self.check_reachable() {
                Ok(()) => {
                    answered = true;
                    result.insert(name.clone(), values.get(name).copied());
                }
                Err(e) => {
                    unreachable = Some(e);
                    result.insert(name.clone(), None);
                }
            }
        }
        match unreachable {
            Some(e) if !answered => Err(e),
            _ => Ok(result),
        }
    }

    async fn set(&self, name: &str, value: f64) -> Result<SetOutcome> {
        self.check_reachable()?;

        let known = self.values.read().await.contains_key(name);
        if !known || self.unavailable.read().await.contains(name) {
            return Ok(SetOutcome::Unavailable { requested: value });
        }
        if let Some(range) = self.ranges.read().await.get(name).copied()
            && !range.contains(value)
        {
            return Ok(SetOutcome::OutOfRange {
                requested: value,
                range,
            });
        }

        self.values.write().await.insert(name.to_string(), value);
        self.writes.write().await.push((name.to_string(), value));
        Ok(SetOutcome::Applied {
            requested: value,
            actual: Some(value),
        })
    }

    async fn valid_range(&self, name: &str) -> Result<Option<ValueRange>> {
        self.check_reachable()?;
        Ok(self.ranges.read().await.get(name).copied())
    }

    async fn mode(&self) -> Result<String> {
        self.check_reachable()?;
        Ok(self.mode.read().await.clone())
    }
}
