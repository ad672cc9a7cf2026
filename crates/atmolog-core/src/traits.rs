//! Trait abstraction for the controlled device.
//!
//! [`DeviceInterface`] is the seam between the control loop and the
//! controller's key/value surface. [`AtmoWebClient`](crate::AtmoWebClient)
//! implements it over HTTP; [`MockDevice`](crate::MockDevice) implements it in
//! memory for tests.

use async_trait::async_trait;

use atmolog_types::{ChannelValues, SetOutcome, ValueRange};

use crate::error::Result;

/// Key/value surface over named channels, each independently possibly
/// unavailable.
///
/// # Error contract
///
/// - `Err` means the device as a whole could not be reached. Callers treat it
///   as transient and try again next cycle. [`get`](Self::get) returns `Err`
///   only when not a single requested channel answered.
/// - A single channel that is unsupported, returned garbage or timed out is
///   not an error: [`get`](Self::get) maps it to `None` and
///   [`set`](Self::set) reports [`SetOutcome::Unavailable`].
///
/// # Example
///
/// ```
/// use atmolog_core::{DeviceInterface, Result};
///
/// async fn temperature<D: DeviceInterface>(device: &D) -> Result<Option<f64>> {
///     let values = device.get(&["Temp1Read".to_string()]).await?;
///     Ok(values.get("Temp1Read").copied().flatten())
/// }
/// ```
#[async_trait]
pub trait DeviceInterface: Send + Sync {
    /// Stable identifier recorded in history metadata (address, serial, ...).
    fn identity(&self) -> &str;

    /// Read the named channels.
    ///
    /// Every requested name is present in the result.
    async fn get(&self, names: &[String]) -> Result<ChannelValues>;

    /// Write one setpoint channel.
    async fn set(&self, name: &str, value: f64) -> Result<SetOutcome>;

    /// Declared valid range of a setpoint channel, if the device reports one.
    async fn valid_range(&self, name: &str) -> Result<Option<ValueRange>>;

    /// Current operating mode, e.g. `Manual`.
    async fn mode(&self) -> Result<String>;
}
