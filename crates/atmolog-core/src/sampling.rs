//! Turning a device poll into a [`Reading`].

use time::OffsetDateTime;
use tracing::{debug, warn};

use atmolog_types::{Reading, UNKNOWN_MODE, channels};

use crate::traits::DeviceInterface;

/// Which channels a sampling cycle reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleChannels {
    /// Measured-value channels.
    pub readings: Vec<String>,
    /// Setpoint channels.
    pub setpoints: Vec<String>,
}

impl Default for SampleChannels {
    fn default() -> Self {
        Self {
            readings: channels::DEFAULT_READINGS.map(String::from).to_vec(),
            setpoints: channels::DEFAULT_SETPOINTS.map(String::from).to_vec(),
        }
    }
}

/// Poll the device once and build a [`Reading`] stamped `timestamp`.
///
/// This never fails. Channels the device does not support, or that did not
/// answer, come back as `None`; an unreadable mode becomes `Unknown`. If no
/// measured channel answered at all the reading carries the error message
/// instead, so the gap is visible in history.
pub async fn sample_reading<D>(
    device: &D,
    channels: &SampleChannels,
    timestamp: OffsetDateTime,
) -> Reading
where
    D: DeviceInterface + ?Sized,
{
    let mode = match device.mode().await {
        Ok(mode) => mode,
        Err(e) => {
            warn!("Could not read operating mode: {}", e);
            UNKNOWN_MODE.to_string()
        }
    };

    let mut reading = Reading::new(timestamp).with_mode(mode);

    match device.get(&channels.readings).await {
        Ok(values) => reading.readings = values,
        Err(e) => {
            warn!("Device {} unreachable: {}", device.identity(), e);
            reading.error = Some(e.to_string());
            return reading;
        }
    }

    match device.get(&channels.setpoints).await {
        Ok(values) => reading.setpoints = values,
        Err(e) => {
            warn!("Reading setpoints failed: {}", e);
            reading.setpoints = channels.setpoints.iter().map(|c| (c.clone(), None)).collect();
            reading.error = Some(e.to_string());
        }
    }

    debug!(
        "Sampled {} readings, {} setpoints (mode {})",
        reading.readings.values().filter(|v| v.is_some()).count(),
        reading.setpoints.values().filter(|v| v.is_some()).count(),
        reading.mode
    );
    reading
}
