//! Channel key catalogue for Memmert AtmoWEB controllers.
//!
//! Keys are the literal parameter names the controller understands. Setpoint
//! keys accept writes; read keys report the measured value.

/// Temperature setpoint (°C).
pub const TEMP_SET: &str = "TempSet";
/// Relative humidity setpoint (% RH).
pub const HUM_SET: &str = "HumSet";
/// CO₂ setpoint (%).
pub const CO2_SET: &str = "CO2Set";
/// O₂ setpoint (%).
pub const O2_SET: &str = "O2Set";
/// Fan speed setpoint (%).
pub const FAN_SET: &str = "FanSet";

/// Measured chamber temperature (°C).
pub const TEMP_READ: &str = "Temp1Read";
/// Measured relative humidity (% RH).
pub const HUM_READ: &str = "HumRead";
/// Measured CO₂ (%).
pub const CO2_READ: &str = "CO2Read";
/// Measured O₂ (%).
pub const O2_READ: &str = "O2Read";
/// Measured fan speed (%).
pub const FAN_READ: &str = "FanRead";

/// Current operating mode.
pub const MODE: &str = "CurOp";

/// Setpoint channels sampled by default.
pub const DEFAULT_SETPOINTS: [&str; 5] = [TEMP_SET, HUM_SET, CO2_SET, O2_SET, FAN_SET];

/// Read channels sampled by default.
pub const DEFAULT_READINGS: [&str; 5] = [TEMP_READ, HUM_READ, CO2_READ, O2_READ, FAN_READ];

/// Controller responses that mean "not supported" rather than a value.
pub const UNAVAILABLE_MARKERS: [&str; 3] = ["N/A", "N/D", "UNKNOWN"];

/// Whether a raw controller value marks the channel as unavailable.
pub fn is_unavailable_marker(raw: &str) -> bool {
    let upper = raw.trim().to_ascii_uppercase();
    UNAVAILABLE_MARKERS.contains(&upper.as_str())
}
