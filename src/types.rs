// src/types.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::drivers::AcquisitionError;

// Measurement technique requested from the instrument
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum MeasurementType {
    /// Cyclic voltammetry: x is the PWM/voltage index.
    #[serde(rename = "CV")]
    Cv,
    /// Chronoamperometry: x is elapsed time.
    #[serde(rename = "CA")]
    Ca,
}

impl MeasurementType {
    pub fn tag(self) -> &'static str {
        match self {
            MeasurementType::Cv => "CV",
            MeasurementType::Ca => "CA",
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for MeasurementType {
    type Err = AcquisitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CV" => Ok(MeasurementType::Cv),
            "CA" => Ok(MeasurementType::Ca),
            other => Err(AcquisitionError::Config(format!(
                "unknown measurement type '{other}'"
            ))),
        }
    }
}

// CA step duration unit, sent verbatim on the wire
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    #[default]
    #[serde(rename = "sec")]
    Seconds,
    #[serde(rename = "min")]
    Minutes,
}

impl TimeUnit {
    pub fn wire_name(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "sec",
            TimeUnit::Minutes => "min",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Settings for one measurement, as supplied by the configuration store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub measurement_type: MeasurementType,
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub scan_rate: i32,
    pub cycle_count: u32,
    pub ca_voltage: f64,
    pub ca_time_value: u32,
    pub ca_time_unit: TimeUnit,
    /// Scan rate used to pick the filter cutoff for CA runs, which have no scan rate of their own.
    pub ca_filter_scan_rate: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            measurement_type: MeasurementType::Cv,
            min_voltage: -0.5,
            max_voltage: 0.5,
            scan_rate: 50,
            cycle_count: 1,
            ca_voltage: 0.0,
            ca_time_value: 10,
            ca_time_unit: TimeUnit::Seconds,
            ca_filter_scan_rate: 10,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        let bad = |msg: String| Err(AcquisitionError::Config(msg));
        if !self.min_voltage.is_finite() || !self.max_voltage.is_finite() {
            return bad("voltage bounds must be finite".into());
        }
        if self.min_voltage < -1.0 || self.max_voltage > 1.0 || self.min_voltage >= self.max_voltage {
            return bad(format!(
                "voltage range must be within ±1V with min < max (got {}..{})",
                self.min_voltage, self.max_voltage
            ));
        }
        if !(5..=200).contains(&self.scan_rate) {
            return bad(format!(
                "scan rate must be between 5 and 200 mV/s (got {})",
                self.scan_rate
            ));
        }
        if self.cycle_count == 0 {
            return bad("cycle count must be at least 1".into());
        }
        if !self.ca_voltage.is_finite() || self.ca_voltage.abs() > 1.0 {
            return bad(format!("CA voltage must be within ±1V (got {})", self.ca_voltage));
        }
        if !(1..=60).contains(&self.ca_time_value) {
            return bad(format!(
                "time value must be between 1 and 60 (got {})",
                self.ca_time_value
            ));
        }
        Ok(())
    }

    /// Instrument command line for this configuration, including the trailing newline.
    pub fn command(&self) -> String {
        match self.measurement_type {
            MeasurementType::Cv => format!(
                "CV,{},{},{},{}\n",
                self.min_voltage, self.max_voltage, self.scan_rate, self.cycle_count
            ),
            MeasurementType::Ca => format!(
                "CA,{},{},{}\n",
                self.ca_voltage, self.ca_time_value, self.ca_time_unit
            ),
        }
    }

    /// Scan rate handed to the zero-phase filter.
    pub fn filter_scan_rate(&self) -> i32 {
        match self.measurement_type {
            MeasurementType::Cv => self.scan_rate,
            MeasurementType::Ca => self.ca_filter_scan_rate,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawSample {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilteredSample {
    pub x: f64,
    pub y_filtered: f64,
}

// MeasurementSession lifecycle
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum SessionState {
    Idle,
    Connecting,
    Sending,
    Streaming,
    Completing,
    Error,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Sending => "sending",
            SessionState::Streaming => "streaming",
            SessionState::Completing => "completing",
            SessionState::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CvSample {
    #[serde(rename = "pwmCal")]
    pub pwm: f64,
    #[serde(rename = "valCalRaw")]
    pub raw_value: f64,
    #[serde(rename = "valCalFiltered")]
    pub filtered_value: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaSample {
    pub time: f64,
    #[serde(rename = "valCalRaw")]
    pub raw_value: f64,
    #[serde(rename = "valCalFiltered")]
    pub filtered_value: f64,
}

/// Finished, filtered result of one session. Serializes as a bare JSON array.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MeasurementRecord {
    Cv(Vec<CvSample>),
    Ca(Vec<CaSample>),
}

impl MeasurementRecord {
    /// Zips raw samples with their filtered values. Extra entries on either side are dropped.
    pub fn from_samples(kind: MeasurementType, raw: &[RawSample], filtered: &[FilteredSample]) -> Self {
        let pairs = raw.iter().zip(filtered);
        match kind {
            MeasurementType::Cv => MeasurementRecord::Cv(
                pairs
                    .map(|(r, f)| CvSample {
                        pwm: r.x,
                        raw_value: r.y,
                        filtered_value: f.y_filtered,
                    })
                    .collect(),
            ),
            MeasurementType::Ca => MeasurementRecord::Ca(
                pairs
                    .map(|(r, f)| CaSample {
                        time: r.x,
                        raw_value: r.y,
                        filtered_value: f.y_filtered,
                    })
                    .collect(),
            ),
        }
    }

    pub fn measurement_type(&self) -> MeasurementType {
        match self {
            MeasurementRecord::Cv(_) => MeasurementType::Cv,
            MeasurementRecord::Ca(_) => MeasurementType::Ca,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MeasurementRecord::Cv(samples) => samples.len(),
            MeasurementRecord::Ca(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(x, raw, filtered)` triples for plotting.
    pub fn points(&self) -> Vec<(f64, f64, f64)> {
        match self {
            MeasurementRecord::Cv(samples) => samples
                .iter()
                .map(|s| (s.pwm, s.raw_value, s.filtered_value))
                .collect(),
            MeasurementRecord::Ca(samples) => samples
                .iter()
                .map(|s| (s.time, s.raw_value, s.filtered_value))
                .collect(),
        }
    }
}
