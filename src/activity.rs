//! Source activity and detector efficiency
//!
//! The activity of the reference source decays as
//! $$
//!     A(t) = A_0 \exp\left(-\frac{\ln 2}{t_{1/2}} t\right).
//! $$
//! The rate the detector should register is that activity scaled by the solid-angle coverage and
//! the branching intensity of the line. The measured rate over the expected rate is the
//! efficiency. The reference activity is taken as exact.
use std::f64::consts::LN_2;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::measurement::Measurement;
use crate::report::{ParsedReport, Report};
use crate::Result;

pub const BECQUEREL_PER_CURIE: f64 = 3.7e10;
const DAYS_PER_YEAR: f64 = 365.25;
const RATE_KEY: &str = "Activity";

/// Counts under a peak normalised to the live time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountRate {
    pub area: Measurement<f64>,
    /// Live time in seconds
    pub live_time: f64,
    /// counts per second
    pub rate: Measurement<f64>,
}

impl CountRate {
    pub fn from_area(area: Measurement<f64>, live_time: f64) -> Result<Self> {
        if live_time <= 0. {
            return Err(
                Error::InvalidInput(format!("live time {live_time} s is not positive")).into(),
            );
        }
        Ok(Self {
            area,
            live_time,
            rate: Measurement::new(area.value / live_time, area.uncertainty / live_time),
        })
    }

    pub fn write_report(&self, path: &Path, name: &str, reference_energy: f64) -> Result<()> {
        Report::new(format!("Calculated area for {name}"))
            .rule()
            .measurement("Area", self.area, 4, None)
            .value("Time", format!("{} s", self.live_time))
            .measurement(RATE_KEY, self.rate, 4, Some("counts/s"))
            .rule()
            .value("Gaussian peak energy", format!("{reference_energy} keV"))
            .write(path)
    }

    /// The measured rate recorded by [`CountRate::write_report`]
    pub fn rate_from_report(path: &Path) -> Result<Measurement<f64>> {
        ParsedReport::read(path)?.get(RATE_KEY)
    }
}

/// A calibrated reference source
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceSource {
    /// Activity at the reference date, in Curie
    pub initial_activity: f64,
    /// Half-life in years
    pub half_life: f64,
    pub reference_date: NaiveDate,
    pub measurement_date: NaiveDate,
    /// Fraction of emissions headed towards the detector
    pub geometry: f64,
    /// Branching intensity of the observed line
    pub intensity: f64,
}

impl Default for ReferenceSource {
    /// 0.25 µCi of Cs-137 calibrated in February 2018, measured October 2024
    fn default() -> Self {
        Self {
            initial_activity: 0.25e-6,
            half_life: 30.08,
            reference_date: NaiveDate::from_ymd_opt(2018, 2, 15).unwrap_or_default(),
            measurement_date: NaiveDate::from_ymd_opt(2024, 10, 15).unwrap_or_default(),
            geometry: 0.5,
            intensity: 0.094,
        }
    }
}

/// `A₀ exp(-ln2 / t½ · t)`, in the units of `initial`
///
/// # Errors
/// The half-life must be strictly positive.
pub fn decayed_activity(initial: f64, half_life: f64, elapsed: f64) -> Result<f64> {
    if half_life <= 0. || !half_life.is_finite() {
        return Err(Error::InvalidInput(format!("half-life {half_life} is not positive")).into());
    }
    Ok(initial * (-LN_2 / half_life * elapsed).exp())
}

/// Elapsed time between two dates in years
#[allow(clippy::cast_precision_loss)]
pub fn years_between(start: NaiveDate, end: NaiveDate) -> f64 {
    (end - start).num_days() as f64 / DAYS_PER_YEAR
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Efficiency {
    pub elapsed_years: f64,
    /// Decayed activity in Bq
    pub current_activity: f64,
    /// Rate the detector would see at unit efficiency, counts/s
    pub expected_rate: f64,
    pub measured_rate: Measurement<f64>,
    pub efficiency: Measurement<f64>,
}

impl ReferenceSource {
    /// Activity in Bq on the measurement date
    pub fn current_activity(&self) -> Result<f64> {
        let elapsed = years_between(self.reference_date, self.measurement_date);
        Ok(decayed_activity(self.initial_activity, self.half_life, elapsed)? * BECQUEREL_PER_CURIE)
    }

    pub fn efficiency(&self, measured_rate: Measurement<f64>) -> Result<Efficiency> {
        let current_activity = self.current_activity()?;
        let expected_rate = current_activity * self.geometry * self.intensity;
        if expected_rate <= 0. {
            return Err(Error::InvalidConfig(format!(
                "expected rate {expected_rate} is not positive"
            ))
            .into());
        }
        Ok(Efficiency {
            elapsed_years: years_between(self.reference_date, self.measurement_date),
            current_activity,
            expected_rate,
            measured_rate,
            efficiency: Measurement::new(
                measured_rate.value / expected_rate,
                measured_rate.uncertainty / expected_rate,
            ),
        })
    }
}

impl Efficiency {
    pub fn write_report(&self, path: &Path, name: &str) -> Result<()> {
        Report::new(format!("Detector efficiency from {name}"))
            .rule()
            .value("Elapsed time (years)", format!("{:.4}", self.elapsed_years))
            .value("Current activity (Bq)", format!("{:.4e}", self.current_activity))
            .value("Expected rate (counts/s)", format!("{:.4e}", self.expected_rate))
            .measurement("Measured rate (counts/s)", self.measured_rate, 4, None)
            .rule()
            .measurement("Detector efficiency", self.efficiency, 4, None)
            .write(path)
    }
}
