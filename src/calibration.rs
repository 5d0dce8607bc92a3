use std::path::Path;

use tracing::info;

use crate::error::Error;
use crate::linear::fit_line;
use crate::measurement::Measurement;
use crate::report::{ParsedReport, Report};
use crate::Result;

const SLOPE_KEY: &str = "Slope (keV/channel)";

/// Linear channel to energy conversion through the origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnergyCalibration {
    /// keV per channel
    slope: Measurement<f64>,
}

impl EnergyCalibration {
    /// Calibrate from the fitted centre of a line with known energy (keV)
    ///
    /// The line is fitted through the origin and `(centre, energy)`. Two points leave no degrees
    /// of freedom, so the slope error is propagated from the error on the centre.
    ///
    /// # Errors
    /// The centre and the energy must both be finite and non-zero.
    pub fn from_peak(centre: Measurement<f64>, energy: f64) -> Result<Self> {
        if centre.value == 0. || !centre.value.is_finite() || energy == 0. || !energy.is_finite() {
            return Err(Error::InvalidInput(format!(
                "cannot calibrate from centre {} at {energy} keV",
                centre.value
            ))
            .into());
        }
        let fit = fit_line(&[0., centre.value], &[0., energy], None)?;
        let slope = fit.slope.value;
        let slope = Measurement::new(slope, (slope * centre.uncertainty / centre.value).abs());
        info!(%slope, "energy calibration");
        Ok(Self { slope })
    }

    pub const fn from_slope(slope: f64) -> Self {
        Self {
            slope: Measurement::exact(slope),
        }
    }

    pub const fn slope(&self) -> Measurement<f64> {
        self.slope
    }

    /// Energy in keV of a (possibly fractional) channel
    pub fn energy(&self, channel: f64) -> f64 {
        self.slope.value * channel
    }

    pub fn write_report(&self, path: &Path) -> Result<()> {
        Report::new("Fitted parameters for slope")
            .rule()
            .measurement(SLOPE_KEY, self.slope, 6, None)
            .rule()
            .write(path)
    }

    pub fn from_report(path: &Path) -> Result<Self> {
        let slope = ParsedReport::read(path)?.get(SLOPE_KEY)?;
        Ok(Self { slope })
    }
}

#[cfg(test)]
mod tests {
    use super::EnergyCalibration;
    use crate::measurement::Measurement;

    #[test]
    fn two_point_calibration_through_the_origin() {
        let calibration = EnergyCalibration::from_peak(Measurement::exact(210.5), 630.).unwrap();

        approx::assert_relative_eq!(calibration.slope().value, 630. / 210.5, max_relative = 1e-10);
        approx::assert_abs_diff_eq!(calibration.slope().value, 2.9930, epsilon = 5e-5);
        approx::assert_abs_diff_eq!(calibration.energy(100.), 299.30, epsilon = 5e-3);
    }

    #[test]
    fn origin_maps_to_zero_and_centre_to_reference() {
        let centre = Measurement::new(210.5, 0.3);
        let calibration = EnergyCalibration::from_peak(centre, 630.).unwrap();

        assert_eq!(calibration.energy(0.), 0.);
        let at_centre = calibration.energy(centre.value);
        let energy_error = calibration.slope().uncertainty * centre.value;
        assert!((at_centre - 630.).abs() <= energy_error);
        approx::assert_relative_eq!(energy_error, 630. * 0.3 / 210.5, max_relative = 1e-8);
    }

    #[test]
    fn zero_centre_is_rejected() {
        assert!(EnergyCalibration::from_peak(Measurement::exact(0.), 630.).is_err());
    }

    #[test]
    fn slope_reports_round_trip() {
        let dir = tempdir::TempDir::new("calibration").unwrap();
        let path = dir.path().join("Slope_fitted_parameters.txt");
        let calibration = EnergyCalibration::from_peak(Measurement::new(210.5, 0.3), 630.).unwrap();
        calibration.write_report(&path).unwrap();

        let read = EnergyCalibration::from_report(&path).unwrap();
        approx::assert_abs_diff_eq!(read.slope().value, calibration.slope().value, epsilon = 1e-6);
    }
}
