//! Human readable `key: value +- error` reports
//!
//! Reports are the hand-off between stages: the peak fit is re-read by the calibration, the
//! calibration by the energy conversion and so on. Only lines of the form
//! `key: number [+- number] [unit]` carry data, anything else is decoration.
use std::fmt::{Display, Write as _};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::measurement::Measurement;
use crate::Result;

const RULE: &str = "------------------------------------------------";

#[derive(Clone, Debug, Default)]
pub struct Report {
    text: String,
}

impl Report {
    pub fn new(title: impl Display) -> Self {
        Self {
            text: format!("{title}:\n"),
        }
    }

    #[must_use]
    pub fn rule(mut self) -> Self {
        self.text.push_str(RULE);
        self.text.push('\n');
        self
    }

    #[must_use]
    pub fn measurement(
        mut self,
        key: &str,
        measurement: Measurement<f64>,
        precision: usize,
        unit: Option<&str>,
    ) -> Self {
        let _ = write!(self.text, "{key}: {measurement:.precision$}");
        if let Some(unit) = unit {
            let _ = write!(self.text, " {unit}");
        }
        self.text.push('\n');
        self
    }

    #[must_use]
    pub fn value(mut self, key: &str, value: impl Display) -> Self {
        let _ = writeln!(self.text, "{key}: {value}");
        self
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &self.text)?;
        Ok(())
    }
}

/// The numeric entries of a report read back from disk
#[derive(Clone, Debug)]
pub struct ParsedReport {
    path: PathBuf,
    entries: Vec<(String, Measurement<f64>)>,
}

impl ParsedReport {
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingFile(path.to_path_buf()).into());
        }
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(path, &text))
    }

    pub fn parse(path: &Path, text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let (key, rest) = line.split_once(':')?;
                let (value, uncertainty) = match rest.split_once("+-") {
                    Some((value, uncertainty)) => {
                        (value.trim(), uncertainty.split_whitespace().next()?)
                    }
                    None => (rest.split_whitespace().next()?, "0"),
                };
                let value = value.parse().ok()?;
                let uncertainty = uncertainty.parse().ok()?;
                Some((key.trim().to_owned(), Measurement { value, uncertainty }))
            })
            .collect();
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Measurement recorded under `key`
    ///
    /// # Errors
    /// Returns [`Error::MissingReportKey`] when no numeric entry has that key
    pub fn get(&self, key: &str) -> Result<Measurement<f64>> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, measurement)| *measurement)
            .ok_or_else(|| {
                Error::MissingReportKey {
                    path: self.path.clone(),
                    key: key.to_owned(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{ParsedReport, Report};
    use crate::measurement::Measurement;

    #[test]
    fn reports_read_back_their_measurements() {
        let report = Report::new("Fitted parameters for Cesio137")
            .rule()
            .measurement(
                "xc (peak center)",
                Measurement::new(210.5, 0.25),
                4,
                Some("channel"),
            )
            .rule()
            .value("Gaussian peak energy", "630 keV");

        let parsed = ParsedReport::parse(Path::new("mem"), report.as_str());
        assert_eq!(
            parsed.get("xc (peak center)").unwrap(),
            Measurement::new(210.5, 0.25)
        );
        assert_eq!(
            parsed.get("Gaussian peak energy").unwrap(),
            Measurement::exact(630.)
        );
        assert!(parsed.get("Fitted parameters for Cesio137").is_err());
    }

    #[test]
    fn layout_follows_key_value_error() {
        let report = Report::new("Fitted parameters for slope")
            .measurement("Slope (keV/channel)", Measurement::new(2.993, 0.01), 4, None);
        assert_eq!(
            report.as_str(),
            "Fitted parameters for slope:\nSlope (keV/channel): 2.9930 +- 0.0100\n"
        );
    }
}
