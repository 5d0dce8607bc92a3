use std::path::Path;

use tracing::debug;

use crate::calibration::EnergyCalibration;
use crate::error::Error;
use crate::{table, Result};

/// A single histogram bin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bin {
    pub channel: u32,
    pub counts: f64,
    pub error: f64,
}

/// A channel-indexed histogram
///
/// Channels are unique and strictly increasing, counts and errors are finite and non-negative.
#[derive(Clone, Debug)]
pub struct Spectrum {
    name: String,
    bins: Vec<Bin>,
}

impl Spectrum {
    /// # Errors
    /// Returns [`Error::InconsistentSpectrum`] if the bins break the ordering or sign invariants
    pub fn new(name: impl Into<String>, bins: Vec<Bin>) -> Result<Self> {
        let name = name.into();
        for pair in bins.windows(2) {
            if pair[1].channel <= pair[0].channel {
                return Err(Error::InconsistentSpectrum {
                    name,
                    reason: format!(
                        "channel {} follows channel {}",
                        pair[1].channel, pair[0].channel
                    ),
                }
                .into());
            }
        }
        if let Some(bin) = bins.iter().find(|bin| {
            !(bin.counts.is_finite() && bin.error.is_finite())
                || bin.counts < 0.
                || bin.error < 0.
        }) {
            return Err(Error::InconsistentSpectrum {
                name,
                reason: format!(
                    "channel {} has counts {} +- {}",
                    bin.channel, bin.counts, bin.error
                ),
            }
            .into());
        }
        Ok(Self { name, bins })
    }

    /// Build a spectrum from raw counts, attaching the Poisson error `sqrt(counts)`
    pub fn with_poisson_errors(
        name: impl Into<String>,
        counts: impl IntoIterator<Item = (u32, f64)>,
    ) -> Result<Self> {
        let bins = counts
            .into_iter()
            .map(|(channel, counts)| Bin {
                channel,
                counts,
                error: counts.sqrt(),
            })
            .collect();
        Self::new(name, bins)
    }

    /// Read a raw `(channel, counts)` histogram
    pub fn from_counts_file(name: &str, path: &Path, header_lines: usize) -> Result<Self> {
        let rows = table::read(path, header_lines, 2)?;
        let counts = rows
            .iter()
            .enumerate()
            .map(|(ii, row)| Ok((channel_number(path, header_lines + ii + 1, row[0])?, row[1])))
            .collect::<Result<Vec<_>>>()?;
        debug!(name, bins = counts.len(), "read raw spectrum");
        Self::with_poisson_errors(name, counts)
    }

    /// Read a `(channel, counts, error)` histogram as written by [`Spectrum::write`]
    pub fn from_annotated_file(name: &str, path: &Path) -> Result<Self> {
        let rows = table::read(path, 1, 3)?;
        let bins = rows
            .iter()
            .enumerate()
            .map(|(ii, row)| {
                Ok(Bin {
                    channel: channel_number(path, ii + 2, row[0])?,
                    counts: row[1],
                    error: row[2],
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(name, bins)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    /// Net counts after removing `background`
    ///
    /// Net counts are clamped at zero, errors add in quadrature.
    ///
    /// # Errors
    /// The background must cover exactly the same channels as `self`.
    pub fn subtract_background(&self, background: &Self) -> Result<Self> {
        if self.bins.len() != background.bins.len()
            || self
                .bins
                .iter()
                .zip(&background.bins)
                .any(|(a, b)| a.channel != b.channel)
        {
            return Err(Error::InconsistentSpectrum {
                name: self.name.clone(),
                reason: format!("channels do not match background {}", background.name),
            }
            .into());
        }

        let bins = self
            .bins
            .iter()
            .zip(&background.bins)
            .map(|(signal, background)| Bin {
                channel: signal.channel,
                counts: (signal.counts - background.counts).max(0.),
                error: signal.error.hypot(background.error),
            })
            .collect();

        Ok(Self {
            name: self.name.clone(),
            bins,
        })
    }

    /// Bins whose channel lies in the closed interval `[min, max]`
    pub fn window(&self, min: u32, max: u32) -> impl Iterator<Item = &Bin> {
        self.bins
            .iter()
            .filter(move |bin| (min..=max).contains(&bin.channel))
    }

    /// Attach calibrated energies to every bin
    pub fn to_energy(&self, calibration: &EnergyCalibration) -> EnergySpectrum {
        EnergySpectrum {
            name: self.name.clone(),
            rows: self
                .bins
                .iter()
                .map(|&bin| EnergyBin {
                    bin,
                    energy: calibration.energy(f64::from(bin.channel)),
                })
                .collect(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        table::write(
            path,
            &["Channel Number", "Counts", "Error"],
            self.bins.iter().map(|bin| {
                vec![
                    format!("{:.6}", f64::from(bin.channel)),
                    format!("{:.6}", bin.counts),
                    format!("{:.6}", bin.error),
                ]
            }),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnergyBin {
    pub bin: Bin,
    /// Calibrated energy in keV
    pub energy: f64,
}

/// A spectrum with a calibrated energy column
#[derive(Clone, Debug)]
pub struct EnergySpectrum {
    pub name: String,
    pub rows: Vec<EnergyBin>,
}

impl EnergySpectrum {
    /// Read a `(channel, counts, error, energy)` table as written by [`EnergySpectrum::write`]
    pub fn from_file(name: &str, path: &Path) -> Result<Self> {
        let rows = table::read(path, 1, 4)?;
        let rows = rows
            .iter()
            .enumerate()
            .map(|(ii, row)| {
                Ok(EnergyBin {
                    bin: Bin {
                        channel: channel_number(path, ii + 2, row[0])?,
                        counts: row[1],
                        error: row[2],
                    },
                    energy: row[3],
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.to_owned(),
            rows,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        table::write(
            path,
            &["Channel", "Counts", "Error", "Energy (keV)"],
            self.rows.iter().map(|row| {
                vec![
                    row.bin.channel.to_string(),
                    format!("{:.0}", row.bin.counts),
                    format!("{:.4}", row.bin.error),
                    format!("{:.3}", row.energy),
                ]
            }),
        )
    }

    pub fn total_counts(&self) -> f64 {
        self.rows.iter().map(|row| row.bin.counts).sum()
    }

    /// Fraction of all counts falling in the closed energy interval `[min, max]` keV
    ///
    /// An empty spectrum has zero intensity everywhere.
    pub fn intensity(&self, min: f64, max: f64) -> f64 {
        let total = self.total_counts();
        if total == 0. {
            return 0.;
        }
        let in_range: f64 = self
            .rows
            .iter()
            .filter(|row| (min..=max).contains(&row.energy))
            .map(|row| row.bin.counts)
            .sum();
        in_range / total
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn channel_number(path: &Path, line: usize, value: f64) -> Result<u32> {
    if value < 0. || value.fract() != 0. || value > f64::from(u32::MAX) {
        return Err(Error::MalformedRow {
            path: path.to_path_buf(),
            line,
            reason: format!("{value} is not a channel number"),
        }
        .into());
    }
    Ok(value as u32)
}
