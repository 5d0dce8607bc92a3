//! Endpoint energy from straight line fits to the linearised spectrum
//!
//! The fit window is not known in advance. Every window drawn from a grid of lower and upper
//! edges is fitted and the one whose x-intercept lands closest to the expected endpoint is kept.
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use itertools::iproduct;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Error;
use crate::kurie::KurieRow;
use crate::linear::{fit_line, LinearFit};
use crate::math::inclusive_grid;
use crate::measurement::Measurement;
use crate::table;
use crate::Result;

const MIN_WINDOW_POINTS: usize = 3;

/// The linearised quantity plotted against energy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    /// `(1/W) √(N / G)`
    Kurie,
    /// `√N(E)`, ignoring the Coulomb correction
    SqrtCounts,
}

impl Quantity {
    pub const ALL: [Self; 2] = [Self::Kurie, Self::SqrtCounts];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Kurie => "Kurie",
            Self::SqrtCounts => "N(E)",
        }
    }

    pub fn of(self, row: &KurieRow) -> f64 {
        match self {
            Self::Kurie => row.value,
            Self::SqrtCounts => row.counts.sqrt(),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|quantity| quantity.label() == s.trim())
            .ok_or_else(|| Error::InvalidInput(format!("unknown fit type {s:?}")))
    }
}

/// Candidate window edges in MeV
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowGrid {
    pub min_range: (f64, f64),
    pub max_range: (f64, f64),
    pub step: f64,
}

impl WindowGrid {
    pub fn validate(&self) -> Result<()> {
        if self.step <= 0. || !self.step.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "window step {} is not positive",
                self.step
            ))
            .into());
        }
        for (lo, hi) in [self.min_range, self.max_range] {
            if lo > hi {
                return Err(Error::InvalidConfig(format!(
                    "window range ({lo}, {hi}) is reversed"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Every `(min, max)` pair with `min < max`, minima ascending then maxima ascending
    pub fn windows(&self) -> impl Iterator<Item = (f64, f64)> {
        let minima = inclusive_grid(self.min_range.0, self.min_range.1, self.step);
        let maxima = inclusive_grid(self.max_range.0, self.max_range.1, self.step);
        iproduct!(minima, maxima).filter(|(min, max)| min < max)
    }
}

/// A straight line fitted over one energy window
#[derive(Clone, Debug)]
pub struct WindowFit {
    pub quantity: Quantity,
    pub min: f64,
    pub max: f64,
    pub fit: LinearFit,
}

impl WindowFit {
    /// The x-intercept of the line
    pub fn q_value(&self) -> Measurement<f64> {
        self.fit.x_intercept()
    }

    /// Ordering by distance of Q from `target`, then by slope error
    fn rank(&self, other: &Self, target: f64) -> Ordering {
        let distance = |fit: &Self| (fit.q_value().value - target).abs();
        distance(self)
            .total_cmp(&distance(other))
            .then_with(|| self.fit.slope.uncertainty.total_cmp(&other.fit.slope.uncertainty))
    }
}

/// Unweighted fit of `quantity` against energy over the rows with `min <= E <= max`
///
/// Rows where the quantity is not finite are skipped.
///
/// # Errors
/// [`Error::InsufficientData`] when fewer than three usable rows fall in the window.
pub fn fit_window(rows: &[KurieRow], quantity: Quantity, min: f64, max: f64) -> Result<WindowFit> {
    let (x, y): (Vec<f64>, Vec<f64>) = rows
        .iter()
        .filter(|row| (min..=max).contains(&row.energy))
        .map(|row| (row.energy, quantity.of(row)))
        .filter(|(_, y)| y.is_finite())
        .unzip();
    if x.len() < MIN_WINDOW_POINTS {
        return Err(Error::InsufficientData {
            needed: MIN_WINDOW_POINTS,
            found: x.len(),
        }
        .into());
    }
    Ok(WindowFit {
        quantity,
        min,
        max,
        fit: fit_line(&x, &y, None)?,
    })
}

/// Q-value of one evaluated window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub quantity: Quantity,
    pub min: f64,
    pub max: f64,
    pub q_value: f64,
}

#[derive(Clone, Debug)]
pub struct Search {
    pub best: WindowFit,
    pub candidates: Vec<Candidate>,
}

/// Replace `best` with `fit` only when `fit` ranks strictly ahead of it
fn keep_better(best: &mut Option<WindowFit>, fit: WindowFit, target: f64) {
    if best
        .as_ref()
        .map_or(true, |current| fit.rank(current, target) == Ordering::Less)
    {
        *best = Some(fit);
    }
}

/// Scan the window grid for the fit whose Q lands closest to `target` MeV
///
/// Ties go to the smaller slope error, then to the earliest window. Windows that cannot be
/// fitted are skipped.
pub fn search(
    rows: &[KurieRow],
    quantity: Quantity,
    grid: &WindowGrid,
    target: f64,
) -> Result<Search> {
    grid.validate()?;
    let mut best: Option<WindowFit> = None;
    let mut candidates = vec![];
    for (min, max) in grid.windows() {
        let fit = match fit_window(rows, quantity, min, max) {
            Ok(fit) => fit,
            Err(e) => {
                debug!(%quantity, min, max, error = %e, "skipping window");
                continue;
            }
        };
        candidates.push(Candidate {
            quantity,
            min,
            max,
            q_value: fit.q_value().value,
        });
        keep_better(&mut best, fit, target);
    }

    let best = best.ok_or_else(|| {
        Error::FitDidNotConverge(format!("no window admits a {quantity} fit"))
    })?;
    info!(
        %quantity,
        min = best.min,
        max = best.max,
        q = best.q_value().value,
        windows = candidates.len(),
        "best window"
    );
    Ok(Search { best, candidates })
}

/// The selected window of one quantity, as persisted between the search and the final fit
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct BestWindow {
    pub min: f64,
    pub max: f64,
    #[serde(deserialize_with = "quantity_from_label")]
    pub quantity: Quantity,
    pub q_value: f64,
}

fn quantity_from_label<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Quantity, D::Error> {
    let label = String::deserialize(deserializer)?;
    label.parse().map_err(serde::de::Error::custom)
}

impl From<&WindowFit> for BestWindow {
    fn from(fit: &WindowFit) -> Self {
        Self {
            min: fit.min,
            max: fit.max,
            quantity: fit.quantity,
            q_value: fit.q_value().value,
        }
    }
}

pub fn write_best(path: &Path, windows: &[BestWindow]) -> Result<()> {
    table::write(
        path,
        &["Min Energy (MeV)", "Max Energy (MeV)", "Fit Type", "Q Value (MeV)"],
        windows.iter().map(|window| {
            vec![
                format!("{:.2}", window.min),
                format!("{:.2}", window.max),
                window.quantity.label().to_owned(),
                format!("{:.4}", window.q_value),
            ]
        }),
    )
}

pub fn read_best(path: &Path) -> Result<Vec<BestWindow>> {
    if !path.exists() {
        return Err(Error::MissingFile(path.to_path_buf()).into());
    }
    let text = fs::read_to_string(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());
    rdr.deserialize::<BestWindow>()
        .enumerate()
        .map(|(ii, record)| {
            record.map_err(|e| {
                Error::MalformedRow {
                    path: path.to_path_buf(),
                    line: ii + 2,
                    reason: e.to_string(),
                }
                .into()
            })
        })
        .collect()
}

/// Q with its propagated error for one quantity
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QValue {
    pub quantity: Quantity,
    pub q_value: Measurement<f64>,
}

/// Refit the selected windows and propagate the line errors into Q
pub fn refit(rows: &[KurieRow], windows: &[BestWindow]) -> Result<Vec<QValue>> {
    windows
        .iter()
        .map(|window| {
            let fit = fit_window(rows, window.quantity, window.min, window.max)?;
            let q_value = fit.q_value();
            info!(quantity = %window.quantity, %q_value, "Q value");
            Ok(QValue {
                quantity: window.quantity,
                q_value,
            })
        })
        .collect()
}

pub fn write_q_values(path: &Path, values: &[QValue]) -> Result<()> {
    table::write(
        path,
        &["Key", "Q Value (MeV)", "Q Error (MeV)"],
        values.iter().map(|value| {
            vec![
                value.quantity.label().to_owned(),
                format!("{:.4}", value.q_value.value),
                format!("{:.4}", value.q_value.uncertainty),
            ]
        }),
    )
}

/// Read the Q values written by [`write_q_values`]
pub fn read_q_values(path: &Path) -> Result<Vec<QValue>> {
    if !path.exists() {
        return Err(Error::MissingFile(path.to_path_buf()).into());
    }
    let text = fs::read_to_string(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());
    rdr.deserialize::<(String, f64, f64)>()
        .enumerate()
        .map(|(ii, record)| {
            let malformed = |reason: String| Error::MalformedRow {
                path: path.to_path_buf(),
                line: ii + 2,
                reason,
            };
            let (key, value, uncertainty) = record.map_err(|e| malformed(e.to_string()))?;
            Ok(QValue {
                quantity: key.parse().map_err(|e: Error| malformed(e.to_string()))?,
                q_value: Measurement::new(value, uncertainty),
            })
        })
        .collect()
}

pub fn write_candidates(path: &Path, candidates: &[Candidate]) -> Result<()> {
    table::write(
        path,
        &["Min Energy (MeV)", "Max Energy (MeV)", "Fit Type", "Q Value (MeV)"],
        candidates.iter().map(|candidate| {
            vec![
                format!("{:.2}", candidate.min),
                format!("{:.2}", candidate.max),
                candidate.quantity.label().to_owned(),
                format!("{:.4}", candidate.q_value),
            ]
        }),
    )
}

#[cfg(test)]
mod tests {
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::{Distribution, Normal};
    use rand_isaac::Isaac64Rng;
    use tempdir::TempDir;

    use super::{
        keep_better, read_best, read_q_values, refit, search, write_best, write_q_values,
        BestWindow, Quantity, WindowFit, WindowGrid,
    };
    use crate::kurie::KurieRow;
    use crate::linear::LinearFit;
    use crate::measurement::Measurement;

    const Q_ZERO: f64 = 0.764;

    /// Rows whose Kurie value falls linearly to zero at `Q_ZERO`, with counts equal to its square
    /// so that both quantities share the endpoint
    fn linear_rows(noise: f64) -> Vec<KurieRow> {
        let mut rng = Isaac64Rng::seed_from_u64(204);
        let normal = Normal::new(0., noise.max(f64::MIN_POSITIVE)).unwrap();
        (0..120u32)
            .map(|channel| {
                let energy = f64::from(channel) * 0.01;
                let ideal = (10. * (Q_ZERO - energy)).max(0.);
                let jitter = if noise > 0. { normal.sample(&mut rng) } else { 0. };
                let value = ideal + jitter;
                KurieRow {
                    channel,
                    counts: value.powi(2),
                    total_energy: 1.,
                    momentum: 1.,
                    fermi: 1.,
                    value,
                    energy,
                }
            })
            .collect()
    }

    fn grid() -> WindowGrid {
        WindowGrid {
            min_range: (0.1, 0.3),
            max_range: (0.4, 0.7),
            step: 0.01,
        }
    }

    #[test]
    fn search_converges_to_the_endpoint() {
        let rows = linear_rows(0.);
        for quantity in Quantity::ALL {
            let outcome = search(&rows, quantity, &grid(), 0.8).unwrap();
            approx::assert_abs_diff_eq!(outcome.best.q_value().value, Q_ZERO, epsilon = 1e-9);
        }
    }

    #[test]
    fn search_is_deterministic() {
        let rows = linear_rows(0.05);
        let first = search(&rows, Quantity::Kurie, &grid(), 0.8).unwrap();
        let second = search(&rows, Quantity::Kurie, &grid(), 0.8).unwrap();

        assert_eq!(first.best.min, second.best.min);
        assert_eq!(first.best.max, second.best.max);
        assert_eq!(first.candidates, second.candidates);
    }

    #[test]
    fn ties_keep_the_first_window() {
        // Every window of the grid holds the same three rows, so every fit is identical
        let rows = [0.25, 0.3, 0.35]
            .into_iter()
            .zip(1..)
            .map(|(energy, channel)| KurieRow {
                channel,
                counts: 1.,
                total_energy: 1.,
                momentum: 1.,
                fermi: 1.,
                value: 2. * (0.8 - energy) + if channel == 2 { 0.01 } else { 0. },
                energy,
            })
            .collect::<Vec<_>>();
        let grid = WindowGrid {
            min_range: (0.125, 0.25),
            max_range: (0.375, 0.5),
            step: 0.125,
        };
        let outcome = search(&rows, Quantity::Kurie, &grid, 0.8).unwrap();

        assert_eq!(outcome.candidates.len(), 4);
        assert_eq!((outcome.best.min, outcome.best.max), (0.125, 0.375));
    }

    #[test]
    fn finer_grids_never_move_away_from_the_endpoint() {
        let rows = linear_rows(0.05);
        // Each grid holds every edge of the coarser ones
        let distances = [0.0625, 0.03125, 0.015625]
            .into_iter()
            .map(|step| {
                let grid = WindowGrid {
                    min_range: (0.125, 0.375),
                    max_range: (0.5, 0.75),
                    step,
                };
                let outcome = search(&rows, Quantity::Kurie, &grid, Q_ZERO).unwrap();
                (outcome.best.q_value().value - Q_ZERO).abs()
            })
            .collect::<Vec<_>>();

        assert!(distances.windows(2).all(|pair| pair[1] <= pair[0]), "{distances:?}");
        assert!(distances[2] < 0.01);
    }

    fn window(min: f64, intercept: f64, slope_error: f64) -> WindowFit {
        WindowFit {
            quantity: Quantity::Kurie,
            min,
            max: min + 0.25,
            fit: LinearFit {
                slope: Measurement::new(-1., slope_error),
                intercept: Measurement::new(intercept, 0.01),
                chi_squared: 1.,
                degrees_of_freedom: 10,
            },
        }
    }

    #[test]
    fn equally_distant_windows_prefer_the_smaller_slope_error() {
        // Q of 0.5 and 1.0 sit exactly 0.25 either side of the target
        let target = 0.75;
        let scattered = window(0.125, 0.5, 0.2);
        let clean = window(0.25, 1., 0.05);
        approx::assert_relative_eq!(
            (scattered.q_value().value - target).abs(),
            (clean.q_value().value - target).abs()
        );

        let mut best = None;
        keep_better(&mut best, scattered.clone(), target);
        keep_better(&mut best, clean.clone(), target);
        assert_eq!(best.as_ref().map(|fit| fit.min), Some(0.25));

        let mut best = None;
        keep_better(&mut best, clean, target);
        keep_better(&mut best, scattered, target);
        assert_eq!(best.as_ref().map(|fit| fit.min), Some(0.25));
    }

    #[test]
    fn nan_rows_are_excluded_from_fits() {
        let mut rows = linear_rows(0.);
        rows[25].value = f64::NAN;
        let outcome = search(&rows, Quantity::Kurie, &grid(), 0.8).unwrap();
        assert!(outcome.best.q_value().value.is_finite());
    }

    #[test]
    fn windows_respect_ordering_and_emptiness() {
        let grid = WindowGrid {
            min_range: (0.25, 0.75),
            max_range: (0.5, 0.75),
            step: 0.25,
        };
        let windows = grid.windows().collect::<Vec<_>>();
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|(min, max)| min < max));
        assert!(windows[0].0 <= windows[2].0);
    }

    #[test]
    fn a_grid_without_usable_windows_is_an_error() {
        let rows = linear_rows(0.);
        let grid = WindowGrid {
            min_range: (5., 6.),
            max_range: (7., 8.),
            step: 0.5,
        };
        assert!(search(&rows, Quantity::Kurie, &grid, 0.8).is_err());
    }

    #[test]
    fn selected_windows_refit_and_round_trip() {
        let dir = TempDir::new("qvalue").unwrap();
        let rows = linear_rows(0.02);
        let best = Quantity::ALL
            .into_iter()
            .map(|quantity| BestWindow::from(&search(&rows, quantity, &grid(), 0.8).unwrap().best))
            .collect::<Vec<_>>();

        let best_path = dir.path().join("QBest_Values.txt");
        write_best(&best_path, &best).unwrap();
        let read = read_best(&best_path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].quantity, Quantity::Kurie);
        assert_eq!(read[1].quantity, Quantity::SqrtCounts);
        approx::assert_abs_diff_eq!(read[0].min, best[0].min, epsilon = 5e-3);

        let values = refit(&rows, &read).unwrap();
        for value in &values {
            approx::assert_abs_diff_eq!(value.q_value.value, Q_ZERO, epsilon = 0.02);
            assert!(value.q_value.uncertainty > 0.);
        }

        let values_path = dir.path().join("Q_ValuesErrors.txt");
        write_q_values(&values_path, &values).unwrap();
        let read = read_q_values(&values_path).unwrap();
        assert_eq!(read[1].quantity, Quantity::SqrtCounts);
        approx::assert_abs_diff_eq!(
            read[0].q_value.value,
            values[0].q_value.value,
            epsilon = 5e-5
        );
    }
}
