//! Run configuration
//!
//! Every path, fit window, initial guess and physical constant used by the pipeline is read from
//! a TOML file. Each section falls back to its defaults when absent, so a file only needs the
//! entries that differ:
//!
//! ```toml
//! [paths]
//! data_dir = "Data"
//! isotopes = ["Cesio137", "Talio204"]
//!
//! [peak]
//! window = [175, 230]
//!
//! [activity]
//! measurement_date = "2024-10-15"
//!
//! [qvalue.kurie]
//! min_range = [0.1, 0.3]
//! max_range = [0.4, 0.8]
//! step = 0.01
//! ```
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activity::ReferenceSource;
use crate::error::Error;
use crate::kurie::ELECTRON_REST_ENERGY;
use crate::peak::{PeakParameters, SolverSettings};
use crate::qvalue::{Quantity, WindowGrid};
use crate::spline::Extrapolation;
use crate::Result;

const NAME_PLACEHOLDER: &str = "{name}";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathConfig,
    pub peak: PeakConfig,
    pub activity: ReferenceSource,
    pub intensity: IntensityConfig,
    pub kurie: KurieConfig,
    pub qvalue: QValueConfig,
    pub plot: PlotConfig,
}

impl Config {
    /// Read the configuration at `path`, or the defaults if there is no such file
    ///
    /// # Errors
    /// The file exists but cannot be read or parsed, or holds inconsistent values.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            info!(path = %path.display(), "reading configuration");
            let text = fs::read_to_string(path)?;
            toml::from_str(&text)
                .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?
        } else {
            warn!(path = %path.display(), "configuration not found, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.paths.raw_pattern.contains(NAME_PLACEHOLDER) {
            return Err(Error::InvalidConfig(format!(
                "raw spectrum pattern {:?} has no {NAME_PLACEHOLDER} placeholder",
                self.paths.raw_pattern
            ))
            .into());
        }
        if self.peak.window.0 >= self.peak.window.1 {
            return Err(Error::InvalidConfig(format!(
                "peak window {:?} is empty",
                self.peak.window
            ))
            .into());
        }
        if self.peak.live_time_minutes <= 0. {
            return Err(Error::InvalidConfig("live time must be positive".into()).into());
        }
        if self.kurie.rest_energy <= 0. {
            return Err(Error::InvalidConfig("rest energy must be positive".into()).into());
        }
        self.qvalue.kurie.validate()?;
        self.qvalue.sqrt_counts.validate()?;
        Ok(())
    }
}

/// Where inputs are read from and results written to
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Raw background histogram, relative to `data_dir`
    pub background: String,
    /// Raw isotope histogram file name, `{name}` is replaced by the isotope
    pub raw_pattern: String,
    pub isotopes: Vec<String>,
    /// Header lines preceding the numbers in raw histograms
    pub header_lines: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            data_dir: "Data".into(),
            results_dir: "Results".into(),
            background: "Datos_Fondo_(canales).txt".into(),
            raw_pattern: "Datos_{name}_(canales).txt".into(),
            isotopes: ["Cesio137", "Europio152", "Bario133", "Talio204"]
                .map(String::from)
                .to_vec(),
            header_lines: 1,
        }
    }
}

impl PathConfig {
    pub fn raw_background(&self) -> PathBuf {
        self.data_dir.join(&self.background)
    }

    pub fn raw_spectrum(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(self.raw_pattern.replace(NAME_PLACEHOLDER, name))
    }

    pub fn annotated_background(&self) -> PathBuf {
        self.data_dir.join("Data_Background_Errors_(channels).txt")
    }

    pub fn channel_spectrum(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("Data_{name}_WithErrors_channel.txt"))
    }

    pub fn energy_spectrum(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("Data_{name}_WithErrors_energy.txt"))
    }

    pub fn peak_report(&self, name: &str) -> PathBuf {
        self.results_dir.join(format!("{name}_fitted_parameters.txt"))
    }

    pub fn slope_report(&self) -> PathBuf {
        self.results_dir.join("Slope_fitted_parameters.txt")
    }

    pub fn rate_report(&self, name: &str) -> PathBuf {
        self.results_dir.join(format!("{name}_calculate_activity.txt"))
    }

    pub fn efficiency_report(&self, name: &str) -> PathBuf {
        self.results_dir.join(format!("{name}_efficiency.txt"))
    }

    pub fn intensity_table(&self, name: &str) -> PathBuf {
        self.results_dir.join(format!("{name}_IntensityResults.txt"))
    }

    pub fn kurie_table(&self) -> PathBuf {
        self.results_dir.join("TableValues.txt")
    }

    pub fn best_windows(&self) -> PathBuf {
        self.results_dir.join("QBest_Values.txt")
    }

    pub fn window_candidates(&self) -> PathBuf {
        self.results_dir.join("Q_Windows.txt")
    }

    pub fn q_values(&self) -> PathBuf {
        self.results_dir.join("Q_ValuesErrors.txt")
    }

    pub fn plot(&self, file_name: &str) -> PathBuf {
        self.results_dir.join(file_name)
    }
}

/// The calibration line and its fit
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    pub isotope: String,
    /// Energy of the line in keV
    pub energy: f64,
    /// Inclusive channel window
    pub window: (u32, u32),
    pub initial: PeakParameters,
    pub solver: SolverSettings,
    pub live_time_minutes: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            isotope: "Cesio137".into(),
            energy: 630.,
            window: (175, 230),
            initial: PeakParameters {
                offset: -1.,
                slope: -3.,
                amplitude: 3e3,
                centre: 210.,
                width: 5.,
            },
            solver: SolverSettings::default(),
            live_time_minutes: 10.,
        }
    }
}

impl PeakConfig {
    /// Live time in seconds
    pub fn live_time(&self) -> f64 {
        self.live_time_minutes * 60.
    }
}

/// A named energy interval whose share of the total counts is reported
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    /// Representative energy in keV, used to position the label
    pub energy: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityConfig {
    pub isotope: String,
    pub components: Vec<Component>,
}

impl Default for IntensityConfig {
    fn default() -> Self {
        Self {
            isotope: "Talio204".into(),
            components: vec![Component {
                name: "beta-".into(),
                energy: 350.,
                min: 54.,
                max: 690.,
            }],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FermiTable {
    /// Relative to `paths.data_dir`
    pub path: PathBuf,
    pub header_lines: usize,
    pub extrapolation: Extrapolation,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KurieConfig {
    pub isotope: String,
    /// Electron rest energy in keV
    pub rest_energy: f64,
    /// `G(Z, W)` against momentum
    pub fermi: FermiTable,
    /// `F(Z, T)` against kinetic energy in MeV, for the momentum-space check
    pub kinetic_fermi: Option<FermiTable>,
}

impl Default for FermiTable {
    fn default() -> Self {
        Self {
            path: "ValoresInterpolacion.txt".into(),
            header_lines: 1,
            extrapolation: Extrapolation::Linear,
        }
    }
}

impl Default for KurieConfig {
    fn default() -> Self {
        Self {
            isotope: "Talio204".into(),
            rest_energy: ELECTRON_REST_ENERGY,
            fermi: FermiTable::default(),
            kinetic_fermi: Some(FermiTable {
                path: "Fermi_204Tl.txt".into(),
                header_lines: 2,
                extrapolation: Extrapolation::Linear,
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QValueConfig {
    /// Expected endpoint in MeV
    pub target: f64,
    pub kurie: WindowGrid,
    pub sqrt_counts: WindowGrid,
}

impl Default for QValueConfig {
    fn default() -> Self {
        Self {
            target: 0.8,
            kurie: WindowGrid {
                min_range: (0.1, 0.3),
                max_range: (0.4, 0.8),
                step: 0.01,
            },
            sqrt_counts: WindowGrid {
                min_range: (0.2, 0.4),
                max_range: (0.5, 0.7),
                step: 0.01,
            },
        }
    }
}

impl QValueConfig {
    pub const fn grid(&self, quantity: Quantity) -> &WindowGrid {
        match quantity {
            Quantity::Kurie => &self.kurie,
            Quantity::SqrtCounts => &self.sqrt_counts,
        }
    }
}

/// A labelled arrow on an energy spectrum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub isotope: String,
    /// keV
    pub energy: f64,
    pub label: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub log_scale: bool,
    /// Width and height in pixels
    pub size: (u32, u32),
    /// Upper limit of the energy axis in keV
    pub max_energy: f64,
    pub annotations: Vec<Annotation>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        let annotation = |isotope: &str, energy, label: &str| Annotation {
            isotope: isotope.into(),
            energy,
            label: label.into(),
        };
        Self {
            log_scale: false,
            size: (1000, 600),
            max_energy: 1600.,
            annotations: vec![
                annotation("Cesio137", 330., "Radiación β"),
                annotation("Cesio137", 32., "Rayos X"),
                annotation("Cesio137", 630., "Conversión interna"),
                annotation("Bario133", 320., "Conversión interna"),
                annotation("Bario133", 30.85, "Rayos X"),
                annotation("Bario133", 44.5, "Conversión interna"),
                annotation("Talio204", 350., "β-"),
            ],
        }
    }
}

impl PlotConfig {
    pub fn annotations_for<'a>(&'a self, isotope: &'a str) -> impl Iterator<Item = &'a Annotation> {
        self.annotations
            .iter()
            .filter(move |annotation| annotation.isotope == isotope)
    }
}
