//! The analysis stages
//!
//! Each stage reads the files written by the stages before it and writes its own, so any stage
//! can be re-run on its own. Failures that only concern one isotope are logged and that isotope
//! is skipped; anything else aborts the stage.
use tracing::{info, warn};

use crate::activity::CountRate;
use crate::calibration::EnergyCalibration;
use crate::config::Config;
use crate::kurie::{self, KurieRow};
use crate::peak::{self, PeakFit};
use crate::plot::{self, Frame};
use crate::qvalue::{self, BestWindow, Quantity};
use crate::spectrum::{EnergySpectrum, Spectrum};
use crate::table;
use crate::Result;

const BACKGROUND: &str = "Background";
const MOMENTUM_ZOOM: (f64, f64) = (0.1, 0.5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Annotate,
    Fit,
    Calibrate,
    Activity,
    Intensity,
    Kurie,
    QSearch,
    QFit,
    Plot,
}

impl Stage {
    pub const ALL: [Self; 9] = [
        Self::Annotate,
        Self::Fit,
        Self::Calibrate,
        Self::Activity,
        Self::Intensity,
        Self::Kurie,
        Self::QSearch,
        Self::QFit,
        Self::Plot,
    ];

    pub fn run(self, config: &Config) -> Result<()> {
        match self {
            Self::Annotate => annotate(config),
            Self::Fit => fit_peak(config),
            Self::Calibrate => calibrate(config),
            Self::Activity => activity(config),
            Self::Intensity => intensity(config),
            Self::Kurie => kurie(config),
            Self::QSearch => q_search(config),
            Self::QFit => q_fit(config),
            Self::Plot => plot(config),
        }
    }
}

/// Run every stage in order, stopping at the first failure
pub fn run_all(config: &Config) -> Result<()> {
    for stage in Stage::ALL {
        info!(?stage, "running stage");
        stage.run(config)?;
    }
    Ok(())
}

/// Log a per-isotope failure and carry on
fn skip_on_error(name: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(isotope = name, error = %e, "skipping isotope");
    }
}

/// Attach Poisson errors to the background and subtract it from every isotope
pub fn annotate(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let background =
        Spectrum::from_counts_file(BACKGROUND, &paths.raw_background(), paths.header_lines)?;
    background.write(&paths.annotated_background())?;
    info!(bins = background.bins().len(), "annotated background");

    for name in &paths.isotopes {
        skip_on_error(name, subtract_background(config, &background, name));
    }
    Ok(())
}

fn subtract_background(config: &Config, background: &Spectrum, name: &str) -> Result<()> {
    let paths = &config.paths;
    let raw = Spectrum::from_counts_file(name, &paths.raw_spectrum(name), paths.header_lines)?;
    let net = raw.subtract_background(background)?;
    net.write(&paths.channel_spectrum(name))?;
    info!(isotope = name, "background subtracted");
    Ok(())
}

/// Fit the calibration line and record its count rate
pub fn fit_peak(config: &Config) -> Result<()> {
    skip_on_error(&config.peak.isotope, fit_and_record(config));
    Ok(())
}

fn fit_and_record(config: &Config) -> Result<()> {
    let (paths, settings) = (&config.paths, &config.peak);
    let name = settings.isotope.as_str();
    let spectrum = Spectrum::from_annotated_file(name, &paths.channel_spectrum(name))?;
    let fit = peak::fit_window(&spectrum, settings.window, settings.initial, settings.solver)?;
    info!(
        isotope = name,
        centre = %fit.centre(),
        iterations = fit.iterations,
        "peak fitted"
    );
    fit.write_report(&paths.peak_report(name), name, settings.energy)?;

    let rate = CountRate::from_area(fit.area(), settings.live_time())?;
    info!(isotope = name, area = %rate.area, rate = %rate.rate, "count rate");
    rate.write_report(&paths.rate_report(name), name, settings.energy)
}

/// Derive the energy scale from the fitted line and convert every channel spectrum
pub fn calibrate(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let (centre, energy) = PeakFit::centre_from_report(&paths.peak_report(&config.peak.isotope))?;
    let calibration = EnergyCalibration::from_peak(centre, energy)?;
    calibration.write_report(&paths.slope_report())?;

    for name in &paths.isotopes {
        skip_on_error(name, convert_to_energy(config, &calibration, name));
    }
    Ok(())
}

fn convert_to_energy(config: &Config, calibration: &EnergyCalibration, name: &str) -> Result<()> {
    let paths = &config.paths;
    let spectrum = Spectrum::from_annotated_file(name, &paths.channel_spectrum(name))?;
    spectrum
        .to_energy(calibration)
        .write(&paths.energy_spectrum(name))
}

/// Detector efficiency from the measured rate of the reference source
pub fn activity(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let name = config.peak.isotope.as_str();
    let rate = CountRate::rate_from_report(&paths.rate_report(name))?;
    let efficiency = config.activity.efficiency(rate)?;
    info!(
        isotope = name,
        activity_bq = efficiency.current_activity,
        efficiency = %efficiency.efficiency,
        "detector efficiency"
    );
    efficiency.write_report(&paths.efficiency_report(name), name)
}

/// Fraction of the counts falling into each configured component
pub fn intensity(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let name = config.intensity.isotope.as_str();
    let spectrum = EnergySpectrum::from_file(name, &paths.energy_spectrum(name))?;
    let rows = config
        .intensity
        .components
        .iter()
        .map(|component| {
            let intensity = spectrum.intensity(component.min, component.max);
            info!(component = component.name.as_str(), intensity, "intensity");
            vec![
                component.name.clone(),
                component.energy.to_string(),
                format!("{intensity:.6}"),
            ]
        })
        .collect::<Vec<_>>();
    table::write(
        &paths.intensity_table(name),
        &["Component", "Energy (keV)", "Intensity"],
        rows,
    )
}

/// Tabulate the Kurie transform of the beta spectrum
pub fn kurie(config: &Config) -> Result<()> {
    let (paths, settings) = (&config.paths, &config.kurie);
    let name = settings.isotope.as_str();
    let spectrum = EnergySpectrum::from_file(name, &paths.energy_spectrum(name))?;
    let fermi = kurie::load_fermi_table(
        &paths.data_dir.join(&settings.fermi.path),
        settings.fermi.header_lines,
        settings.fermi.extrapolation,
    )?;
    let rows = kurie::transform(&spectrum, &fermi, settings.rest_energy);
    let undefined = rows.iter().filter(|row| !row.is_finite()).count();
    if undefined > 0 {
        warn!(rows = undefined, "Kurie value undefined, rows excluded from fits");
    }
    info!(isotope = name, rows = rows.len(), "Kurie table");
    kurie::write_table(&paths.kurie_table(), &rows)
}

/// Select the fit window of both linearised quantities
pub fn q_search(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let rows = kurie::read_table(&paths.kurie_table())?;
    let mut best = vec![];
    let mut candidates = vec![];
    for quantity in Quantity::ALL {
        let search = qvalue::search(
            &rows,
            quantity,
            config.qvalue.grid(quantity),
            config.qvalue.target,
        )?;
        best.push(BestWindow::from(&search.best));
        candidates.extend(search.candidates);
    }
    qvalue::write_candidates(&paths.window_candidates(), &candidates)?;
    qvalue::write_best(&paths.best_windows(), &best)
}

/// Refit the selected windows and propagate the errors into Q
pub fn q_fit(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let rows = kurie::read_table(&paths.kurie_table())?;
    let windows = qvalue::read_best(&paths.best_windows())?;
    let values = qvalue::refit(&rows, &windows)?;
    qvalue::write_q_values(&paths.q_values(), &values)
}

fn figure_name(stem: &str, log_scale: bool) -> String {
    if log_scale {
        format!("{stem}Log.svg")
    } else {
        format!("{stem}.svg")
    }
}

fn channel_points(spectrum: &Spectrum) -> Vec<(f64, f64)> {
    spectrum
        .bins()
        .iter()
        .map(|bin| (f64::from(bin.channel), bin.counts))
        .collect()
}

fn channel_frame(config: &Config) -> Frame<'_> {
    Frame {
        size: config.plot.size,
        x_desc: "Channel",
        y_desc: "Counts",
        x_range: None,
        log_scale: config.plot.log_scale,
    }
}

/// Draw every figure whose inputs exist
///
/// A figure that cannot be drawn is logged and skipped.
pub fn plot(config: &Config) -> Result<()> {
    skip_on_error(BACKGROUND, background_figure(config));
    for name in &config.paths.isotopes {
        skip_on_error(name, spectrum_figures(config, name));
    }
    skip_on_error(&config.peak.isotope, calibration_figures(config));
    skip_on_error(&config.kurie.isotope, kurie_figures(config));
    Ok(())
}

fn background_figure(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let background = Spectrum::from_annotated_file(BACKGROUND, &paths.annotated_background())?;
    plot::spectrum(
        &paths.plot(&figure_name("Background_ChannelSpectre", config.plot.log_scale)),
        &channel_frame(config),
        BACKGROUND,
        channel_points(&background),
        &[],
    )
}

fn spectrum_figures(config: &Config, name: &str) -> Result<()> {
    let (paths, settings) = (&config.paths, &config.plot);
    let spectrum = Spectrum::from_annotated_file(name, &paths.channel_spectrum(name))?;
    plot::spectrum(
        &paths.plot(&figure_name(&format!("{name}_ChannelSpectre"), settings.log_scale)),
        &channel_frame(config),
        name,
        channel_points(&spectrum),
        &[],
    )?;

    let spectrum = EnergySpectrum::from_file(name, &paths.energy_spectrum(name))?;
    let points = spectrum
        .rows
        .iter()
        .map(|row| (row.energy, row.bin.counts))
        .collect();
    let annotations = settings.annotations_for(name).collect::<Vec<_>>();
    let frame = Frame {
        x_desc: "Energy (keV)",
        x_range: Some(0.0..settings.max_energy),
        ..channel_frame(config)
    };
    plot::spectrum(
        &paths.plot(&figure_name(&format!("{name}_EnergySpectre"), settings.log_scale)),
        &frame,
        name,
        points,
        &annotations,
    )
}

fn calibration_figures(config: &Config) -> Result<()> {
    let (paths, settings) = (&config.paths, &config.plot);
    let name = config.peak.isotope.as_str();
    let spectrum = Spectrum::from_annotated_file(name, &paths.channel_spectrum(name))?;
    let report = paths.peak_report(name);
    let parameters = PeakFit::parameters_from_report(&report)?;
    plot::peak_fit(
        &paths.plot(&figure_name(&format!("{name}_Fit"), settings.log_scale)),
        &channel_frame(config),
        name,
        channel_points(&spectrum),
        &parameters,
        config.peak.window,
    )?;

    let (centre, energy) = PeakFit::centre_from_report(&report)?;
    let calibration = EnergyCalibration::from_report(&paths.slope_report())?;
    plot::calibration(
        &paths.plot("energy_calibration.svg"),
        settings.size,
        &calibration,
        centre,
        energy,
    )
}

fn kurie_figures(config: &Config) -> Result<()> {
    let (paths, size) = (&config.paths, config.plot.size);
    let rows = kurie::read_table(&paths.kurie_table())?;
    plot::kurie(&paths.plot("Kurie_Energy.svg"), size, &rows, Quantity::Kurie)?;
    plot::kurie(&paths.plot("SqrtN(E)_Energy.svg"), size, &rows, Quantity::SqrtCounts)?;
    plot::both_methods(&paths.plot("BothKurieN(E)Plot.svg"), size, &rows, &[])?;

    if !paths.best_windows().exists() {
        return Ok(());
    }
    let fits = qvalue::read_best(&paths.best_windows())?
        .iter()
        .map(|window| qvalue::fit_window(&rows, window.quantity, window.min, window.max))
        .collect::<Result<Vec<_>>>()?;
    plot::both_methods(&paths.plot("LinearFits_QValue.svg"), size, &rows, &fits)?;

    momentum_figure(config, &rows)
}

fn momentum_figure(config: &Config, rows: &[KurieRow]) -> Result<()> {
    let paths = &config.paths;
    let Some(table) = &config.kurie.kinetic_fermi else {
        return Ok(());
    };
    if !paths.q_values().exists() {
        return Ok(());
    }
    let Some(q_value) = qvalue::read_q_values(&paths.q_values())?
        .into_iter()
        .find(|value| value.quantity == Quantity::Kurie)
    else {
        return Ok(());
    };

    let fermi = kurie::load_fermi_table(
        &paths.data_dir.join(&table.path),
        table.header_lines,
        table.extrapolation,
    )?;
    let points = kurie::momentum_form(rows, &fermi, q_value.q_value.value);
    plot::momentum_check(
        &paths.plot("QCuriePlot.svg"),
        config.plot.size,
        &points,
        MOMENTUM_ZOOM,
    )
}
