use std::fmt;

/// A central value with its one-sigma uncertainty
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement<E> {
    pub value: E,
    pub uncertainty: E,
}

impl<E> Measurement<E> {
    pub const fn new(value: E, uncertainty: E) -> Self {
        Self { value, uncertainty }
    }
}

impl Measurement<f64> {
    pub const fn exact(value: f64) -> Self {
        Self {
            value,
            uncertainty: 0.,
        }
    }

    /// Whether `other` lies within `sigmas` standard uncertainties of this value
    pub fn agrees_with(&self, other: f64, sigmas: f64) -> bool {
        (self.value - other).abs() <= sigmas * self.uncertainty
    }
}

/// Formats as `value +- uncertainty`, honouring the requested precision for both
impl<E: fmt::Display> fmt::Display for Measurement<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(precision) = f.precision() {
            write!(
                f,
                "{:.precision$} +- {:.precision$}",
                self.value, self.uncertainty
            )
        } else {
            write!(f, "{} +- {}", self.value, self.uncertainty)
        }
    }
}
