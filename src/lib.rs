#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

// Links the BLAS implementation used by ndarray and ndarray-linalg
extern crate blas_src;

pub mod activity;
pub mod calibration;
pub mod config;
pub mod error;
pub mod kurie;
pub mod linear;
pub mod math;
pub mod measurement;
pub mod peak;
pub mod pipeline;
pub mod plot;
pub mod qvalue;
pub mod report;
pub mod spectrum;
pub mod spline;
pub mod table;

pub type Result<T> = ::std::result::Result<T, Box<dyn ::std::error::Error>>;
