//! Photometry constants and the pure math behind the simulated instrument.
//!
//! The instrument response is not a physical model: percent transmittance is
//! interpolated from a fixed calibration table for the dye in use, and the
//! absorbance relation is the plain Beer-Lambert `A = -log10(T)`.

use itertools::Itertools;

/// Concentration of the stock dye solution, in µM.
pub const STOCK_CONCENTRATION: f64 = 2.31;

/// Wavelength the simulated instrument is locked to, in nm.
pub const TARGET_WAVELENGTH: u32 = 630;

/// Known calibration line slope (Abs per µM) used to back-calculate the
/// unknown sample's concentration from its measured absorbance.
pub const KNOWN_SLOPE: f64 = 0.1358;

/// Absorbance ceiling above which a reading is reported as off-scale.
pub const MAX_ABS: f64 = 1.5;

/// Sentinel concentration marking an unlabeled ("unknown") solution.
pub const UNKNOWN_CONCENTRATION: f64 = -1.0;

/// Fixed percent transmittance returned for the unknown sentinel.
pub const UNKNOWN_PERCENT_T: f64 = 39.0;

/// Calibration points (concentration in µM, percent transmittance), sorted
/// by concentration.
pub const TRANSMITTANCE_LOOKUP: [(f64, f64); 8] = [
    (0.0, 100.0),
    (0.231, 95.0),
    (0.462, 87.0),
    (0.693, 81.0),
    (0.924, 77.0),
    (1.39, 65.0),
    (1.85, 58.0),
    (2.31, 49.0),
];

/// Nominal concentration of a stock/water dilution.
///
/// Returns 0 for an empty (or degenerate) mixture rather than dividing by
/// zero.
pub fn concentration_from_dilution(stock_vol: f64, water_vol: f64) -> f64 {
    let total = stock_vol + water_vol;
    if total <= 0.0 {
        return 0.0;
    }
    STOCK_CONCENTRATION * stock_vol / total
}

/// Simulated percent transmittance for a sample of the given concentration.
///
/// The unknown sentinel short-circuits to a fixed value. Everything else is
/// piecewise-linear interpolation over [`TRANSMITTANCE_LOOKUP`], clamped to
/// the first/last table value outside the calibrated range.
pub fn simulated_percent_transmittance(concentration: f64) -> f64 {
    if concentration == UNKNOWN_CONCENTRATION {
        return UNKNOWN_PERCENT_T;
    }
    let (first_conc, first_t) = TRANSMITTANCE_LOOKUP[0];
    let (last_conc, last_t) = TRANSMITTANCE_LOOKUP[TRANSMITTANCE_LOOKUP.len() - 1];
    if concentration <= first_conc {
        return first_t;
    }
    if concentration >= last_conc {
        return last_t;
    }
    for ((c_lo, t_lo), (c_hi, t_hi)) in TRANSMITTANCE_LOOKUP.iter().tuple_windows() {
        if concentration >= *c_lo && concentration <= *c_hi {
            if c_hi == c_lo {
                return *t_lo;
            }
            let ratio = (concentration - c_lo) / (c_hi - c_lo);
            return t_lo + (t_hi - t_lo) * ratio;
        }
    }
    // Unreachable while the table stays sorted.
    last_t
}

/// Absorbance from percent transmittance; non-finite results (e.g. %T = 0)
/// collapse to `+∞`.
pub fn absorbance_from_percent_t(percent_t: f64) -> f64 {
    let absorbance = -(percent_t / 100.0).log10();
    if absorbance.is_nan() || absorbance.is_infinite() {
        f64::INFINITY
    } else {
        absorbance
    }
}

/// Inverse of [`absorbance_from_percent_t`], used when flipping the display
/// mode.
pub fn percent_t_from_absorbance(absorbance: f64) -> f64 {
    10f64.powf(-absorbance) * 100.0
}

/// Round to a fixed number of decimals, the way measurement columns are
/// stored.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
