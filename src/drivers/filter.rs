use crate::drivers::AcquisitionError;

/// Samples mirrored onto each end of the trace before filtering.
pub const PADLEN: usize = 400;

/// Sample rate the coefficient sets were designed for.
pub const DESIGN_SAMPLE_RATE_HZ: f64 = 100.0;

/// Low-pass cutoff, chosen from the scan rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutoffClass {
    OneHz,
    ThreeHz,
    TenHz,
}

impl CutoffClass {
    /// `5..=10 → 1 Hz`, `11..=100 → 3 Hz`, `≥ 101 → 10 Hz`, anything else falls back to 1 Hz.
    pub fn from_scan_rate(scan_rate: i32) -> Self {
        match scan_rate {
            5..=10 => CutoffClass::OneHz,
            11..=100 => CutoffClass::ThreeHz,
            101.. => CutoffClass::TenHz,
            _ => CutoffClass::OneHz,
        }
    }

    pub fn from_hz(hz: u32) -> Result<Self, AcquisitionError> {
        match hz {
            1 => Ok(CutoffClass::OneHz),
            3 => Ok(CutoffClass::ThreeHz),
            10 => Ok(CutoffClass::TenHz),
            other => Err(AcquisitionError::Filter(format!(
                "no coefficient set for a {other} Hz cutoff"
            ))),
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            CutoffClass::OneHz => 1,
            CutoffClass::ThreeHz => 3,
            CutoffClass::TenHz => 10,
        }
    }

    pub fn coefficients(self) -> &'static FilterCoefficients {
        match self {
            CutoffClass::OneHz => &BUTTER4_1HZ,
            CutoffClass::ThreeHz => &BUTTER4_3HZ,
            CutoffClass::TenHz => &BUTTER4_10HZ,
        }
    }
}

/// Direct-form transfer function `b(z) / a(z)` with `a[0] == 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterCoefficients {
    pub b: [f64; 5],
    pub a: [f64; 5],
}

impl FilterCoefficients {
    pub fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }
}

// 4th-order Butterworth low-pass, bilinear transform at 100 Hz
const BUTTER4_1HZ: FilterCoefficients = FilterCoefficients {
    b: [
        8.984861463931515e-07,
        3.593944585572606e-06,
        5.390916878358909e-06,
        3.593944585572606e-06,
        8.984861463931515e-07,
    ],
    a: [
        1.0,
        -3.8358255406473476,
        5.520819136622227,
        -3.5335352194630136,
        0.8485559992664767,
    ],
};
const BUTTER4_3HZ: FilterCoefficients = FilterCoefficients {
    b: [
        6.238698354842781e-05,
        0.00024954793419371124,
        0.00037432190129056686,
        0.00024954793419371124,
        6.238698354842781e-05,
    ],
    a: [
        1.0,
        -3.507786207390782,
        4.640902412686705,
        -2.7426528211203713,
        0.6105348075612235,
    ],
};
const BUTTER4_10HZ: FilterCoefficients = FilterCoefficients {
    b: [
        0.0048243433577162265,
        0.019297373430864906,
        0.02894606014629736,
        0.019297373430864906,
        0.0048243433577162265,
    ],
    a: [
        1.0,
        -2.3695130071820376,
        2.3139884144158795,
        -1.0546654058785672,
        0.18737949236818485,
    ],
};

/// Forward-backward Butterworth low-pass with odd reflection padding.
///
/// Running the same filter in both directions cancels its phase response, so peaks stay where the
/// instrument put them. Output length always equals input length and the result depends only on
/// the input and the cutoff class.
#[derive(Clone, Copy, Debug)]
pub struct ZeroPhaseFilter {
    coeffs: FilterCoefficients,
}

impl ZeroPhaseFilter {
    pub fn new(class: CutoffClass) -> Self {
        Self {
            coeffs: *class.coefficients(),
        }
    }

    pub fn for_scan_rate(scan_rate: i32) -> Self {
        Self::new(CutoffClass::from_scan_rate(scan_rate))
    }

    /// Filters `samples` with the cutoff class implied by `scan_rate`.
    pub fn apply(samples: &[f64], scan_rate: i32) -> Vec<f64> {
        Self::for_scan_rate(scan_rate).filter(samples)
    }

    pub fn filter(&self, samples: &[f64]) -> Vec<f64> {
        if samples.is_empty() {
            return Vec::new();
        }
        // short traces cannot be mirrored further than their own interior
        let padlen = PADLEN.min(samples.len() - 1);
        let mut forward = self.run(&reflect_pad(samples, padlen));
        forward.reverse();
        let backward = self.run(&reflect_pad(&forward, padlen));
        let strip = 2 * padlen;
        let mut out = backward[strip..backward.len() - strip].to_vec();
        out.reverse();
        out
    }

    /// `y[i] = Σ b[j]·x[i-j] − Σ_{j≥1} a[j]·y[i-j]`, with the history before the first sample held
    /// at that sample's steady state so a constant input passes through untouched.
    fn run(&self, x: &[f64]) -> Vec<f64> {
        let FilterCoefficients { b, a } = &self.coeffs;
        let x0 = x.first().copied().unwrap_or(0.0);
        let y0 = x0 * self.coeffs.dc_gain();
        let mut y: Vec<f64> = Vec::with_capacity(x.len());
        for i in 0..x.len() {
            let mut acc = 0.0;
            for j in 0..b.len() {
                acc += b[j] * if i >= j { x[i - j] } else { x0 };
            }
            for j in 1..a.len() {
                acc -= a[j] * if i >= j { y[i - j] } else { y0 };
            }
            y.push(acc);
        }
        y
    }
}

/// `2·first − reverse(x[1..=padlen])`, then `x`, then `2·last − reverse(x[n-1-padlen..n-1])`.
fn reflect_pad(x: &[f64], padlen: usize) -> Vec<f64> {
    let n = x.len();
    let first = x[0];
    let last = x[n - 1];
    let mut out = Vec::with_capacity(n + 2 * padlen);
    out.extend((1..=padlen).rev().map(|i| 2.0 * first - x[i]));
    out.extend_from_slice(x);
    out.extend((n - 1 - padlen..n - 1).rev().map(|i| 2.0 * last - x[i]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_stays_empty() {
        assert!(ZeroPhaseFilter::apply(&[], 50).is_empty());
        assert!(ZeroPhaseFilter::apply(&[], -3).is_empty());
    }

    #[test]
    fn cutoff_class_boundaries() {
        assert_eq!(CutoffClass::from_scan_rate(4), CutoffClass::OneHz);
        assert_eq!(CutoffClass::from_scan_rate(5), CutoffClass::OneHz);
        assert_eq!(CutoffClass::from_scan_rate(10), CutoffClass::OneHz);
        assert_eq!(CutoffClass::from_scan_rate(11), CutoffClass::ThreeHz);
        assert_eq!(CutoffClass::from_scan_rate(100), CutoffClass::ThreeHz);
        assert_eq!(CutoffClass::from_scan_rate(101), CutoffClass::TenHz);
        assert_eq!(CutoffClass::from_scan_rate(i32::MIN), CutoffClass::OneHz);
    }

    #[test]
    fn unknown_cutoff_is_rejected() {
        assert!(matches!(CutoffClass::from_hz(5), Err(AcquisitionError::Filter(_))));
        assert_eq!(CutoffClass::from_hz(3).unwrap(), CutoffClass::ThreeHz);
    }

    #[test]
    fn coefficient_sets_have_unit_dc_gain() {
        for class in [CutoffClass::OneHz, CutoffClass::ThreeHz, CutoffClass::TenHz] {
            let c = class.coefficients();
            assert_eq!(c.a[0], 1.0);
            assert!((c.dc_gain() - 1.0).abs() < 1e-6, "{class:?}");
        }
    }

    #[test]
    fn constant_input_is_unchanged() {
        let samples = vec![2.5; 1000];
        for rate in [7, 50, 150] {
            let out = ZeroPhaseFilter::apply(&samples, rate);
            assert_eq!(out.len(), samples.len());
            assert!(out.iter().all(|v| (v - 2.5).abs() < 1e-6), "rate {rate}");
        }
    }

    #[test]
    fn input_shorter_than_padding() {
        let out = ZeroPhaseFilter::apply(&[1.0; 5], 50);
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert_eq!(ZeroPhaseFilter::apply(&[3.0], 50), vec![3.0]);
    }

    #[test]
    fn output_is_bit_reproducible() {
        let samples: Vec<f64> = (0..700).map(|i| (i as f64 * 0.37).sin() + 0.01 * i as f64).collect();
        let a = ZeroPhaseFilter::apply(&samples, 120);
        let b = ZeroPhaseFilter::apply(&samples, 120);
        assert_eq!(
            a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn suppresses_alternating_noise() {
        let samples: Vec<f64> = (0..1000).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let out = ZeroPhaseFilter::apply(&samples, 50);
        assert!(out[100..900].iter().all(|v| v.abs() < 1e-2));
    }

    #[test]
    fn ramp_has_no_phase_lag() {
        let samples: Vec<f64> = (0..600).map(f64::from).collect();
        let out = ZeroPhaseFilter::apply(&samples, 50);
        for i in [100, 290, 500] {
            assert!((out[i] - samples[i]).abs() < 1e-6, "index {i}: {}", out[i]);
        }
    }
}
