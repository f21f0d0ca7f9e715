//! Simulated potentiostat for demos and hardware-free runs.
//!
//! Answers `CV,...` and `CA,...` commands with a synthetic trace, split into randomly sized chunks
//! the way a radio link delivers them, and finishes each run with `done`.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drivers::{ManualEndpoint, Responder};

/// Points per volt swept in a CV run.
const CV_STEPS_PER_VOLT: f64 = 200.0;
/// Sample rate of a CA run.
const CA_SAMPLES_PER_SECOND: f64 = 10.0;
const MAX_CHUNK: usize = 48;

#[derive(Clone, Copy, Debug)]
pub struct SimulatedInstrument {
    pub noise: f64,
    pub seed: u64,
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        Self {
            noise: 0.02,
            seed: 0x5eed,
        }
    }
}

impl SimulatedInstrument {
    pub fn endpoint(self) -> ManualEndpoint {
        ManualEndpoint::new().with_responder(self.responder())
    }

    pub fn responder(self) -> Responder {
        let mut rng = StdRng::seed_from_u64(self.seed);
        Box::new(move |command: &[u8]| {
            let text = String::from_utf8_lossy(command);
            let mut body = String::new();
            for line in text.lines() {
                for (x, y) in self.trace(line.trim(), &mut rng) {
                    body.push_str(&format!("{x},{y:.6}\n"));
                }
            }
            if body.is_empty() && text.trim().is_empty() {
                return Vec::new();
            }
            body.push_str("done\n");
            chunk(body.into_bytes(), &mut rng)
        })
    }

    /// Points for one command line; unknown or malformed commands produce none.
    pub fn trace(&self, command: &str, rng: &mut impl Rng) -> Vec<(f64, f64)> {
        let fields: Vec<&str> = command.split(',').map(str::trim).collect();
        match fields.as_slice() {
            ["CV", min, max, _rate, cycles] => {
                let (Ok(min), Ok(max), Ok(cycles)) =
                    (min.parse::<f64>(), max.parse::<f64>(), cycles.parse::<u32>())
                else {
                    return Vec::new();
                };
                self.cv(min, max, cycles, rng)
            }
            ["CA", voltage, time, unit] => {
                let (Ok(voltage), Ok(time)) = (voltage.parse::<f64>(), time.parse::<f64>()) else {
                    return Vec::new();
                };
                let seconds = if *unit == "min" { time * 60.0 } else { time };
                self.ca(voltage, seconds, rng)
            }
            _ => Vec::new(),
        }
    }

    fn cv(&self, min: f64, max: f64, cycles: u32, rng: &mut impl Rng) -> Vec<(f64, f64)> {
        let steps = (((max - min) * CV_STEPS_PER_VOLT).round() as usize).max(1);
        let mid = 0.5 * (min + max);
        let mut points = Vec::with_capacity(2 * steps * cycles as usize);
        let mut index = 0.0;
        for _ in 0..cycles {
            // forward sweep shows the oxidation peak, reverse sweep the reduction peak
            for (dir, peak) in [(1.0, 1.0), (-1.0, -0.8)] {
                for k in 0..steps {
                    let frac = k as f64 / steps as f64;
                    let v = if dir > 0.0 { min + frac * (max - min) } else { max - frac * (max - min) };
                    let shift = 0.05 * dir;
                    let current = peak * (-((v - mid - shift) / 0.08).powi(2)).exp() + 0.3 * (v - mid);
                    points.push((index, current + self.noise * rng.gen_range(-1.0..1.0)));
                    index += 1.0;
                }
            }
        }
        points
    }

    fn ca(&self, voltage: f64, seconds: f64, rng: &mut impl Rng) -> Vec<(f64, f64)> {
        let count = (seconds * CA_SAMPLES_PER_SECOND).round().max(1.0) as usize;
        (1..=count)
            .map(|i| {
                let t = i as f64 / CA_SAMPLES_PER_SECOND;
                // Cottrell decay scaled by the step potential
                let current = voltage / t.sqrt();
                (t, current + self.noise * rng.gen_range(-1.0..1.0))
            })
            .collect()
    }
}

fn chunk(bytes: Vec<u8>, rng: &mut impl Rng) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut rest = bytes.as_slice();
    while !rest.is_empty() {
        let take = rng.gen_range(1..=MAX_CHUNK).min(rest.len());
        let (head, tail) = rest.split_at(take);
        chunks.push(head.to_vec());
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{Endpoint, FrameDecoder};

    fn drain(endpoint: &mut ManualEndpoint) -> Vec<String> {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = [0u8; 64];
        let mut lines = Vec::new();
        while let Ok(n) = endpoint.read(&mut buf) {
            lines.extend(decoder.feed(&buf[..n]).unwrap().into_iter().map(|r| r.into_string()));
            if lines.last().map(String::as_str) == Some("done") {
                break;
            }
        }
        lines
    }

    #[test]
    fn cv_run_sweeps_every_cycle() {
        let mut endpoint = SimulatedInstrument::default().endpoint();
        endpoint.write(b"CV,-0.5,0.5,50,2\n").unwrap();
        let lines = drain(&mut endpoint);
        assert_eq!(lines.last().unwrap(), "done");
        // 200 steps per direction, two directions, two cycles
        assert_eq!(lines.len() - 1, 800);
        assert!(lines[..lines.len() - 1]
            .iter()
            .all(|l| crate::drivers::Record::new(l.as_str()).parse_sample().is_ok()));
    }

    #[test]
    fn ca_run_length_follows_duration() {
        let mut endpoint = SimulatedInstrument::default().endpoint();
        endpoint.write(b"CA,0.2,1,min\n").unwrap();
        let lines = drain(&mut endpoint);
        assert_eq!(lines.len() - 1, 600);
    }

    #[test]
    fn unknown_command_still_terminates() {
        let mut endpoint = SimulatedInstrument::default().endpoint();
        endpoint.write(b"XX\n").unwrap();
        assert_eq!(drain(&mut endpoint), ["done"]);
    }

    #[test]
    fn same_seed_same_trace() {
        let sim = SimulatedInstrument::default();
        let mut a = StdRng::seed_from_u64(1);
        let mut b = StdRng::seed_from_u64(1);
        assert_eq!(sim.trace("CA,0.1,5,sec", &mut a), sim.trace("CA,0.1,5,sec", &mut b));
    }
}
