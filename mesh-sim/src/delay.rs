// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Message latency.
//!
//! Out-of-order delivery draws every latency from a geometric distribution
//! with success probability `p`, so a message arrives on each tick with
//! probability `p` until it has arrived. In-order delivery takes exactly one
//! tick.

use mesh_config::settings::SimConfig;
use mesh_engine::sim_error;
use mesh_engine::types::SimError;
use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Latency {
    p: f64,
    random: bool,
}

impl Latency {
    pub fn new(config: &SimConfig) -> Result<Self, SimError> {
        let p = config.delay_probability;
        if !(p > 0.0 && p <= 1.0) {
            return sim_error!(format!("delay probability {p} not in (0, 1]"));
        }
        Ok(Self {
            p,
            random: config.deliver_out_of_order,
        })
    }

    /// Ticks until the next message arrives. Never zero.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if !self.random || self.p >= 1.0 {
            return 1;
        }
        // In (0, 1] so the logarithm is finite.
        let u = 1.0 - rng.r#gen::<f64>();
        1 + (u.ln() / (1.0 - self.p).ln()).floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn config(p: f64, random: bool) -> SimConfig {
        SimConfig {
            delay_probability: p,
            deliver_out_of_order: random,
            ..SimConfig::default()
        }
    }

    #[test]
    fn in_order_is_one_tick() {
        let latency = Latency::new(&config(0.1, false)).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!((0..100).all(|_| latency.sample(&mut rng) == 1));
    }

    #[test]
    fn geometric_mean() {
        let latency = Latency::new(&config(0.25, true)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<u64> = (0..20_000).map(|_| latency.sample(&mut rng)).collect();
        assert!(samples.iter().all(|&s| s >= 1));
        let mean = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
        assert!((mean - 4.0).abs() < 0.2, "mean {mean}");
    }

    #[test]
    fn probability_is_checked() {
        assert!(Latency::new(&config(0.0, true)).is_err());
        assert!(Latency::new(&config(1.5, true)).is_err());
        let certain = Latency::new(&config(1.0, true)).unwrap();
        assert_eq!(certain.sample(&mut StdRng::seed_from_u64(1)), 1);
    }
}
