//! Synthetic flow source for the detection stream
//!
//! Each tick draws a random flow record, scores it through the dispatcher and
//! wraps the result into a `DetectionEvent`. Most flows are quiet; a minority
//! carry a DoS, port-scan or brute-force signature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{DetectionEvent, NormalizedSample};
use super::assembler;
use super::dispatcher::{DispatchError, Dispatcher};
use super::multiplexer::EventSource;

pub struct SyntheticFlowSource {
    dispatcher: Arc<Dispatcher>,
    rng: Mutex<StdRng>,
    sequence: AtomicU64,
}

impl SyntheticFlowSource {
    pub fn new(dispatcher: Arc<Dispatcher>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            dispatcher,
            rng: Mutex::new(rng),
            sequence: AtomicU64::new(1),
        }
    }

    /// Draw the next random flow
    pub fn next_flow(&self) -> NormalizedSample {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut rng = self.rng.lock();

        let mut pps = rng.gen_range(10.0..2_000.0_f64);
        let mut ports = rng.gen_range(1.0..8.0_f64).floor();
        let mut logins = rng.gen_range(0.0..3.0_f64).floor();

        // roughly one flow in three is hostile
        match rng.gen_range(0..9) {
            0 => pps = rng.gen_range(8_000.0..200_000.0_f64),
            1 => ports = rng.gen_range(40.0..1_000.0_f64).floor(),
            2 => logins = rng.gen_range(8.0..120.0_f64).floor(),
            _ => {}
        }

        NormalizedSample::new(format!("pkt_{}", n))
            .with("src_ip", format!("10.0.0.{}", rng.gen_range(1..255_u8)).as_str())
            .with("dst_ip", format!("10.0.1.{}", rng.gen_range(1..255_u8)).as_str())
            .with("flow_duration", rng.gen_range(0.01..30.0_f64))
            .with("flow_packets_per_sec", pps)
            .with("flow_bytes_per_sec", pps * rng.gen_range(60.0..1_500.0_f64))
            .with("distinct_dst_ports", ports)
            .with("failed_logins", logins)
    }
}

impl EventSource for SyntheticFlowSource {
    async fn next_event(&self) -> Result<DetectionEvent, DispatchError> {
        let flow = self.next_flow();
        let prediction = self.dispatcher.dispatch(&flow).await?;
        Ok(assembler::detection_event(prediction, &flow))
    }
}
