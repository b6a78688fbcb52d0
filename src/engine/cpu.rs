//! CPU churn worker.

use std::hint::black_box;
use std::ops::ControlFlow;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::WorkerContext;
use crate::schedule::ScheduleSpec;

const VECTOR_SIZE: usize = 64;

/// Churn iterations per scheduler step; keeps the cancellation check off the
/// hot path.
const ROUNDS_PER_STEP: usize = 4096;

/// Small integer state mixed in place to keep one core busy.
pub struct Churn {
    vector: [u32; VECTOR_SIZE],
    index: usize,
}

impl Churn {
    pub fn seeded(rng: &mut impl Rng) -> Self {
        let mut vector = [0u32; VECTOR_SIZE];
        rng.fill(&mut vector[..]);
        Self { vector, index: 0 }
    }

    /// Run `rounds` mixing rounds over neighbouring elements.
    pub fn spin(&mut self, rounds: usize) {
        for _ in 0..rounds {
            let i1 = self.index % VECTOR_SIZE;
            let i2 = (self.index + 1) % VECTOR_SIZE;
            let v = (self.vector[i1] ^ self.vector[i2]).wrapping_mul(17) | self.vector[i2];
            self.vector[i1] = black_box(v);
            self.index = self.index.wrapping_add(1);
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Worker body: seed under the init gate, then churn through the schedule.
pub fn run(id: usize, schedule: ScheduleSpec, ctx: WorkerContext) {
    let mut churn = ctx.init.run(|| Churn::seeded(&mut StdRng::from_entropy()));

    info!(worker = id, %schedule, "cpu worker started");
    schedule.run(&ctx.shutdown, || {
        churn.spin(ROUNDS_PER_STEP);
        ControlFlow::Continue(())
    });
    info!(worker = id, rounds = churn.index(), "cpu worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_spin_advances_and_mixes() {
        let mut churn = Churn::seeded(&mut StdRng::seed_from_u64(7));
        let before = churn.vector;
        churn.spin(1000);
        assert_eq!(churn.index(), 1000);
        assert_ne!(churn.vector, before);
    }

    #[test]
    fn test_worker_stops_on_shutdown() {
        let ctx = WorkerContext::new(true, Shutdown::new());
        let shutdown = ctx.shutdown.clone();
        let worker = thread::spawn(move || run(0, ScheduleSpec::CONTINUOUS, ctx));

        thread::sleep(Duration::from_millis(100));
        shutdown.cancel();
        worker.join().unwrap();
    }
}
