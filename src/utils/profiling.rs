use std::time::Duration;

/// Per-step timing and counter snapshot, filled in by the update pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepProfile {
    pub broad_phase_time: Duration,
    pub narrow_phase_time: Duration,
    pub solver_time: Duration,
    pub integrate_time: Duration,
    pub ccd_time: Duration,
    pub total_step_time: Duration,

    pub body_count: usize,
    pub active_body_count: usize,
    pub body_pair_count: usize,
    pub contact_constraint_count: usize,
    pub island_count: usize,
    pub ccd_body_count: usize,
}

impl StepProfile {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) {
        let total_us = self.total_step_time.as_micros() as f32;
        if total_us < 1.0 {
            return;
        }

        let pct = |d: Duration| (d.as_micros() as f32 / total_us) * 100.0;
        log::debug!(
            "step {:.2} ms | bodies {} (active {}) pairs {} contacts {} islands {} ccd {}",
            self.total_step_time.as_secs_f32() * 1000.0,
            self.body_count,
            self.active_body_count,
            self.body_pair_count,
            self.contact_constraint_count,
            self.island_count,
            self.ccd_body_count,
        );
        log::debug!(
            "  broad {:.1}% narrow {:.1}% solve {:.1}% integrate {:.1}% ccd {:.1}%",
            pct(self.broad_phase_time),
            pct(self.narrow_phase_time),
            pct(self.solver_time),
            pct(self.integrate_time),
            pct(self.ccd_time),
        );
    }
}
