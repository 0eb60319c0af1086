use tokio::time::Instant;

/// The arm/disarm state machine deciding when an unobserved entry is evicted.
///
/// The state is armed when the entry's observer count drops to zero and
/// disarmed when an observer re-attaches before the deadline. Timer tasks
/// carry the generation they were armed with; a fired timer whose generation
/// no longer matches is a no-op, which is how disarming cancels it.
#[derive(Debug, Default)]
pub(crate) struct GcState {
    generation: u64,
    deadline: Option<Instant>,
}

impl GcState {
    /// Arms the timer, returning the generation the timer task must present
    /// when it fires.
    pub fn arm(&mut self, deadline: Instant) -> u64 {
        self.generation += 1;
        self.deadline = Some(deadline);
        self.generation
    }

    /// Disarms a pending timer. Idempotent.
    pub fn disarm(&mut self) {
        self.generation += 1;
        self.deadline = None;
    }

    /// Whether a timer armed with `generation` is still current.
    pub fn is_armed_with(&self, generation: u64) -> bool {
        self.deadline.is_some() && self.generation == generation
    }

    #[cfg(test)]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_arm_disarm() {
        let mut gc = GcState::default();
        assert_eq!(gc.deadline(), None);

        let deadline = Instant::now() + Duration::from_secs(300);
        let armed = gc.arm(deadline);
        assert!(gc.is_armed_with(armed));
        assert_eq!(gc.deadline(), Some(deadline));

        gc.disarm();
        assert!(!gc.is_armed_with(armed));
        assert_eq!(gc.deadline(), None);
    }

    #[test]
    fn test_rearm_invalidates_old_timer() {
        let mut gc = GcState::default();

        let first = gc.arm(Instant::now() + Duration::from_secs(1));
        gc.disarm();
        let second = gc.arm(Instant::now() + Duration::from_secs(2));

        // the first timer task must not evict anything when it fires
        assert!(!gc.is_armed_with(first));
        assert!(gc.is_armed_with(second));
    }
}
