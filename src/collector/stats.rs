//! Per-cycle timing and counters of the collector.

use std::time::{Duration, Instant};

use enum_map::EnumMap;

use super::{CollectorState, GcCause};
use crate::policy::cms_space::sweep::SweepStats;
use crate::util::averages::AdaptiveWeightedAverage;

const CYCLE_AVERAGE_WEIGHT: u32 = 25;
const PROMOTION_AVERAGE_WEIGHT: u32 = 25;

#[derive(Debug)]
pub struct CollectorStats {
    /// Total time spent in each state, over all cycles.
    pub phase_times: EnumMap<CollectorState, Duration>,
    pub background_cycles: usize,
    pub foreground_cycles: usize,
    /// Background cycles finished by a foreground collection.
    pub preempted_cycles: usize,
    pub yields: usize,
    pub mark_stack_overflows: usize,
    pub last_sweep: SweepStats,
    pub last_cause: Option<GcCause>,
    current_cycle: Vec<CollectorState>,
    last_cycle: Vec<CollectorState>,
    pauses: Vec<Duration>,
    /// Seconds from the start of a cycle to its end.
    cycle_time: AdaptiveWeightedAverage,
    /// Bytes per second promoted into the old generation.
    promotion_rate: AdaptiveWeightedAverage,
    cycle_start: Option<Instant>,
    last_cycle_end: Option<Instant>,
    last_promotion_sample: Instant,
    phase_start: Instant,
    phase: CollectorState,
}

impl CollectorStats {
    pub fn new() -> Self {
        let now = Instant::now();
        CollectorStats {
            phase_times: EnumMap::default(),
            background_cycles: 0,
            foreground_cycles: 0,
            preempted_cycles: 0,
            yields: 0,
            mark_stack_overflows: 0,
            last_sweep: SweepStats::default(),
            last_cause: None,
            current_cycle: vec![],
            last_cycle: vec![],
            pauses: vec![],
            cycle_time: AdaptiveWeightedAverage::new(CYCLE_AVERAGE_WEIGHT),
            promotion_rate: AdaptiveWeightedAverage::new(PROMOTION_AVERAGE_WEIGHT),
            cycle_start: None,
            last_cycle_end: None,
            last_promotion_sample: now,
            phase_start: now,
            phase: CollectorState::Idling,
        }
    }

    pub fn begin_cycle(&mut self, cause: GcCause) {
        self.last_cause = Some(cause);
        self.cycle_start = Some(Instant::now());
        self.pauses.clear();
        self.current_cycle.clear();
    }

    /// Called on every state change.  Entering `Idling` closes the cycle.
    pub fn record_state(&mut self, state: CollectorState) {
        let now = Instant::now();
        self.phase_times[self.phase] += now - self.phase_start;
        self.phase = state;
        self.phase_start = now;
        self.current_cycle.push(state);
        if state == CollectorState::Idling {
            if let Some(start) = self.cycle_start.take() {
                self.cycle_time.sample((now - start).as_secs_f64());
            }
            self.last_cycle_end = Some(now);
            self.last_cycle = std::mem::take(&mut self.current_cycle);
        }
    }

    pub fn record_pause(&mut self, pause: Duration) {
        self.pauses.push(pause);
    }

    /// Sample the promotion rate with `bytes` promoted since the previous sample.
    pub fn record_promotion(&mut self, bytes: usize) {
        let now = Instant::now();
        let secs = (now - self.last_promotion_sample).as_secs_f64();
        if secs > 0.0 {
            self.promotion_rate.sample(bytes as f64 / secs);
        }
        self.last_promotion_sample = now;
    }

    /// The states entered by the last finished cycle, ending with `Idling`.
    pub fn last_cycle_states(&self) -> &[CollectorState] {
        &self.last_cycle
    }

    pub fn pauses(&self) -> &[Duration] {
        &self.pauses
    }

    /// The average length of a cycle in seconds, if a cycle has completed.
    pub fn cycle_time_secs(&self) -> Option<f64> {
        self.last_cycle_end.map(|_| self.cycle_time.average())
    }

    pub fn promotion_rate(&self) -> f64 {
        self.promotion_rate.average()
    }

    pub fn since_last_cycle(&self) -> Option<Duration> {
        self.last_cycle_end.map(|end| end.elapsed())
    }

    pub fn cycle_summary(&self) -> String {
        let total_pause: Duration = self.pauses.iter().sum();
        format!(
            "cause {:?}, {} pauses ({:?}), {} objects ({} words) swept, {} live, \
             average cycle {:.3}s",
            self.last_cause,
            self.pauses.len(),
            total_pause,
            self.last_sweep.objects_freed,
            self.last_sweep.words_freed,
            self.last_sweep.objects_live,
            self.cycle_time.average()
        )
    }
}

impl Default for CollectorStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idling_closes_the_cycle() {
        let mut stats = CollectorStats::new();
        stats.begin_cycle(GcCause::Occupancy);
        let mut state = CollectorState::Idling;
        loop {
            state = state.next();
            stats.record_state(state);
            if state == CollectorState::Idling {
                break;
            }
        }
        let states = stats.last_cycle_states();
        assert_eq!(states.first(), Some(&CollectorState::InitialMarking));
        assert_eq!(states.last(), Some(&CollectorState::Idling));
        assert_eq!(states.len(), 9);
        assert!(stats.cycle_time_secs().is_some());
        assert!(stats.since_last_cycle().is_some());
    }
}
