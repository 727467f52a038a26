//! Exponentially decaying averages used by the free list census and the promotion LAB sizing.

/// A weighted average where each new sample contributes `weight` percent.  Until enough samples
/// have been seen, the weight is raised so that early samples are not swamped by the initial
/// zero.
#[derive(Clone, Debug, Default)]
pub struct AdaptiveWeightedAverage {
    average: f64,
    sample_count: u32,
    weight: u32,
    last_sample: f64,
}

const OLD_THRESHOLD: u32 = 100;

impl AdaptiveWeightedAverage {
    pub fn new(weight: u32) -> Self {
        Self::with_initial(weight, 0.0)
    }

    pub fn with_initial(weight: u32, average: f64) -> Self {
        debug_assert!(weight <= 100);
        AdaptiveWeightedAverage {
            average,
            sample_count: 0,
            weight,
            last_sample: 0.0,
        }
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn last_sample(&self) -> f64 {
        self.last_sample
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    fn compute_adaptive_average(&mut self, new_sample: f64, average: f64) -> f64 {
        // Use 100 / count as the weight while there are few samples.
        let count_weight = if self.sample_count > 0 {
            100 / self.sample_count
        } else {
            100
        };
        let adaptive_weight = count_weight.max(self.weight);
        exp_avg(average, new_sample, adaptive_weight)
    }

    pub fn sample(&mut self, new_sample: f64) {
        self.increment_count();
        let new_avg = self.compute_adaptive_average(new_sample, self.average);
        self.average = new_avg;
        self.last_sample = new_sample;
    }

    fn increment_count(&mut self) {
        self.sample_count += 1;
        if self.sample_count > OLD_THRESHOLD {
            self.sample_count = OLD_THRESHOLD;
        }
    }
}

/// An [`AdaptiveWeightedAverage`] that also tracks the deviation of the samples.  The padded
/// average is `average + padding * deviation` and is used where overestimating is cheaper than
/// underestimating.
#[derive(Clone, Debug, Default)]
pub struct AdaptivePaddedAverage {
    inner: AdaptiveWeightedAverage,
    padding: u32,
    padded_avg: f64,
    deviation: f64,
}

impl AdaptivePaddedAverage {
    pub fn new(weight: u32, padding: u32) -> Self {
        AdaptivePaddedAverage {
            inner: AdaptiveWeightedAverage::new(weight),
            padding,
            padded_avg: 0.0,
            deviation: 0.0,
        }
    }

    pub fn average(&self) -> f64 {
        self.inner.average()
    }

    pub fn padded_average(&self) -> f64 {
        self.padded_avg
    }

    pub fn deviation(&self) -> f64 {
        self.deviation
    }

    pub fn sample(&mut self, new_sample: f64) {
        self.inner.sample(new_sample);
        let average = self.inner.average();
        let new_deviation = self.inner.compute_adaptive_average(
            (new_sample - average).abs(),
            self.deviation,
        );
        self.deviation = new_deviation;
        self.padded_avg = average + self.padding as f64 * new_deviation;
    }
}

fn exp_avg(avg: f64, sample: f64, weight: u32) -> f64 {
    debug_assert!(weight <= 100);
    (100.0 - weight as f64) * avg / 100.0 + weight as f64 * sample / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_the_average() {
        let mut avg = AdaptiveWeightedAverage::new(25);
        avg.sample(40.0);
        assert_eq!(avg.average(), 40.0);
        assert_eq!(avg.last_sample(), 40.0);
    }

    #[test]
    fn converges_to_constant_input() {
        let mut avg = AdaptiveWeightedAverage::new(75);
        for _ in 0..50 {
            avg.sample(10.0);
        }
        assert!((avg.average() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn padded_average_is_above_average_for_noisy_input() {
        let mut avg = AdaptivePaddedAverage::new(50, 1);
        for i in 0..20 {
            avg.sample(if i % 2 == 0 { 0.0 } else { 100.0 });
        }
        assert!(avg.deviation() > 0.0);
        assert!(avg.padded_average() > avg.average());
    }
}
