use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_MBYTE};
use crate::util::log;
use crate::util::Address;

/// The default base address of the simulated old generation.
pub const DEFAULT_HEAP_START: Address = Address::from_usize(0x1000_0000);
/// The default initially committed size of the old generation.
pub const DEFAULT_INITIAL_HEAP_SIZE: usize = 4 * BYTES_IN_MBYTE;
/// The default reserved (maximum) size of the old generation.
pub const DEFAULT_MAX_HEAP_SIZE: usize = 64 * BYTES_IN_MBYTE;

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_percentage(v: &usize) -> bool {
    *v <= 100
}

fn is_positive_fraction(v: &f64) -> bool {
    *v > 0.0 && *v <= 1.0
}

fn default_conc_threads() -> usize {
    if cfg!(feature = "single_worker") {
        1
    } else {
        (num_cpus::get() + 3) / 4
    }
}

fn default_threads() -> usize {
    if cfg!(feature = "single_worker") {
        1
    } else {
        num_cpus::get()
    }
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Runtime options of the collector.  Every option can be overridden by an environment
        /// variable with the `CMS_` prefix, e.g. `CMS_COALESCE_POLICY=4`.
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }
        impl Options {
            /// Set an option by its snake case name.  Returns false (and keeps the old value) if
            /// the value cannot be parsed or is invalid.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            log::warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        log::warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        log::warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Create options from the built-in defaults, ignoring the environment.
            pub fn without_env() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Self::without_env();

                // If we have env vars that start with CMS_ and match any option (such as CMS_COALESCE_POLICY),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "CMS_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    /// Number of GC worker threads for the stop-the-world parallel phases.
    threads:                                  usize   [|v: &usize| *v > 0] = default_threads(),
    /// Number of GC worker threads for the concurrent parallel marking phase.
    conc_threads:                             usize   [|v: &usize| *v > 0] = default_conc_threads(),
    /// The base address of the old generation.
    heap_start:                               Address [|v: &Address| !v.is_zero() && v.is_aligned_to(crate::util::constants::BYTES_IN_CARD)] = DEFAULT_HEAP_START,
    /// Initially committed size of the old generation, in bytes.
    initial_heap_size:                        usize   [|v: &usize| *v > 0] = DEFAULT_INITIAL_HEAP_SIZE,
    /// Reserved size of the old generation, in bytes.  The generation never grows beyond it.
    max_heap_size:                            usize   [|v: &usize| *v > 0] = DEFAULT_MAX_HEAP_SIZE,
    /// Percentage of occupancy that starts a concurrent cycle.  Negative means derived from
    /// `min_heap_free_ratio` and `trigger_ratio`.
    initiating_occupancy_fraction:            isize   [|v: &isize| *v <= 100] = -1,
    /// Only use the occupancy as a criterion for starting a cycle.
    use_initiating_occupancy_only:            bool    [always_valid] = false,
    /// Percentage of `min_heap_free_ratio` allocated before a cycle starts.
    trigger_ratio:                            usize   [is_percentage] = 80,
    /// Minimum percentage of free space after a cycle before the generation expands.
    min_heap_free_ratio:                      usize   [is_percentage] = 40,
    /// Maximum percentage of free space after a cycle before the generation shrinks.
    max_heap_free_ratio:                      usize   [is_percentage] = 70,
    /// Start a cycle if this many milliseconds passed since the last one.  Negative disables it.
    trigger_interval:                         isize   [always_valid] = -1,
    /// Milliseconds the background thread sleeps between trigger checks.
    wait_duration:                            u64     [|v: &u64| *v > 0] = 2000,
    /// Run the precleaning phases.
    precleaning_enabled:                      bool    [always_valid] = true,
    /// Maximum number of precleaning passes.
    preclean_iter:                            usize   [|v: &usize| *v <= 9] = 3,
    /// Precleaning stops when the dirty card count shrinks by less than numerator/denominator.
    preclean_numerator:                       usize   [|v: &usize| *v > 0] = 2,
    /// See `preclean_numerator`.
    preclean_denominator:                     usize   [|v: &usize| *v > 0] = 3,
    /// Precleaning stops when fewer cards than this were dirty.
    preclean_threshold:                       usize   [always_valid] = 1000,
    /// Maximum abortable preclean iterations.  0 means unbounded.
    max_abortable_preclean_loops:             usize   [always_valid] = 0,
    /// Maximum abortable preclean time in milliseconds.
    max_abortable_preclean_time:              u64     [always_valid] = 5000,
    /// Milliseconds abortable preclean sleeps after an iteration with little work.
    abortable_preclean_wait_millis:           u64     [always_valid] = 100,
    /// An abortable preclean iteration with less work than this (in cards) is followed by a sleep.
    abortable_preclean_min_work_per_iteration: usize  [always_valid] = 100,
    /// Abortable precleaning is skipped if the young generation holds fewer bytes than this.
    schedule_remark_eden_size_threshold:      usize   [always_valid] = 2 * BYTES_IN_MBYTE,
    /// Abortable precleaning ends once the young generation is this percentage full.
    schedule_remark_eden_penetration:         usize   [is_percentage] = 50,
    /// Sweep coalescing policy.  0: never, 1: both sides overpopulated, 2: left side
    /// overpopulated, 3: either side overpopulated, 4: always.
    coalesce_policy:                          usize   [|v: &usize| *v <= 4] = 2,
    /// Blocks this close (as a fraction of the address offset) below the largest free chunk are
    /// always coalesced.
    largest_block_coalesce_proximity:         f64     [is_positive_fraction] = 0.99,
    /// Indexed list coalesce surplus factor.
    small_coal_surplus_percent:               f64     [|v: &f64| *v > 0.0] = 1.05,
    /// Indexed list split surplus factor.
    small_split_surplus_percent:              f64     [|v: &f64| *v > 0.0] = 1.10,
    /// Dictionary coalesce surplus factor.
    large_coal_surplus_percent:               f64     [|v: &f64| *v > 0.0] = 0.95,
    /// Dictionary split surplus factor.
    large_split_surplus_percent:              f64     [|v: &f64| *v > 0.0] = 1.00,
    /// An empty indexed list is refilled by carving a chunk this many times its size.
    indexed_free_list_replenish:              usize   [|v: &usize| *v > 0] = 4,
    /// Weight (percent) of the newest sample in the census demand estimate.
    fls_weight:                               usize   [is_percentage] = 75,
    /// Number of deviations padded onto the census demand estimate.
    fls_padding:                              usize   [always_valid] = 1,
    /// Weight (percent) of the newest sample in the sweep timing estimates.
    sweep_weight:                             usize   [is_percentage] = 75,
    /// Include the expected sweep duration when projecting free list demand.
    extrapolate_sweep:                        bool    [always_valid] = false,
    /// Refill size of the small linear allocation block, in words.
    small_lab_refill_words:                   usize   [|v: &usize| *v >= crate::util::constants::SMALL_FOR_LINEAR_ALLOC] = 16 * BYTES_IN_KBYTE,
    /// Refill size of the large linear allocation block, in words.
    large_lab_refill_words:                   usize   [|v: &usize| *v >= crate::util::constants::SMALL_FOR_DICTIONARY] = 8 * BYTES_IN_KBYTE,
    /// Minimum number of blocks a promotion LAB claims per refill.
    old_plab_min:                             usize   [|v: &usize| *v > 0] = 16,
    /// Maximum number of blocks a promotion LAB claims per refill.
    old_plab_max:                             usize   [|v: &usize| *v > 0] = 1024,
    /// Number of promotion LAB refills expected per young collection.
    old_plab_num_refills:                     usize   [|v: &usize| *v > 0] = 4,
    /// Weight (percent) of the newest sample of promotion LAB demand.
    old_plab_weight:                          usize   [is_percentage] = 50,
    /// Resize promotion LABs from observed demand.
    resize_old_plab:                          bool    [always_valid] = true,
    /// Initial capacity of the marking stack, in entries.
    mark_stack_size:                          usize   [|v: &usize| *v > 0] = 32 * BYTES_IN_KBYTE,
    /// Maximum capacity of the marking stack, in entries.
    mark_stack_size_max:                      usize   [|v: &usize| *v > 0] = 4 * BYTES_IN_MBYTE,
    /// Bound of each worker's local task queue.
    work_queue_capacity:                      usize   [|v: &usize| *v > 0] = 1 << 14,
    /// Number of objects a worker takes from the overflow list at once.
    overflow_take_count:                      usize   [|v: &usize| *v > 0] = 20,
    /// Size of a concurrent marking task, in cards.
    marking_task_cards:                       usize   [|v: &usize| *v > 0] = 32,
    /// Size of a remark dirty card rescan task, in cards.
    rescan_task_cards:                        usize   [|v: &usize| *v > 0] = 32,
    /// Scan roots with the worker gang during the initial mark.
    parallel_initial_mark:                    bool    [always_valid] = true,
    /// Rescan with the worker gang during the final remark.
    parallel_remark:                          bool    [always_valid] = true,
    /// Use multiple threads for the concurrent marking phase.
    concurrent_mt:                            bool    [always_valid] = true,
    /// Let the background collector yield to foreground requests during concurrent phases.
    cms_yield:                                bool    [always_valid] = true,
    /// Milliseconds a yielding collector waits for the requester before checking again.
    yield_sleep_millis:                       u64     [|v: &u64| *v > 0] = 1,
    /// Number of words of the mark bitmap cleared between yield checks in the reset phase.
    bitmap_yield_quantum:                     usize   [|v: &usize| *v > 0] = 10 * BYTES_IN_MBYTE,
    /// After the final remark, trace the heap again from the roots and check every reachable
    /// object is marked.
    verify_after_remark:                      bool    [always_valid] = false,
    /// Check the free list structures (single ownership, sizes, stats) around each sweep.
    verify_free_lists:                        bool    [always_valid] = false,
}

impl Options {
    /// Set an option from a camel case name, such as `CoalescePolicy`.
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        log::trace!("Trying to process option pair: ({}, {})", s, val);

        let mut sr = String::with_capacity(s.len());
        for (i, c) in s.chars().enumerate() {
            if c.is_uppercase() {
                if i > 0 {
                    sr.push('_');
                }
                for c in c.to_lowercase() {
                    sr.push(c);
                }
            } else {
                sr.push(c)
            }
        }

        let result = self.set_from_str(sr.as_str(), val);

        if result {
            log::trace!("Validation passed");
        } else {
            log::trace!("Validation failed")
        }
        result
    }

    /// Set options in bulk from a whitespace separated list of `name=value` pairs.  All pairs
    /// are attempted.  Returns true if every pair was applied.
    pub fn set_bulk_from_command_line(&mut self, options: &str) -> bool {
        let mut all_applied = true;
        for opt in options.split_ascii_whitespace() {
            let applied = match opt.split_once('=') {
                Some((key, val)) => self.set_from_str(key, val),
                None => {
                    log::warn!("Malformed option {:?}, expected name=value", opt);
                    false
                }
            };
            all_applied &= applied;
        }
        all_applied
    }

    /// The occupancy fraction (0.0 to 1.0) above which a concurrent cycle is started.
    pub fn initiating_occupancy(&self) -> f64 {
        if self.initiating_occupancy_fraction >= 0 {
            self.initiating_occupancy_fraction as f64 / 100.0
        } else {
            let min_free = self.min_heap_free_ratio as f64;
            ((100.0 - min_free) + min_free * self.trigger_ratio as f64 / 100.0) / 100.0
        }
    }

    /// Validate relations between options that cannot be checked one at a time.
    pub fn check_consistency(&self) {
        assert!(
            self.initial_heap_size <= self.max_heap_size,
            "initial_heap_size ({}) is larger than max_heap_size ({})",
            self.initial_heap_size,
            self.max_heap_size
        );
        assert!(
            self.min_heap_free_ratio <= self.max_heap_free_ratio,
            "min_heap_free_ratio ({}) is larger than max_heap_free_ratio ({})",
            self.min_heap_free_ratio,
            self.max_heap_free_ratio
        );
        assert!(
            self.mark_stack_size <= self.mark_stack_size_max,
            "mark_stack_size ({}) is larger than mark_stack_size_max ({})",
            self.mark_stack_size,
            self.mark_stack_size_max
        );
        assert!(
            self.old_plab_min <= self.old_plab_max,
            "old_plab_min ({}) is larger than old_plab_max ({})",
            self.old_plab_min,
            self.old_plab_max
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert_eq!(options.coalesce_policy, 2);
            assert_eq!(options.indexed_free_list_replenish, 4);
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("CMS_COALESCE_POLICY", "4");
                    std::env::set_var("CMS_VERIFY_AFTER_REMARK", "true");

                    let options = Options::default();
                    assert_eq!(options.coalesce_policy, 4);
                    assert!(options.verify_after_remark);
                },
                || {
                    std::env::remove_var("CMS_COALESCE_POLICY");
                    std::env::remove_var("CMS_VERIFY_AFTER_REMARK");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // invalid value, we cannot parse the value, so use the default value
                    std::env::set_var("CMS_COALESCE_POLICY", "abc");
                    // out of range, so use the default value
                    std::env::set_var("CMS_TRIGGER_RATIO", "101");

                    let options = Options::default();
                    assert_eq!(options.coalesce_policy, 2);
                    assert_eq!(options.trigger_ratio, 80);
                },
                || {
                    std::env::remove_var("CMS_COALESCE_POLICY");
                    std::env::remove_var("CMS_TRIGGER_RATIO");
                },
            )
        })
    }

    #[test]
    fn camelcase_and_bulk() {
        let mut options = Options::without_env();
        assert!(options.set_from_camelcase_str("CoalescePolicy", "0"));
        assert_eq!(options.coalesce_policy, 0);
        assert!(options.set_bulk_from_command_line("threads=3 preclean_iter=1"));
        assert_eq!(options.threads, 3);
        assert_eq!(options.preclean_iter, 1);
        assert!(!options.set_bulk_from_command_line("threads=0 bogus"));
        assert_eq!(options.threads, 3);
    }

    #[test]
    fn derived_initiating_occupancy() {
        let mut options = Options::without_env();
        // (60 + 40 * 0.8) / 100
        assert!((options.initiating_occupancy() - 0.92).abs() < 1e-9);
        assert!(options.set_from_str("initiating_occupancy_fraction", "70"));
        assert!((options.initiating_occupancy() - 0.70).abs() < 1e-9);
    }

    #[test]
    fn heap_start_parses_hex() {
        let mut options = Options::without_env();
        assert!(options.set_from_str("heap_start", "0x2000_0000".replace('_', "").as_str()));
        assert_eq!(options.heap_start, Address::from_usize(0x2000_0000));
        assert!(!options.set_from_str("heap_start", "0x123"));
    }
}
