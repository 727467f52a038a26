use bytemuck::NoUninit;
use enum_map::Enum;
use strum_macros::{EnumIter, EnumString, IntoStaticStr};

/// The phase of the concurrent cycle.  The collector moves through the states strictly in
/// declaration order and wraps from `Resetting` back to `Idling`.
#[repr(u8)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, NoUninit, Enum, EnumIter, IntoStaticStr,
)]
pub enum CollectorState {
    Idling,
    /// Stop-the-world: mark the objects directly reachable from the roots.
    InitialMarking,
    /// Concurrent: trace from the marked objects.
    Marking,
    /// Concurrent: rescan cards dirtied while marking.
    Precleaning,
    /// Concurrent: keep precleaning until the remark pause is due.
    AbortablePreclean,
    /// Stop-the-world: the final remark.
    FinalMarking,
    /// Concurrent: return unmarked blocks to the free lists.
    Sweeping,
    /// Grow or shrink the generation.
    Resizing,
    /// Concurrent: clear the mark bit map.
    Resetting,
}

impl CollectorState {
    /// The state after this one in the cycle.
    pub fn next(self) -> CollectorState {
        use CollectorState::*;
        match self {
            Idling => InitialMarking,
            InitialMarking => Marking,
            Marking => Precleaning,
            Precleaning => AbortablePreclean,
            AbortablePreclean => FinalMarking,
            FinalMarking => Sweeping,
            Sweeping => Resizing,
            Resizing => Resetting,
            Resetting => Idling,
        }
    }

    /// Whether blocks allocated in this state must be marked live.  The sweeper and marker may
    /// already have passed the block, and it may not have a header yet.
    pub fn allocation_needs_marking(self) -> bool {
        self >= CollectorState::InitialMarking && self <= CollectorState::Sweeping
    }

    /// Whether stores into promoted objects must be recorded for a later rescan.
    pub fn promotion_needs_rescan(self) -> bool {
        self >= CollectorState::InitialMarking && self < CollectorState::Sweeping
    }

    /// Whether the mod union table is collecting cards for the final remark.
    pub fn is_precleaning_window(self) -> bool {
        self >= CollectorState::Marking && self <= CollectorState::FinalMarking
    }
}

/// Why a collection was started.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumString, IntoStaticStr)]
pub enum GcCause {
    /// The runtime asked for a full collection.
    UserRequested,
    /// The old generation occupancy passed the initiating fraction.
    Occupancy,
    /// The statistics predict the generation fills before a cycle could finish.
    Statistics,
    /// `trigger_interval` elapsed since the last cycle.
    Interval,
    /// The last expansion was needed to satisfy an allocation.
    Expansion,
    /// An allocation failed even after expanding.
    AllocationFailure,
    /// A promotion failed even after expanding.
    PromotionFailure,
}

/// Why the generation last expanded.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit, IntoStaticStr)]
pub enum ExpansionCause {
    NoExpansion,
    SatisfyFreeRatio,
    SatisfyPromotion,
    SatisfyAllocation,
    AllocateParLab,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn cycle_visits_every_state_once() {
        let mut state = CollectorState::Idling;
        let mut seen = vec![];
        loop {
            seen.push(state);
            state = state.next();
            if state == CollectorState::Idling {
                break;
            }
        }
        assert_eq!(seen, CollectorState::iter().collect::<Vec<_>>());
    }

    #[test]
    fn marking_windows() {
        assert!(!CollectorState::Idling.allocation_needs_marking());
        assert!(CollectorState::Sweeping.allocation_needs_marking());
        assert!(!CollectorState::Resizing.allocation_needs_marking());
        assert!(CollectorState::FinalMarking.promotion_needs_rescan());
        assert!(!CollectorState::Sweeping.promotion_needs_rescan());
        assert_eq!(
            "UserRequested".parse::<GcCause>().unwrap(),
            GcCause::UserRequested
        );
    }
}
