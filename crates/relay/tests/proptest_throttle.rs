use proptest::prelude::*;
use relay::{AnnounceState, AnnouncementThrottle};

const START: i64 = 1_705_312_800;

proptest! {
    /// Feeding any sequence of (level, time) offers through the throttle never
    /// admits a level twice and never admits two within the cooldown.
    #[test]
    fn admitted_levels_strictly_increase_and_are_spaced(
        offers in prop::collection::vec((1u8..=4, 0i64..120), 1..40),
        cooldown in 0i64..60,
    ) {
        let throttle = AnnouncementThrottle::new(cooldown);
        let mut state = AnnounceState::default();
        let mut now = START;
        let mut admitted: Vec<(u8, i64)> = Vec::new();

        for (level, step) in offers {
            now += step;
            if throttle.admits(state, level, now) {
                admitted.push((level, now));
                state = state.after(level, now);
            }
        }

        for pair in admitted.windows(2) {
            prop_assert!(pair[1].0 > pair[0].0);
            prop_assert!(pair[1].1 - pair[0].1 >= cooldown);
        }
    }

    /// Replaying the same transition inside the cooldown yields one event at most.
    #[test]
    fn replay_within_cooldown_is_idempotent(
        level in 1u8..=4,
        cooldown in 1i64..600,
        delay in 0i64..600,
    ) {
        let throttle = AnnouncementThrottle::new(cooldown);
        let first = throttle.admits(AnnounceState::default(), level, START);
        prop_assert!(first);
        let state = AnnounceState::default().after(level, START);
        prop_assert!(!throttle.admits(state, level, START + delay));
        prop_assert!(!throttle.admits_closing(state, level));
    }
}
