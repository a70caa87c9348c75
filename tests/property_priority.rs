//! Property tests for priority clamping and FIFO order preservation.

mod common;

use common::init_test_logging;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use taskband::{priority, Band, QueuedExecutor};

fn arb_priority() -> impl Strategy<Value = u8> {
    any::<u8>()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Clamping is total and lands on a canonical level.
    #[test]
    fn clamp_is_total(p in arb_priority()) {
        init_test_logging();
        let band = Band::for_level(p);
        prop_assert!(Band::ALL.contains(&band));
        let level = band.level();
        prop_assert!(
            level == priority::LOW || level == priority::NORMAL || level == priority::HIGH
        );
    }

    /// Clamping is idempotent: a canonical level maps to its own band.
    #[test]
    fn clamp_is_idempotent(p in arb_priority()) {
        init_test_logging();
        let band = Band::for_level(p);
        prop_assert_eq!(Band::for_level(band.level()), band);
    }

    /// Clamping is monotone in the priority.
    #[test]
    fn clamp_is_monotone(a in arb_priority(), b in arb_priority()) {
        init_test_logging();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(Band::for_level(low) <= Band::for_level(high));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Start order equals submission order within one executor, for
    /// arbitrary batch sizes.
    #[test]
    fn fifo_order_is_preserved(count in 1_usize..=16) {
        init_test_logging();
        let executor = QueuedExecutor::create("fifo-prop", priority::NORMAL);
        let order = Arc::new(Mutex::new(Vec::new()));

        for index in 0..count {
            let order = Arc::clone(&order);
            let _ = executor
                .create_action(move || order.lock().expect("order poisoned").push(index))
                .submit();
        }
        executor.wait_for_all();

        let observed = order.lock().expect("order poisoned").clone();
        prop_assert_eq!(observed, (0..count).collect::<Vec<_>>());
        prop_assert!(executor.shut_down(true));
    }
}
