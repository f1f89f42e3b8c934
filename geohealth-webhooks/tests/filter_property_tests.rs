//! Property-Based Tests for Subscription Filters
//!
//! **List filters**: a scope carrying a state outside a non-empty
//! `state_fips` list never matches; a scope without a state is never
//! rejected by the state list.
//!
//! **Thresholds**: thresholds never affect `data.updated` events.
//!
//! **Signatures**: every signed body verifies with its own secret and fails
//! with any other.

use geohealth_test_utils::generators::{arb_event_type, arb_filters, arb_scope, arb_state_fips};
use geohealth_webhooks::{signature_header, verify_signature, EventScope, EventType, SubscriptionFilters};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_state_outside_list_never_matches(
        allowed in prop::collection::vec(arb_state_fips(), 1..5),
        state in arb_state_fips(),
        event in arb_event_type(),
    ) {
        let filters = SubscriptionFilters::states(allowed.clone());
        let scope = EventScope::state(state.clone());
        prop_assert_eq!(filters.matches(event, &scope), allowed.contains(&state));
    }

    #[test]
    fn prop_missing_state_passes_state_list(
        allowed in prop::collection::vec(arb_state_fips(), 1..5),
    ) {
        let filters = SubscriptionFilters::states(allowed);
        prop_assert!(filters.matches(EventType::DataUpdated, &EventScope::default()));
    }

    #[test]
    fn prop_thresholds_ignored_for_data_updates(mut filters in arb_filters(), scope in arb_scope()) {
        let with_thresholds = filters.matches(EventType::DataUpdated, &scope);
        filters.thresholds.clear();
        prop_assert_eq!(with_thresholds, filters.matches(EventType::DataUpdated, &scope));
    }

    #[test]
    fn prop_signature_verifies_only_with_its_secret(
        body in prop::collection::vec(any::<u8>(), 0..512),
        secret in "[A-Za-z0-9_]{1,64}",
        other in "[A-Za-z0-9_]{1,64}",
    ) {
        let header = signature_header(&body, &secret).unwrap();
        prop_assert!(verify_signature(&body, &secret, &header));
        if other != secret {
            prop_assert!(!verify_signature(&body, &other, &header));
        }
    }
}
