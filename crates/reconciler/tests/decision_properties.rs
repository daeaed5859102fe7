//! Property-based tests for the decision engine using proptest.
//!
//! Properties verified:
//! - Ready resources are never re-created directly
//! - Non-ready resources without a backend id are always created
//! - A recorded backend id that exists is adopted, never re-created
//! - Transitions only ever replace a backend id through a successful persist

#![allow(clippy::arithmetic_side_effects)]

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use proptest::prelude::*;
use userop_reconciler::{
    Action, BackendId, ProbeOutcome, ReadyProbePolicy, ResourceState, ResourceStatus, Transition,
    decide, probe_target,
};

fn any_state() -> impl Strategy<Value = ResourceState> {
    prop_oneof![
        Just(ResourceState::Unset),
        Just(ResourceState::Creating),
        Just(ResourceState::Ready),
        Just(ResourceState::Failed),
    ]
}

fn non_ready_state() -> impl Strategy<Value = ResourceState> {
    prop_oneof![
        Just(ResourceState::Unset),
        Just(ResourceState::Creating),
        Just(ResourceState::Failed),
    ]
}

fn any_probe() -> impl Strategy<Value = Option<ProbeOutcome>> {
    prop_oneof![
        Just(None),
        Just(Some(ProbeOutcome::Exists)),
        Just(Some(ProbeOutcome::Absent)),
        Just(Some(ProbeOutcome::Ambiguous)),
    ]
}

fn any_policy() -> impl Strategy<Value = ReadyProbePolicy> {
    prop_oneof![
        Just(ReadyProbePolicy::Never),
        Just(ReadyProbePolicy::EveryPass),
        (1u64..86_400).prop_map(|s| ReadyProbePolicy::Every(Duration::from_secs(s))),
    ]
}

fn any_backend_id() -> impl Strategy<Value = Option<BackendId>> {
    proptest::option::of("[a-z0-9]{1,12}".prop_map(BackendId::new))
}

fn any_transition() -> impl Strategy<Value = Transition> {
    prop_oneof![
        Just(Transition::BeginCreate),
        "[a-z0-9]{1,12}".prop_map(|id| Transition::Persisted(BackendId::new(id))),
        Just(Transition::Adopted),
        Just(Transition::PersistFailed),
        Just(Transition::Verified(Utc::now())),
        Just(Transition::Drifted),
    ]
}

proptest! {
    /// Property: a ready resource never goes straight to create.
    #[test]
    fn prop_ready_never_creates(
        backend_id in any_backend_id(),
        probe in any_probe(),
        policy in any_policy(),
    ) {
        let status = ResourceStatus::new(ResourceState::Ready, backend_id);
        prop_assert!(!decide(&status, probe, policy).creates());
    }

    /// Property: without a recorded id, every non-ready resource is created.
    #[test]
    fn prop_unrecorded_non_ready_creates(
        state in non_ready_state(),
        probe in any_probe(),
        policy in any_policy(),
    ) {
        let status = ResourceStatus::new(state, None);
        prop_assert_eq!(decide(&status, probe, policy), Action::Create);
    }

    /// Property: a recorded id that exists is adopted, never re-created.
    #[test]
    fn prop_existing_record_is_adopted(
        state in non_ready_state(),
        id in "[a-z0-9]{1,12}",
        policy in any_policy(),
    ) {
        let status = ResourceStatus::new(state, Some(BackendId::new(id)));
        prop_assert_eq!(
            decide(&status, Some(ProbeOutcome::Exists), policy),
            Action::Adopt
        );
    }

    /// Property: the engine always asks to probe a recorded id before
    /// deciding on a non-ready resource.
    #[test]
    fn prop_recorded_id_is_probed_when_not_ready(
        state in non_ready_state(),
        id in "[a-z0-9]{1,12}",
        policy in any_policy(),
    ) {
        let status = ResourceStatus::new(state, Some(BackendId::new(id)));
        prop_assert!(probe_target(&status, policy, Utc::now()).is_some());
    }

    /// Property: periodic probing is due exactly when the window has elapsed.
    #[test]
    fn prop_periodic_probe_respects_window(
        window_secs in 1i64..86_400,
        age_secs in 0i64..172_800,
    ) {
        let now = Utc::now();
        let mut status = ResourceStatus::new(ResourceState::Ready, Some(BackendId::new("abc")));
        status.last_verified = Some(now - TimeDelta::seconds(age_secs));
        let policy = ReadyProbePolicy::Every(Duration::from_secs(window_secs.unsigned_abs()));

        let due = probe_target(&status, policy, now).is_some();
        prop_assert_eq!(due, age_secs >= window_secs);
    }

    /// Property: a recorded backend id survives every transition except a
    /// successful persist, which replaces it.
    #[test]
    fn prop_backend_id_only_replaced_by_persist(
        state in any_state(),
        backend_id in any_backend_id(),
        transition in any_transition(),
    ) {
        let status = ResourceStatus::new(state, backend_id.clone());
        let next = status.apply(transition.clone());

        match transition {
            Transition::Persisted(id) => prop_assert_eq!(next.backend_id, Some(id)),
            _ => prop_assert_eq!(next.backend_id, backend_id),
        }
    }

    /// Property: every transition the engine can drive from a decision is
    /// allowed by the state machine.
    #[test]
    fn prop_decided_transitions_are_legal(
        state in any_state(),
        backend_id in any_backend_id(),
        probe in any_probe(),
        policy in any_policy(),
    ) {
        let status = ResourceStatus::new(state, backend_id);
        let next = match decide(&status, probe, policy) {
            Action::NoOp | Action::Verify => None,
            Action::Adopt => Some(status.apply(Transition::Adopted)),
            Action::Drifted => Some(status.apply(Transition::Drifted)),
            Action::Create if state == ResourceState::Creating => {
                Some(status.apply(Transition::Persisted(BackendId::new("new"))))
            }
            Action::Create => Some(status.apply(Transition::BeginCreate)),
        };

        if let Some(next) = next {
            prop_assert!(
                state.can_transition_to(next.state),
                "{} -> {} is not a legal transition",
                state,
                next.state
            );
        }
    }
}
