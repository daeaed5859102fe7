//! Decision engine: pure mapping from observed status to the next action.
//!
//! The engine never performs I/O. When a recorded backend id has to be
//! checked, [`probe_target`] names it, the caller probes the backend and
//! feeds the [`ProbeOutcome`] back into [`decide`].
//!
//! | state     | backend id | probe               | action    |
//! |-----------|------------|---------------------|-----------|
//! | READY     | any        | not probed          | `NoOp`    |
//! | READY     | set        | exists              | `Verify` or `NoOp` |
//! | READY     | set        | absent              | `Drifted` |
//! | READY     | set        | ambiguous           | `NoOp`    |
//! | non-READY | set        | exists              | `Adopt`   |
//! | non-READY | set        | absent or ambiguous | `Create`  |
//! | non-READY | unset      | n/a                 | `Create`  |

use chrono::{DateTime, TimeDelta, Utc};
use crate::config::ReadyProbePolicy;
use crate::types::{BackendId, ResourceState, ResourceStatus};

/// Result of checking whether a backend record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeOutcome {
    /// The record exists.
    Exists,
    /// The backend answered that the record does not exist.
    Absent,
    /// The probe itself failed.
    Ambiguous,
}

/// What the loop should do for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Nothing to do; come back after the idle interval.
    NoOp,
    /// A recorded backend id exists; mark the resource ready without creating.
    Adopt,
    /// Persist a new backend record.
    Create,
    /// Ready and confirmed; record the verification time.
    Verify,
    /// Ready but the backend record vanished; restart creation.
    Drifted,
}

impl Action {
    /// Whether this action calls the persistence gateway's create.
    #[must_use]
    pub const fn creates(self) -> bool {
        matches!(self, Self::Create)
    }
}

/// A status change the loop can apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Mark the intent to create before calling the backend.
    BeginCreate,
    /// The backend created a record with this id.
    Persisted(BackendId),
    /// A previously recorded backend id was confirmed.
    Adopted,
    /// The backend rejected or failed the create.
    PersistFailed,
    /// The backend record was confirmed at this instant.
    Verified(DateTime<Utc>),
    /// The backend record of a ready resource vanished.
    Drifted,
}

impl ResourceStatus {
    /// Apply a transition, producing the next status.
    ///
    /// A recorded backend id is only ever replaced by [`Transition::Persisted`].
    #[must_use]
    pub fn apply(&self, transition: Transition) -> Self {
        let backend_id = self.backend_id.clone();
        match transition {
            Transition::BeginCreate | Transition::Drifted => Self {
                state: ResourceState::Creating,
                backend_id,
                last_verified: None,
            },
            Transition::Persisted(id) => Self {
                state: ResourceState::Ready,
                backend_id: Some(id),
                last_verified: None,
            },
            Transition::Adopted => Self {
                state: ResourceState::Ready,
                backend_id,
                last_verified: self.last_verified,
            },
            Transition::PersistFailed => Self {
                state: ResourceState::Failed,
                backend_id,
                last_verified: None,
            },
            Transition::Verified(at) => Self {
                state: self.state,
                backend_id,
                last_verified: Some(at),
            },
        }
    }
}

/// Backend id that must be probed before deciding, if any.
///
/// Non-ready resources with a recorded id are always probed. Ready resources
/// are probed according to `policy`.
#[must_use]
pub fn probe_target(
    status: &ResourceStatus,
    policy: ReadyProbePolicy,
    now: DateTime<Utc>,
) -> Option<&BackendId> {
    let id = status.backend_id.as_ref()?;
    if !status.is_ready() {
        return Some(id);
    }
    match policy {
        ReadyProbePolicy::Never => None,
        ReadyProbePolicy::EveryPass => Some(id),
        ReadyProbePolicy::Every(interval) => {
            let due = status.last_verified.is_none_or(|at| {
                TimeDelta::from_std(interval)
                    .is_ok_and(|window| now.signed_duration_since(at) >= window)
            });
            due.then_some(id)
        }
    }
}

/// Decide the next action.
///
/// A non-ready resource with a recorded id and no probe result is treated
/// like an ambiguous probe.
#[must_use]
pub fn decide(
    status: &ResourceStatus,
    probe: Option<ProbeOutcome>,
    policy: ReadyProbePolicy,
) -> Action {
    if status.is_ready() {
        return match probe {
            None | Some(ProbeOutcome::Ambiguous) => Action::NoOp,
            Some(ProbeOutcome::Absent) => Action::Drifted,
            Some(ProbeOutcome::Exists) => match policy {
                ReadyProbePolicy::Every(_) => Action::Verify,
                ReadyProbePolicy::Never | ReadyProbePolicy::EveryPass => Action::NoOp,
            },
        };
    }

    match (status.backend_id.as_ref(), probe) {
        (Some(_), Some(ProbeOutcome::Exists)) => Action::Adopt,
        // unset, failed, or an interrupted create
        _ => Action::Create,
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn status(state: ResourceState, id: Option<&str>) -> ResourceStatus {
        ResourceStatus::new(state, id.map(BackendId::from))
    }

    #[test]
    fn ready_without_probe_is_noop() {
        let s = status(ResourceState::Ready, Some("abc"));
        assert_eq!(decide(&s, None, ReadyProbePolicy::Never), Action::NoOp);
    }

    #[test]
    fn ready_never_probes_by_default() {
        let s = status(ResourceState::Ready, Some("abc"));
        assert_eq!(probe_target(&s, ReadyProbePolicy::Never, Utc::now()), None);
    }

    #[test]
    fn non_ready_with_id_is_always_probed() {
        for state in [
            ResourceState::Unset,
            ResourceState::Creating,
            ResourceState::Failed,
        ] {
            let s = status(state, Some("abc"));
            assert_eq!(
                probe_target(&s, ReadyProbePolicy::Never, Utc::now()),
                Some(&BackendId::from("abc"))
            );
        }
    }

    #[test]
    fn nothing_to_probe_without_id() {
        let s = status(ResourceState::Creating, None);
        assert_eq!(probe_target(&s, ReadyProbePolicy::EveryPass, Utc::now()), None);
    }

    #[test]
    fn existing_record_is_adopted() {
        let s = status(ResourceState::Creating, Some("abc"));
        assert_eq!(
            decide(&s, Some(ProbeOutcome::Exists), ReadyProbePolicy::Never),
            Action::Adopt
        );
    }

    #[test]
    fn absent_or_ambiguous_record_is_created() {
        let s = status(ResourceState::Failed, Some("abc"));
        for probe in [ProbeOutcome::Absent, ProbeOutcome::Ambiguous] {
            assert_eq!(
                decide(&s, Some(probe), ReadyProbePolicy::Never),
                Action::Create
            );
        }
    }

    #[test]
    fn fresh_and_interrupted_resources_are_created() {
        for state in [
            ResourceState::Unset,
            ResourceState::Creating,
            ResourceState::Failed,
        ] {
            let s = status(state, None);
            assert_eq!(decide(&s, None, ReadyProbePolicy::Never), Action::Create);
        }
    }

    #[test]
    fn ready_drift_is_detected() {
        let s = status(ResourceState::Ready, Some("abc"));
        assert_eq!(
            decide(&s, Some(ProbeOutcome::Absent), ReadyProbePolicy::EveryPass),
            Action::Drifted
        );
        assert_eq!(
            decide(&s, Some(ProbeOutcome::Ambiguous), ReadyProbePolicy::EveryPass),
            Action::NoOp
        );
    }

    #[test]
    fn periodic_policy_verifies_when_due() {
        let now = Utc::now();
        let policy = ReadyProbePolicy::Every(Duration::from_secs(60));
        let mut s = status(ResourceState::Ready, Some("abc"));

        assert!(probe_target(&s, policy, now).is_some(), "never verified");

        s.last_verified = Some(now - TimeDelta::seconds(10));
        assert!(probe_target(&s, policy, now).is_none(), "recently verified");

        s.last_verified = Some(now - TimeDelta::seconds(61));
        assert!(probe_target(&s, policy, now).is_some(), "stale");

        assert_eq!(
            decide(&s, Some(ProbeOutcome::Exists), policy),
            Action::Verify
        );
    }

    #[test]
    fn transitions_follow_state_machine() {
        let unset = ResourceStatus::unset();
        let creating = unset.apply(Transition::BeginCreate);
        assert_eq!(creating.state, ResourceState::Creating);
        assert!(unset.state.can_transition_to(creating.state));

        let ready = creating.apply(Transition::Persisted(BackendId::from("abc")));
        assert_eq!(ready.state, ResourceState::Ready);
        assert_eq!(ready.backend_id, Some(BackendId::from("abc")));

        let failed = creating.apply(Transition::PersistFailed);
        assert_eq!(failed.state, ResourceState::Failed);
        assert!(creating.state.can_transition_to(failed.state));

        let drifted = ready.apply(Transition::Drifted);
        assert_eq!(drifted.state, ResourceState::Creating);
        assert_eq!(drifted.backend_id, ready.backend_id);
    }

    #[test]
    fn verified_keeps_state_and_records_time() {
        let now = Utc::now();
        let ready = status(ResourceState::Ready, Some("abc"));
        let verified = ready.apply(Transition::Verified(now));
        assert_eq!(verified.state, ResourceState::Ready);
        assert_eq!(verified.last_verified, Some(now));
    }
}
