//! FSM unit tests

use pushdeploy::deploy::fsm::{can_transition, DeploymentEvent, DeploymentFsm};
use pushdeploy::models::deploy::DeployStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeployStatus::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.history(), &[DeployStatus::Pending]);
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Pending -> Running
    assert_eq!(fsm.process(DeploymentEvent::Start).unwrap(), DeployStatus::Running);

    // Running -> Success
    assert_eq!(fsm.process(DeploymentEvent::Complete).unwrap(), DeployStatus::Success);
    assert!(fsm.state().is_terminal());
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Fail("exit status: 1".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeployStatus::Failed);
    assert_eq!(fsm.error(), Some("exit status: 1"));
    assert_eq!(
        fsm.history(),
        &[DeployStatus::Pending, DeployStatus::Running, DeployStatus::Failed]
    );
}

#[test]
fn test_fsm_abort_from_pending() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Abort("task panicked".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), DeployStatus::Failed);
    assert_eq!(fsm.history(), &[DeployStatus::Pending, DeployStatus::Failed]);
}

#[test]
fn test_fsm_plain_fail_requires_running() {
    let mut fsm = DeploymentFsm::new();
    assert!(fsm.process(DeploymentEvent::Fail("early".to_string())).is_err());
    assert!(fsm.process(DeploymentEvent::Complete).is_err());
    assert_eq!(fsm.state(), DeployStatus::Pending);
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let events = || {
        vec![
            DeploymentEvent::Start,
            DeploymentEvent::Complete,
            DeploymentEvent::Fail("x".to_string()),
            DeploymentEvent::Abort("x".to_string()),
        ]
    };

    let mut succeeded = DeploymentFsm::new();
    succeeded.process(DeploymentEvent::Start).unwrap();
    succeeded.process(DeploymentEvent::Complete).unwrap();

    let mut failed = DeploymentFsm::new();
    failed.process(DeploymentEvent::Start).unwrap();
    failed.process(DeploymentEvent::Fail("x".to_string())).unwrap();

    for fsm in [&mut succeeded, &mut failed] {
        let before = fsm.state();
        for event in events() {
            assert!(fsm.process(event).is_err());
        }
        assert_eq!(fsm.state(), before);
    }
}

#[test]
fn test_running_never_returns_to_pending() {
    use DeployStatus::*;
    for from in [Running, Success, Failed] {
        assert!(!can_transition(from, Pending), "{} -> pending", from);
    }
    for from in [Success, Failed] {
        for to in [Pending, Running, Success, Failed] {
            assert!(!can_transition(from, to), "{} -> {}", from, to);
        }
    }
}

#[test]
fn test_fsm_agrees_with_can_transition() {
    let mut fsm = DeploymentFsm::new();
    let from = fsm.state();
    let to = fsm.process(DeploymentEvent::Start).unwrap();
    assert!(can_transition(from, to));

    let from = fsm.state();
    let to = fsm.process(DeploymentEvent::Complete).unwrap();
    assert!(can_transition(from, to));
}
