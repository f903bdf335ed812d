// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Classification and precondition behavior of a running engine.

mod common;

use common::{addr, Harness};
use quorate_cluster::{OperationOptions, Session, SessionCommand};
use quorate_core::{
    CallerRole, DenyReason, Error, HealthClassification, InstanceType, MemberStatus,
    RoleRequirement,
};

#[tokio::test]
async fn test_new_cluster_is_ok() {
    let h = Harness::new();
    let (a, _, _) = h.three_node().await;

    let report = h.engine.status(&h.fleet.session(&a), Some("dev")).await.unwrap();
    assert_eq!(report.classification, HealthClassification::Ok);
    assert_eq!(report.members.len(), 3);
    assert!(report.members.iter().all(|m| m.status == MemberStatus::Online));
    assert_eq!(report.epoch, 3);
}

#[tokio::test]
async fn test_minority_loss_then_second_failure() {
    let h = Harness::new();
    let (a, b, c) = h.three_node().await;
    let session = h.fleet.session(&a);

    h.fleet.stop(&b);
    let report = h.engine.status(&session, Some("dev")).await.unwrap();
    assert_eq!(report.classification, HealthClassification::OkPartial);
    assert_eq!(report.member(&b).unwrap().status, MemberStatus::Missing);

    h.fleet.stop(&c);
    let report = h.engine.status(&session, Some("dev")).await.unwrap();
    assert_eq!(report.classification, HealthClassification::NoQuorum);
    assert_eq!(report.member(&b).unwrap().status, MemberStatus::Missing);
    assert_eq!(report.member(&c).unwrap().status, MemberStatus::Unreachable);
}

#[tokio::test]
async fn test_add_instance_denied_without_quorum() {
    let h = Harness::new();
    let (a, b, c) = h.three_node().await;
    let d = addr("db4:3306");
    h.fleet.add_instance(&d);
    h.fleet.stop(&b);
    h.fleet.stop(&c);
    let before = h.stored("dev").await;

    let err = h
        .engine
        .add_instance(&h.fleet.session(&a), Some("dev"), &d, &OperationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::PreconditionDenied { classification: HealthClassification::NoQuorum, .. }
    ));

    let after = h.stored("dev").await;
    assert_eq!(after.epoch, before.epoch);
    assert_eq!(after.declared_total(), 3);
    assert!(h.fleet.instance(&d).unwrap().group.is_none());
}

#[tokio::test]
async fn test_remove_instance_needs_force_without_quorum() {
    let h = Harness::new();
    let (a, b, c) = h.three_node().await;
    let session = h.fleet.session(&a);
    h.fleet.stop(&b);
    h.fleet.stop(&c);

    let err = h
        .engine
        .remove_instance(&session, Some("dev"), &c, &OperationOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.deny_reason(), Some(&DenyReason::ForceRequired));

    let report = h
        .engine
        .remove_instance(&session, Some("dev"), &c, &OperationOptions::new().force(true))
        .await
        .unwrap();
    assert!(report.member(&c).is_none());
    assert_eq!(report.epoch, 4);
    assert!(!h.stored("dev").await.is_declared(&c));
}

#[tokio::test]
async fn test_unreachable_member_cannot_leave_unforced() {
    let h = Harness::new();
    let (a, b, _) = h.three_node().await;
    h.fleet.stop(&b);

    let err = h
        .engine
        .remove_instance(&h.fleet.session(&a), Some("dev"), &b, &OperationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MemberOperationFailed { ref address, .. } if *address == b));
    assert!(h.stored("dev").await.is_declared(&b));
}

#[tokio::test]
async fn test_cannot_remove_session_instance() {
    let h = Harness::new();
    let (a, _, _) = h.three_node().await;

    let err = h
        .engine
        .remove_instance(&h.fleet.session(&a), Some("dev"), &a, &OperationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_reads_denied_when_all_offline() {
    let h = Harness::new();
    let (a, b, c) = h.three_node().await;
    for member in [&a, &b, &c] {
        h.fleet.stop(member);
    }
    h.fleet.start(&a);

    let err = h.engine.status(&h.fleet.session(&a), Some("dev")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::PreconditionDenied { classification: HealthClassification::AllOffline, .. }
    ));
    assert!(h.engine.describe(&h.fleet.session(&a), Some("dev")).await.is_err());
}

#[tokio::test]
async fn test_blind_probe_is_unknown() {
    let h = Harness::new();
    let (a, _, _) = h.three_node().await;
    h.fleet.set_blind(true);

    let err = h.engine.status(&h.fleet.session(&a), Some("dev")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::PreconditionDenied { classification: HealthClassification::Unknown, .. }
    ));

    let report =
        h.engine.check_instance_state(&h.fleet.session(&a), Some("dev"), &a).await.unwrap();
    assert!(report.declared);
}

#[tokio::test]
async fn test_secondary_session_cannot_add() {
    let h = Harness::new();
    let (_, b, _) = h.three_node().await;
    let d = addr("db4:3306");
    h.fleet.add_instance(&d);

    let err = h
        .engine
        .add_instance(&h.fleet.session(&b), Some("dev"), &d, &OperationOptions::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.deny_reason(),
        Some(&DenyReason::Role { required: RoleRequirement::Primary, actual: CallerRole::Secondary })
    );
}

#[tokio::test]
async fn test_rejoin_restores_ok() {
    let h = Harness::new();
    let (a, b, _) = h.three_node().await;
    let session = h.fleet.session(&a);

    h.fleet.stop(&b);
    h.engine.status(&session, Some("dev")).await.unwrap();
    h.fleet.start(&b);

    let report = h.engine.status(&session, Some("dev")).await.unwrap();
    assert_eq!(report.classification, HealthClassification::OkPartial);

    let report = h
        .engine
        .rejoin_instance(&session, Some("dev"), &b, &OperationOptions::new())
        .await
        .unwrap();
    assert_eq!(report.classification, HealthClassification::Ok);
    assert_eq!(report.member(&b).unwrap().status, MemberStatus::Online);

    let err = h
        .engine
        .rejoin_instance(&session, Some("dev"), &b, &OperationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_rescan_records_unmanaged_member() {
    let h = Harness::new();
    let (a, _, _) = h.three_node().await;
    let d = addr("db4:3306");
    h.fleet.add_instance(&d);
    h.fleet.session(&d).execute(SessionCommand::JoinGroup { seed: a.clone() }).await.unwrap();

    let session = h.fleet.session(&a);
    let report = h.engine.status(&session, Some("dev")).await.unwrap();
    assert_eq!(report.classification, HealthClassification::Ok);
    assert!(!report.member(&d).unwrap().declared);

    let rescan = h.engine.rescan(&session, Some("dev")).await.unwrap();
    assert_eq!(rescan.added, vec![d.clone()]);
    assert!(rescan.missing.is_empty());
    assert_eq!(rescan.epoch, 4);

    let described = h.engine.describe(&session, Some("dev")).await.unwrap();
    assert_eq!(described.members.len(), 4);
}

#[tokio::test]
async fn test_check_instance_state() {
    let h = Harness::new();
    let (a, _, c) = h.three_node().await;
    let d = addr("db4:3306");
    h.fleet.add_instance(&d);
    h.fleet.stop(&c);
    let session = h.fleet.session(&a);

    let report = h.engine.check_instance_state(&session, None, &a).await.unwrap();
    assert_eq!(report.instance_type, InstanceType::Cluster);
    assert_eq!(report.status, Some(MemberStatus::Online));

    let report = h.engine.check_instance_state(&session, None, &d).await.unwrap();
    assert_eq!(report.instance_type, InstanceType::Standalone);
    assert!(!report.declared);

    let report = h.engine.check_instance_state(&session, None, &c).await.unwrap();
    assert!(!report.reachable);
    assert_eq!(report.instance_type, InstanceType::Unknown);
}

#[tokio::test]
async fn test_session_errors_come_first() {
    let h = Harness::new();
    let (a, _, _) = h.three_node().await;

    let err = h.engine.status(&h.fleet.unbound_session(), Some("dev")).await.unwrap_err();
    assert!(matches!(err, Error::Session(_)));

    let session = h.fleet.session(&a);
    session.disconnect();
    let err = h
        .engine
        .add_instance(&session, Some("dev"), &a, &OperationOptions::new().force(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Session(_)));
}

#[tokio::test]
async fn test_unaccepted_option_rejected() {
    let h = Harness::new();
    let (a, _, _) = h.three_node().await;
    let d = addr("db4:3306");
    h.fleet.add_instance(&d);

    let err = h
        .engine
        .add_instance(&h.fleet.session(&a), Some("dev"), &d, &OperationOptions::new().force(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOption { ref key, .. } if key == "force"));
}
