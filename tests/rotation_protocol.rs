//! End-to-end behaviour of the operation API on top of the rotation protocol.

mod common;

use common::{control_plane, gnupg_fields, id_of, named_fields, rotation_fields, SETTLE};
use egressplane::cluster::SettleTarget;
use egressplane::domain::{ConnectionId, SnapshotVersion};
use egressplane::errors::ErrorKind;
use futures::future::join_all;
use serde_json::json;

#[tokio::test]
async fn ftp_connection_lifecycle() {
    let (plane, workers) = control_plane(2).await;

    let created = plane.api.create(&gnupg_fields()).await;
    assert!(created.envelope.is_ok(), "{:?}", created.envelope);
    let id = id_of(&created.envelope.payload);
    assert_eq!(created.envelope.payload.as_ref().unwrap()["name"], "gnupg");

    for expected in 1..=2u64 {
        let rotated =
            plane.api.change_password(&rotation_fields(id, "password_test", "password_test")).await;
        assert!(rotated.envelope.is_ok(), "{:?}", rotated.envelope);
        assert_eq!(rotated.envelope.payload, Some(json!({})));
        let outcome = rotated.outcome.expect("rotation commits");
        assert_eq!(outcome.version.credential_version, expected);
    }

    let deleted = plane.api.delete(&json!({"id": id.get()})).await;
    assert!(deleted.envelope.is_ok());
    let report = plane.coordinator.settle(deleted.outcome.as_ref().unwrap(), SETTLE).await;
    assert!(report.settled);
    for worker in &workers {
        assert!(worker.snapshot(id).await.is_none());
    }

    let read = plane.api.get(&json!({"id": id.get()})).await;
    assert_eq!(read.envelope.error_kind(), Some(ErrorKind::NotFound));

    let again = plane.api.delete(&json!({"id": id.get()})).await;
    assert_eq!(again.envelope.error_kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn read_returns_exactly_the_submitted_attributes() {
    let (plane, _workers) = control_plane(0).await;
    let id = id_of(&plane.api.create(&gnupg_fields()).await.envelope.payload);

    let read = plane.api.get(&json!({"id": id.get()})).await;
    let payload = read.envelope.payload.expect("definition payload");
    for field in ["name", "host", "port", "user", "timeout", "dircache", "is_active", "cluster_id"]
    {
        assert_eq!(payload[field], gnupg_fields()[field], "field {}", field);
    }
    assert_eq!(payload["kind"], "ftp");
    assert_eq!(payload["credential_version"], 0);
    assert!(payload.get("password").is_none());
}

#[tokio::test]
async fn ids_are_unique_and_never_reused() {
    let (plane, _workers) = control_plane(0).await;
    let first = id_of(&plane.api.create(&named_fields("a")).await.envelope.payload);
    let second = id_of(&plane.api.create(&named_fields("b")).await.envelope.payload);
    assert_ne!(first, second);

    assert!(plane.api.delete(&json!({"id": second.get()})).await.envelope.is_ok());
    let third = id_of(&plane.api.create(&named_fields("b")).await.envelope.payload);
    assert!(third > second);
}

#[tokio::test]
async fn mismatched_confirmation_is_rejected_without_rotation() {
    let (plane, _workers) = control_plane(0).await;
    let mut fields = gnupg_fields();
    fields["password"] = json!("initial");
    let id = id_of(&plane.api.create(&fields).await.envelope.payload);

    let rejected = plane.api.change_password(&rotation_fields(id, "password_test", "password_tesT")).await;
    let error = rejected.envelope.error.expect("error body");
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(error.violations.iter().any(|v| v.field == "password2" && v.rule == "must_match"));
    assert!(rejected.outcome.is_none());

    let read = plane.api.get(&json!({"id": id.get()})).await;
    assert_eq!(read.envelope.payload.unwrap()["credential_version"], 1);
}

#[tokio::test]
async fn rotation_of_unknown_id_is_not_found() {
    let (plane, _workers) = control_plane(0).await;
    let response = plane
        .api
        .change_password(&rotation_fields(ConnectionId::new(404), "password_test", "password_test"))
        .await;
    assert_eq!(response.envelope.error_kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn every_violation_is_reported_at_once() {
    let (plane, _workers) = control_plane(0).await;
    let response = plane
        .api
        .create(&json!({
            "cluster_id": 1,
            "name": "",
            "is_active": "yes",
            "host": "ftp.gnupg.dk",
            "port": 70000,
            "user": "anonymous",
            "timeout": 2000
        }))
        .await;

    let error = response.envelope.error.expect("error body");
    let fields: Vec<&str> = error.violations.iter().map(|v| v.field.as_str()).collect();
    for expected in ["name", "is_active", "port", "dircache"] {
        assert!(fields.contains(&expected), "missing violation for {}: {:?}", expected, fields);
    }
}

#[tokio::test]
async fn duplicate_name_and_unknown_cluster_are_rejected() {
    let (plane, _workers) = control_plane(0).await;
    assert!(plane.api.create(&gnupg_fields()).await.envelope.is_ok());

    let duplicate = plane.api.create(&gnupg_fields()).await;
    assert_eq!(duplicate.envelope.error_kind(), Some(ErrorKind::DuplicateOrInvalid));

    let mut elsewhere = gnupg_fields();
    elsewhere["cluster_id"] = json!(99);
    let unknown = plane.api.create(&elsewhere).await;
    assert_eq!(unknown.envelope.error_kind(), Some(ErrorKind::DuplicateOrInvalid));
}

#[tokio::test]
async fn concurrent_rotations_are_serialized() {
    let (plane, workers) = control_plane(1).await;
    let id = id_of(&plane.api.create(&gnupg_fields()).await.envelope.payload);

    let responses = join_all((0..8).map(|n| {
        let api = plane.api.clone();
        let password = format!("password-{}", n);
        async move { api.change_password(&rotation_fields(id, &password, &password)).await }
    }))
    .await;

    let successes = responses.iter().filter(|r| r.envelope.is_ok()).count() as u64;
    assert_eq!(successes, 8);

    let mut versions: Vec<u64> = responses
        .iter()
        .filter_map(|r| r.outcome.as_ref())
        .map(|o| o.version.credential_version)
        .collect();
    versions.sort_unstable();
    assert_eq!(versions, (1..=8).collect::<Vec<_>>());

    let read = plane.api.get(&json!({"id": id.get()})).await;
    assert_eq!(read.envelope.payload.unwrap()["credential_version"], successes);

    let target = SettleTarget::Version(SnapshotVersion::new(1, successes));
    let report = plane.broadcaster.await_settled(id, target, SETTLE).await;
    assert!(report.settled);
    let snapshot = workers[0].snapshot(id).await.expect("worker holds the definition");
    assert_eq!(snapshot.version(), SnapshotVersion::new(1, successes));
}

#[tokio::test]
async fn edit_bumps_revision_and_keeps_the_credential() {
    let (plane, workers) = control_plane(1).await;
    let mut fields = gnupg_fields();
    fields["password"] = json!("password_test");
    let id = id_of(&plane.api.create(&fields).await.envelope.payload);

    let edited = plane.api.edit(&json!({"id": id.get(), "host": "ftp.example.org", "port": 2121})).await;
    assert!(edited.envelope.is_ok(), "{:?}", edited.envelope);
    let outcome = edited.outcome.expect("edit commits");
    assert_eq!(outcome.version, SnapshotVersion::new(2, 1));

    assert!(plane.coordinator.settle(&outcome, SETTLE).await.settled);
    let snapshot = workers[0].snapshot(id).await.expect("worker holds the definition");
    assert_eq!(snapshot.definition.attributes.host, "ftp.example.org");
    assert_eq!(snapshot.definition.attributes.port, 2121);
    assert_eq!(snapshot.secret.as_ref().map(|s| s.expose_secret()), Some("password_test"));

    let empty = plane.api.edit(&json!({"id": id.get()})).await;
    assert_eq!(empty.envelope.error_kind(), Some(ErrorKind::Validation));
}

#[tokio::test]
async fn list_scopes_by_cluster() {
    let (plane, _workers) = control_plane(0).await;
    plane.api.create(&named_fields("one")).await;
    plane.api.create(&named_fields("two")).await;

    let listed = plane.api.list(&json!({"cluster_id": 1})).await;
    let payload = listed.envelope.payload.expect("listing");
    assert_eq!(payload["connections"].as_array().map(Vec::len), Some(2));

    let unknown = plane.api.list(&json!({"cluster_id": 42})).await;
    assert_eq!(unknown.envelope.error_kind(), Some(ErrorKind::NotFound));

    let other = plane.clusters.create_cluster("staging").await.unwrap();
    let empty = plane.api.list(&json!({"cluster_id": other.id.get()})).await;
    assert_eq!(empty.envelope.payload.unwrap()["connections"], json!([]));
}
