//! Integration tests for the mapping session lifecycle

mod common;

use bandmap::{
    Band, BandCatalog, BundleHeader, Extent, MapFlags, MappingSession, NoProgress, Outcome,
    SessionConfig, SessionState, SimulatedProvider, SimulatedPublisher, StructuralError,
    TableError,
};
use common::{band_path, write_bundle, FakeProvider, FakePublisher, ScriptedTermination};
use std::time::Duration;

fn session(
    bands: &[(u64, u64)],
    provider: FakeProvider,
    publisher: FakePublisher,
) -> MappingSession<FakeProvider, FakePublisher> {
    let header = BundleHeader::new(4096, 16384).unwrap();
    let bands = bands
        .iter()
        .map(|&(id, size)| Band {
            id,
            path: band_path(id),
            size,
        })
        .collect();
    let catalog = BandCatalog::from_bands(header.band_size, bands).unwrap();
    MappingSession::new(
        SessionConfig::new("testdisk", "0f0e0d0c"),
        &header,
        catalog,
        provider,
        publisher,
    )
    .unwrap()
}

const FULL: &[(u64, u64)] = &[(0, 4096), (1, 4096), (2, 4096), (3, 4096)];

#[test]
fn test_clean_lifecycle() {
    let mut session = session(FULL, FakeProvider::new(), FakePublisher::default());
    let mut termination = ScriptedTermination::new();

    let report = session.run(&mut termination, &mut NoProgress).unwrap();

    assert_eq!(report.outcome, Outcome::Clean);
    assert_eq!(report.outcome.exit_code(), 0);
    assert_eq!(report.extents, 4);
    assert_eq!(report.teardown_passes, 1);
    assert_eq!(report.still_bound, 0);
    assert!(!report.mapping_left);
    assert_eq!(termination.waits, 1);
    assert_eq!(session.state(), SessionState::Done);

    let (name, flags, table) = session.publisher().created.clone().unwrap();
    assert_eq!(name, "testdisk");
    assert_eq!(flags, MapFlags::READ_ONLY);
    assert_eq!(table.linear_count(), 4);
    assert!(!session.publisher().live);
    assert_eq!(session.binder().provider().detached.len(), 4);
}

#[test]
fn test_bind_failure_still_releases_others() {
    let mut session = session(
        FULL,
        FakeProvider::new().refusing(2),
        FakePublisher::default(),
    );
    let report = session
        .run(&mut ScriptedTermination::new(), &mut NoProgress)
        .unwrap();

    assert_eq!(report.outcome, Outcome::Clean);
    assert_eq!(report.bind_failures.len(), 1);
    assert_eq!(report.bind_failures[0].id, 2);

    let (_, _, table) = session.publisher().created.clone().unwrap();
    assert!(table.extents().contains(&Extent::Zero {
        start: 8192,
        length: 4096
    }));
    assert!(table.validate().is_ok());

    let mut detached = session.binder().provider().detached.clone();
    detached.sort();
    assert_eq!(detached, vec!["/dev/loop0", "/dev/loop1", "/dev/loop3"]);
}

#[test]
fn test_cancel_during_build_skips_publish() {
    let mut session = session(FULL, FakeProvider::new(), FakePublisher::default());
    let mut termination = ScriptedTermination::cancel_on_poll(3);

    let report = session.run(&mut termination, &mut NoProgress).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.outcome, Outcome::Clean);
    assert_eq!(report.extents, 0);
    assert!(session.publisher().created.is_none());
    assert_eq!(session.publisher().remove_calls, 0);
    assert_eq!(termination.waits, 0);
    assert_eq!(
        session.binder().provider().detached,
        vec!["/dev/loop0", "/dev/loop1"]
    );
}

#[test]
fn test_publish_failure_goes_straight_to_teardown() {
    let publisher = FakePublisher {
        fail_create: true,
        ..FakePublisher::default()
    };
    let mut session = session(FULL, FakeProvider::new(), publisher);
    let mut termination = ScriptedTermination::new();

    let report = session.run(&mut termination, &mut NoProgress).unwrap();

    assert!(report.publish_error.is_some());
    assert_eq!(report.outcome, Outcome::Clean);
    assert_eq!(termination.waits, 0);
    assert_eq!(session.publisher().remove_calls, 0);
    assert_eq!(session.binder().bound_count(), 0);
}

#[test]
fn test_gives_up_after_third_failed_pass() {
    let provider = FakeProvider::new().failing_detach("/dev/loop1", u32::MAX);
    let mut session = session(FULL, provider, FakePublisher::default());
    let mut termination = ScriptedTermination::new();

    let report = session.run(&mut termination, &mut NoProgress).unwrap();

    assert_eq!(report.outcome, Outcome::Abandoned);
    assert_eq!(report.outcome.exit_code(), 1);
    assert_eq!(report.teardown_passes, 3);
    assert_eq!(report.still_bound, 1);
    // One wait while published, one before each retry.
    assert_eq!(termination.waits, 3);
    assert_eq!(session.publisher().remove_calls, 1);
    assert_eq!(session.teardown_failures(), 3);

    let calls = &session.binder().provider().detach_calls;
    assert_eq!(calls.iter().filter(|c| *c == "/dev/loop1").count(), 3);
    assert_eq!(calls.iter().filter(|c| *c == "/dev/loop0").count(), 1);
}

#[test]
fn test_transient_detach_failure_recovers() {
    let provider = FakeProvider::new().failing_detach("/dev/loop3", 1);
    let mut session = session(FULL, provider, FakePublisher::default());
    let mut termination = ScriptedTermination::new();

    let report = session.run(&mut termination, &mut NoProgress).unwrap();

    assert_eq!(report.outcome, Outcome::Clean);
    assert_eq!(report.teardown_passes, 2);
    assert_eq!(session.teardown_failures(), 0);
    assert_eq!(termination.waits, 2);
    // The retry only touches the band that was still bound.
    assert_eq!(session.binder().provider().detach_calls.len(), 5);
}

#[test]
fn test_request_queued_during_failed_pass_is_discarded() {
    let provider = FakeProvider::new().failing_detach("/dev/loop0", 1);
    let mut session = session(FULL, provider, FakePublisher::default());
    // The first poll after the failed pass sees a ^C pressed while it ran.
    let mut termination = ScriptedTermination {
        polls: [false, false, false, false, true].into_iter().collect(),
        ..ScriptedTermination::default()
    };

    let report = session.run(&mut termination, &mut NoProgress).unwrap();

    assert_eq!(report.outcome, Outcome::Clean);
    assert_eq!(report.teardown_passes, 2);
    assert_eq!(
        termination.calls,
        vec!["poll", "poll", "poll", "poll", "wait", "poll", "wait"]
    );
}

#[test]
fn test_remove_failure_keeps_bands_attached_until_retry() {
    let publisher = FakePublisher {
        remove_failures: 1,
        ..FakePublisher::default()
    };
    let mut session = session(FULL, FakeProvider::new(), publisher);

    let report = session
        .run(&mut ScriptedTermination::new(), &mut NoProgress)
        .unwrap();

    assert_eq!(report.outcome, Outcome::Clean);
    assert_eq!(report.teardown_passes, 2);
    assert_eq!(session.publisher().remove_calls, 2);
    assert_eq!(session.binder().provider().detach_calls.len(), 4);
}

#[test]
fn test_persistent_remove_failure_abandons_mapping() {
    let publisher = FakePublisher {
        remove_failures: u32::MAX,
        ..FakePublisher::default()
    };
    let mut session = session(FULL, FakeProvider::new(), publisher);

    let report = session
        .run(&mut ScriptedTermination::new(), &mut NoProgress)
        .unwrap();

    assert_eq!(report.outcome, Outcome::Abandoned);
    assert!(report.mapping_left);
    assert_eq!(report.still_bound, 4);
    assert_eq!(session.publisher().remove_calls, 3);
    assert!(session.binder().provider().detach_calls.is_empty());
}

#[test]
fn test_zero_retries_gives_up_after_first_failure() {
    let header = BundleHeader::new(4096, 4096).unwrap();
    let catalog = BandCatalog::from_bands(
        4096,
        vec![Band {
            id: 0,
            path: band_path(0),
            size: 4096,
        }],
    )
    .unwrap();
    let mut session = MappingSession::new(
        SessionConfig::new("disk", "id").with_teardown_retries(0),
        &header,
        catalog,
        FakeProvider::new().failing_detach("/dev/loop0", u32::MAX),
        FakePublisher::default(),
    )
    .unwrap();
    let mut termination = ScriptedTermination::new();

    let report = session.run(&mut termination, &mut NoProgress).unwrap();
    assert_eq!(report.outcome, Outcome::Abandoned);
    assert_eq!(report.teardown_passes, 1);
    assert_eq!(termination.waits, 1);
}

#[test]
fn test_structural_error_before_any_bind() {
    let header = BundleHeader::new(4096, 6000).unwrap();
    let catalog = BandCatalog::from_bands(
        4096,
        vec![Band {
            id: 1,
            path: band_path(1),
            size: 4096,
        }],
    )
    .unwrap();
    let result = MappingSession::new(
        SessionConfig::new("disk", "id"),
        &header,
        catalog,
        FakeProvider::new(),
        FakePublisher::default(),
    );

    assert!(matches!(
        result,
        Err(StructuralError::Table(TableError::BeyondImage { id: 1, .. }))
    ));
}

#[test]
fn test_open_on_disk_bundle_dry_run() {
    let bundle = write_bundle(
        4096,
        20000,
        &[("0", 4096), ("2", 4096), ("shard/4", 3616)],
    );
    let mut session = MappingSession::open(
        SessionConfig::new("disk", "id"),
        bundle.path(),
        SimulatedProvider::with_delay(Duration::ZERO),
        SimulatedPublisher::new(),
    )
    .unwrap();

    let report = session
        .run(&mut ScriptedTermination::new(), &mut NoProgress)
        .unwrap();

    assert_eq!(report.outcome, Outcome::Clean);
    assert_eq!(report.extents, 5);
    let starts: Vec<u64> = session.table().iter().map(|e| e.start()).collect();
    assert_eq!(starts, vec![0, 4096, 8192, 12288, 16384]);
    assert_eq!(session.table().total_size(), 20000);
    assert_eq!(session.publisher().live(), None);
}

#[test]
fn test_open_rejects_malformed_band_name() {
    let bundle = write_bundle(4096, 8192, &[("0", 4096), ("token", 10)]);
    let result = MappingSession::open(
        SessionConfig::new("disk", "id"),
        bundle.path(),
        FakeProvider::new(),
        FakePublisher::default(),
    );
    assert!(matches!(result, Err(StructuralError::Catalog(_))));
}
