//! Integration tests for a single job run: partial failure, resumption,
//! bounded fan-out, cancellation and the map-specific phases.

mod common;

use std::time::Duration;

use chrono::Utc;

use common::*;
use owid_importer::collab::{CollaboratorError, Resolution, SharedContext};
use owid_importer::engine::{RunError, StallMonitor};
use owid_importer::model::{JobStatus, UnitKey, UnitKind, UnitStatus};
use owid_importer::publish::content_sha1;

fn context() -> SharedContext {
    SharedContext {
        title: "Life expectancy".to_string(),
        start_year: Some("1950".to_string()),
        end_year: Some("2020".to_string()),
    }
}

fn countries(keys: &[&str]) -> Resolution {
    Resolution {
        primary: single_partitions(keys),
        secondary: Vec::new(),
        context: context(),
    }
}

fn transient(message: &str) -> CollaboratorError {
    CollaboratorError::Transient(message.to_string())
}

#[tokio::test]
async fn test_unit_failure_does_not_fail_job() {
    let h = TestHarness::new();
    h.resolve_to(countries(&["A", "B", "C"]));
    h.processor.fail("country:B", 2, transient("page crashed"));

    let id = h.submit(chart_params("u1"));
    let status = h.run(&id).await.unwrap();

    assert_eq!(status, JobStatus::Done);
    let units = h.unit_statuses(&id);
    assert_eq!(units["country:A"], UnitStatus::Uploaded);
    assert_eq!(units["country:B"], UnitStatus::Failed);
    assert_eq!(units["country:C"], UnitStatus::Uploaded);
    assert_eq!(h.processor.calls_for("country:B"), 2);

    let job = h.jobs.get(&id).unwrap().unwrap();
    assert!(job.error.is_none());
    assert_eq!(job.chart_name.as_deref(), Some("life-expectancy"));

    let stored = h.repository.file("life-expectancy, A.svg").unwrap();
    assert_eq!(stored.description, "Life expectancy for A");
}

#[tokio::test]
async fn test_retry_only_reprocesses_failed_units() {
    let h = TestHarness::new();
    h.resolve_to(countries(&["A", "B", "C"]));
    h.processor.fail("country:B", 2, transient("page crashed"));

    let id = h.submit(chart_params("u1"));
    h.run(&id).await.unwrap();
    h.service().retry_job(&id).unwrap();
    assert_eq!(h.job_status(&id), JobStatus::Queued);

    let status = h.run(&id).await.unwrap();

    assert_eq!(status, JobStatus::Done);
    assert_eq!(h.processor.calls_for("country:A"), 1);
    assert_eq!(h.processor.calls_for("country:B"), 3);
    assert_eq!(h.processor.calls_for("country:C"), 1);
    assert!(h.unit_statuses(&id).values().all(|s| *s == UnitStatus::Uploaded));

    let uploads = h.repository.uploads();
    assert_eq!(uploads.iter().filter(|n| n.ends_with("A.svg")).count(), 1);
}

#[tokio::test]
async fn test_resume_after_dead_run() {
    let h = TestHarness::new();
    h.resolve_to(countries(&["A", "B", "C"]));
    let id = h.submit(chart_params("u1"));

    // A previous process finished A, died while rendering B.
    h.jobs
        .update_status(&id, JobStatus::Processing, None)
        .unwrap();
    let (mut a, _) = h
        .ledger
        .find_or_create(&id, &UnitKey::new(UnitKind::Country, "A", None))
        .unwrap();
    a.status = UnitStatus::Uploaded;
    a.file_name = Some("life-expectancy, A.svg".to_string());
    h.ledger.update(&a).unwrap();
    h.ledger
        .claim(&id, &UnitKey::new(UnitKind::Country, "B", None), false)
        .unwrap();
    h.jobs
        .touch_heartbeat_at(&id, Utc::now() - chrono::Duration::minutes(10))
        .unwrap();

    let monitor = StallMonitor::new(
        h.jobs.clone(),
        h.events.clone(),
        Duration::from_secs(300),
        Duration::from_secs(60),
    );
    assert_eq!(monitor.sweep(Utc::now()).unwrap(), vec![id.clone()]);
    assert!(monitor.sweep(Utc::now()).unwrap().is_empty());
    assert_eq!(h.job_status(&id), JobStatus::Failed);

    h.service().retry_job(&id).unwrap();
    assert_eq!(h.unit_statuses(&id)["country:B"], UnitStatus::Failed);

    let status = h.run(&id).await.unwrap();

    assert_eq!(status, JobStatus::Done);
    assert_eq!(h.processor.calls_for("country:A"), 0);
    assert_eq!(h.processor.calls_for("country:B"), 1);
    assert_eq!(h.processor.calls_for("country:C"), 1);
    assert_eq!(h.unit_statuses(&id)["country:A"], UnitStatus::Uploaded);
}

#[tokio::test]
async fn test_outcomes_follow_remote_state() {
    let h = TestHarness::new();
    h.resolve_to(countries(&["A", "B", "C", "D"]));
    let rendered = |key: &str| format!("<svg data-unit=\"country:{}\"></svg>", key).into_bytes();

    h.repository
        .put("life-expectancy, A.svg", &rendered("A"), "Life expectancy for A");
    h.repository
        .put("life-expectancy, B.svg", &rendered("B"), "An older description");
    h.repository
        .put("life-expectancy, C.svg", b"<svg>stale</svg>", "Life expectancy for C");

    let id = h.submit(chart_params("u1"));
    h.run(&id).await.unwrap();

    let units = h.unit_statuses(&id);
    assert_eq!(units["country:A"], UnitStatus::Skipped);
    assert_eq!(units["country:B"], UnitStatus::DescriptionUpdated);
    assert_eq!(units["country:C"], UnitStatus::Overwritten);
    assert_eq!(units["country:D"], UnitStatus::Uploaded);

    assert_eq!(
        h.repository.description_updates(),
        vec!["life-expectancy, B.svg".to_string()]
    );
    let c = h.repository.file("life-expectancy, C.svg").unwrap();
    assert_eq!(content_sha1(&c.bytes), content_sha1(&rendered("C")));
}

#[tokio::test]
async fn test_fatal_unit_error_is_not_retried() {
    let h = TestHarness::new();
    h.resolve_to(countries(&["A", "B"]));
    h.processor.fail(
        "country:A",
        5,
        CollaboratorError::Fatal("chart has no data".to_string()),
    );

    let id = h.submit(chart_params("u1"));
    let status = h.run(&id).await.unwrap();

    assert_eq!(status, JobStatus::Done);
    assert_eq!(h.processor.calls_for("country:A"), 1);
    assert_eq!(h.unit_statuses(&id)["country:A"], UnitStatus::Failed);
    assert_eq!(h.unit_statuses(&id)["country:B"], UnitStatus::Uploaded);
}

#[tokio::test]
async fn test_timeout_escalates_per_attempt() {
    let mut h = TestHarness::new();
    h.config.runner.unit_timeout_base_ms = 100;
    h.processor.set_delay(Duration::from_millis(150));
    h.resolve_to(countries(&["A"]));

    let id = h.submit(chart_params("u1"));
    h.run(&id).await.unwrap();

    let calls = h.processor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].timeout, Duration::from_millis(100));
    assert_eq!(calls[1].timeout, Duration::from_millis(200));
    assert_eq!(h.unit_statuses(&id)["country:A"], UnitStatus::Uploaded);
}

#[tokio::test]
async fn test_fan_out_respects_limit() {
    let mut h = TestHarness::new();
    h.config.runner.fan_out = 2;
    h.processor.set_delay(Duration::from_millis(30));
    h.resolve_to(countries(&["A", "B", "C", "D", "E"]));

    let id = h.submit(chart_params("u1"));
    h.run(&id).await.unwrap();

    assert_eq!(h.processor.calls().len(), 5);
    assert_eq!(h.processor.peak_in_flight(), 2);
}

#[tokio::test]
async fn test_cancel_stops_new_units() {
    let mut h = TestHarness::new();
    h.config.runner.fan_out = 1;
    h.processor.set_delay(Duration::from_millis(40));
    let years: Vec<String> = (2000..2020).map(|y| y.to_string()).collect();
    let years: Vec<&str> = years.iter().map(String::as_str).collect();
    h.resolve_to(Resolution {
        primary: vec![region("World", &years), region("Europe", &years)],
        secondary: Vec::new(),
        context: context(),
    });

    let id = h.submit(map_params("u1"));
    let runner = {
        let deps = h.deps();
        let id = id.clone();
        tokio::spawn(async move {
            owid_importer::engine::JobRunner::new(deps)
                .run(&id, principal("u1"))
                .await
        })
    };

    assert!(wait_until(Duration::from_secs(5), || !h.processor.calls().is_empty()).await);
    h.service().cancel_job(&id).unwrap();
    let launched_at_cancel = h.processor.calls().len();

    let status = runner.await.unwrap().unwrap();

    assert_eq!(status, JobStatus::Failed);
    // One unit may have been between its claim and the processor call.
    assert!(h.processor.calls().len() <= launched_at_cancel + 1);
    assert!(h.processor.calls().len() < 40);

    let job = h.jobs.get(&id).unwrap().unwrap();
    assert_eq!(job.error.as_deref(), Some("cancelled by user"));
    assert!(h
        .ledger
        .list_by_job(&id)
        .unwrap()
        .iter()
        .all(|u| !u.status.is_in_flight()));
}

#[tokio::test]
async fn test_cancel_stops_sweep_without_waiting_for_heartbeat() {
    let mut h = TestHarness::new();
    // Default reload period: the heartbeat loop never observes the cancel.
    h.config.runner.heartbeat_reload_ms = 5_000;
    h.config.runner.fan_out = 1;
    h.processor.set_delay(Duration::from_millis(50));
    let years: Vec<String> = (2000..2040).map(|y| y.to_string()).collect();
    let years: Vec<&str> = years.iter().map(String::as_str).collect();
    h.resolve_to(Resolution {
        primary: vec![region("World", &years)],
        secondary: Vec::new(),
        context: context(),
    });

    let id = h.submit(map_params("u1"));
    let runner = {
        let deps = h.deps();
        let id = id.clone();
        tokio::spawn(async move {
            owid_importer::engine::JobRunner::new(deps)
                .run(&id, principal("u1"))
                .await
        })
    };

    assert!(wait_until(Duration::from_secs(5), || !h.processor.calls().is_empty()).await);
    h.service().cancel_job(&id).unwrap();
    let launched_at_cancel = h.processor.calls().len();

    let status = tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("runner should stop well before the next heartbeat")
        .unwrap()
        .unwrap();

    assert_eq!(status, JobStatus::Failed);
    assert!(h.processor.calls().len() <= launched_at_cancel + 1);
    // The anchor year is not re-rendered with the metadata block.
    assert_eq!(h.processor.calls_for("map:World/2000"), 1);
    assert!(h.processor.calls().iter().all(|c| c.attachment.is_none()));
}

#[tokio::test]
async fn test_invalid_parameters_fail_without_processing() {
    let h = TestHarness::new();
    h.resolve_to(countries(&["A"]));

    let mut params = map_params("u1");
    params.file_name = "$NAME, $REGION.svg".to_string();
    let id = h.jobs.create(params).unwrap().id;

    let err = h.run(&id).await.unwrap_err();

    assert!(matches!(err, RunError::Validation(_)));
    let job = h.jobs.get(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("YEAR"));
    assert!(h.processor.calls().is_empty());
    assert_eq!(h.tokens.issued(), 0);
}

#[tokio::test]
async fn test_token_failure_fails_job() {
    let h = TestHarness::new();
    h.resolve_to(countries(&["A"]));
    h.tokens.set_failing(true);

    let id = h.submit(chart_params("u1"));
    let err = h.run(&id).await.unwrap_err();

    assert!(matches!(err, RunError::Token(_)));
    assert_eq!(h.job_status(&id), JobStatus::Failed);
    assert!(h.processor.calls().is_empty());
}

#[tokio::test]
async fn test_unresolvable_partitions_fail_job() {
    let h = TestHarness::new();
    h.resolver.fail_with(transient("chart page did not load"));

    let id = h.submit(chart_params("u1"));
    let err = h.run(&id).await.unwrap_err();

    assert!(matches!(err, RunError::Resolve(_)));
    let job = h.jobs.get(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().starts_with("resolve:"));
}

#[tokio::test]
async fn test_run_requires_queued_job() {
    let h = TestHarness::new();
    h.resolve_to(countries(&["A"]));
    let id = h.submit(chart_params("u1"));
    h.jobs.update_status(&id, JobStatus::Done, None).unwrap();

    let err = h.run(&id).await.unwrap_err();

    assert!(matches!(
        err,
        RunError::NotRunnable {
            status: JobStatus::Done,
            ..
        }
    ));
    assert!(matches!(
        h.run("missing").await.unwrap_err(),
        RunError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_map_job_with_countries_and_gallery() {
    let h = TestHarness::new();
    h.resolve_to(Resolution {
        primary: vec![region("World", &["2000", "2001"]), region("Asia", &["2000"])],
        secondary: single_partitions(&["France"]),
        context: SharedContext {
            title: "CO2 emissions".to_string(),
            ..Default::default()
        },
    });

    let mut params = map_params("u1");
    params.import_countries = true;
    params.country_file_name = "$NAME, $COUNTRY.svg".to_string();
    params.country_description = "$TITLE in $COUNTRY".to_string();
    params.generate_template = true;
    let id = h.submit(params);

    let status = h.run(&id).await.unwrap();
    assert_eq!(status, JobStatus::Done);

    let units = h.unit_statuses(&id);
    assert_eq!(units["country:France"], UnitStatus::Uploaded);
    assert_eq!(units["map:World/2001"], UnitStatus::Uploaded);
    // The anchor year was re-rendered with the aggregated metadata.
    assert_eq!(units["map:World/2000"], UnitStatus::Overwritten);
    assert_eq!(units["map:Asia/2000"], UnitStatus::Overwritten);

    let anchor_calls: Vec<_> = h
        .processor
        .calls()
        .into_iter()
        .filter(|r| r.key.to_string() == "map:World/2000")
        .collect();
    assert_eq!(anchor_calls.len(), 2);
    let block = anchor_calls[1].attachment.as_deref().unwrap();
    assert!(block.starts_with(r#"<metadata id="country-data">"#));
    assert!(block.contains(r##"<year value="2001"><country name="France" fill="#2001"/></year>"##));

    let country = h.repository.file("co2, France.svg").unwrap();
    assert_eq!(country.description, "CO2 emissions in France");

    let job = h.jobs.get(&id).unwrap().unwrap();
    assert_eq!(job.template_name.as_deref(), Some("Template:OWID/co2"));
    let page = h.repository.page("Template:OWID/co2").unwrap();
    assert!(page.contains("co2, World, 2000.svg"));
    assert!(page.contains("co2, Asia, 2000.svg"));
}

#[tokio::test]
async fn test_rerun_of_finished_map_does_not_refresh_metadata() {
    let h = TestHarness::new();
    h.resolve_to(Resolution {
        primary: vec![region("World", &["2000", "2001"])],
        secondary: Vec::new(),
        context: SharedContext::default(),
    });

    let id = h.submit(map_params("u1"));
    h.run(&id).await.unwrap();
    let calls_after_first = h.processor.calls().len();
    assert_eq!(calls_after_first, 3);

    h.service().retry_job(&id).unwrap();
    h.run(&id).await.unwrap();

    assert_eq!(h.processor.calls().len(), calls_after_first);
}
