use std::sync::atomic::{AtomicUsize, Ordering};

use daemonizer::catalog::{Catalog, WorkerGroup};
use daemonizer::error::Error;
use daemonizer::test_runner::{TestCase, TestRunner, TestSuite};

static RUNS: AtomicUsize = AtomicUsize::new(0);

fn counted_pass() -> anyhow::Result<()> {
    RUNS.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

fn fails() -> anyhow::Result<()> {
    anyhow::bail!("expected 2 feeds, found 0")
}

fn panics() -> anyhow::Result<()> {
    panic!("index out of range")
}

fn catalog() -> Catalog {
    let suite = TestSuite::new()
        .module(
            "test_fetch",
            vec![
                TestCase::new("fetch_counts", counted_pass),
                TestCase::new("fetch_fails", fails),
            ],
        )
        .module("test_clean", vec![TestCase::new("clean_panics", panics)])
        .module("fixtures", vec![TestCase::new("not_a_test", counted_pass)]);

    let mut catalog = Catalog::builtin();
    catalog
        .register(WorkerGroup::new("feeds").tests(suite))
        .register(WorkerGroup::new("bare"));
    catalog
}

#[test]
fn builtin_sample_suite_passes() {
    let catalog = Catalog::builtin();
    let report = TestRunner::new(&catalog).run("sample", None).unwrap();

    assert!(report.success(), "{report}");
    assert_eq!(report.suite, "daemons.sample.tests");
    assert!(report.to_string().ends_with("OK"));
}

#[test]
fn full_run_reports_each_case() {
    let catalog = catalog();
    let report = TestRunner::new(&catalog).run("feeds", None).unwrap();

    let mut names: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["clean_panics", "fetch_counts", "fetch_fails"]);
    assert_eq!(report.failures(), 2);

    let text = report.to_string();
    assert!(text.contains("fetch_counts (test_fetch) ... ok"));
    assert!(text.contains("fetch_fails (test_fetch) ... FAILED"));
    assert!(text.contains("expected 2 feeds, found 0"));
    assert!(text.contains("panicked: index out of range"));
    assert!(text.ends_with("FAILED (failures=2)"));
}

#[test]
fn unknown_case_halts_before_running_anything() {
    let catalog = catalog();
    let before = RUNS.load(Ordering::SeqCst);

    let err = TestRunner::new(&catalog)
        .run("feeds", Some("not_a_test"))
        .unwrap_err();

    assert!(matches!(
        err,
        Error::TestNotFound { ref suite, ref test }
            if suite == "daemons.feeds.tests" && test == "not_a_test"
    ));
    assert_eq!(RUNS.load(Ordering::SeqCst), before);
}

#[test]
fn single_case_runs_alone() {
    let catalog = catalog();
    let report = TestRunner::new(&catalog)
        .run("daemons.feeds", Some("fetch_counts"))
        .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert!(report.success());
}

#[test]
fn group_without_suite_is_group_not_found() {
    let catalog = catalog();
    let err = TestRunner::new(&catalog).run("bare", None).unwrap_err();
    assert!(matches!(err, Error::GroupNotFound(ref g) if g == "daemons.bare.tests"));
}
