//! Module loading through a full run

use atmos_host::bootstrap::{PreludeRequire, RunOutcome, Tier};
use atmos_host::error::{RegistrationError, RunError};
use atmos_host::module::ModuleSpec;

use crate::common::{harness, plan, TableFetcher};

#[tokio::test]
async fn test_remote_modules_registered_in_order() {
    let mut plan = plan(Tier::Direct);
    plan.modules.push(ModuleSpec::remote("lib.greet", "mem://greet.lua"));
    plan.modules.push(ModuleSpec::remote("lib.shout", "mem://shout.lua"));
    let h = harness(plan);
    let runner = h.runner.with_fetcher(TableFetcher::new(&[
        ("mem://greet.lua", "return function (who) return 'hello ' .. who end"),
        (
            "mem://shout.lua",
            "local greet = require 'lib.greet' return function (who) return greet(who):upper() end",
        ),
    ]));

    let report = runner
        .run(Some("print(require('lib.shout')('world'))"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.modules, vec!["host.sched", "lib.greet", "lib.shout"]);
    assert_eq!(h.output.contents(), "HELLO WORLD\n");
}

#[tokio::test]
async fn test_transport_failure_stops_before_user_code() {
    let mut plan = plan(Tier::Direct);
    plan.modules.push(ModuleSpec::remote("streams", "mem://streams.lua"));
    plan.modules.push(ModuleSpec::remote("atmos", "mem://atmos.lua"));
    let h = harness(plan);
    let runner = h
        .runner
        .with_fetcher(TableFetcher::new(&[("mem://atmos.lua", "return {}")]));

    let report = runner.run(Some("print('user code')")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert!(report.modules.is_empty());
    assert_eq!(h.output.contents(), "");
    assert_eq!(h.board.errors(), "ERROR: fetch streams: 404\n");
    assert_eq!(h.board.history(), vec!["Loading...", "Error."]);
    match report.error {
        Some(RunError::Transport(err)) => {
            assert_eq!(err.module, "streams");
            assert_eq!(err.status, Some(404));
        }
        other => panic!("expected a transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_broken_module_keeps_earlier_registrations() {
    let mut plan = plan(Tier::Direct);
    plan.modules.push(ModuleSpec::inline("ok", "return 1"));
    plan.modules.push(ModuleSpec::inline("broken", "return ("));
    plan.modules.push(ModuleSpec::inline("later", "return 2"));
    let h = harness(plan);

    let report = h.runner.run(Some("print('user code')")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert_eq!(report.modules, vec!["host.sched", "ok"]);
    assert_eq!(h.output.contents(), "");
    assert!(matches!(
        report.error,
        Some(RunError::Registration(RegistrationError::Invalid { ref name, .. })) if name == "broken"
    ));
}

#[tokio::test]
async fn test_modules_are_lazy_until_required() {
    let mut plan = plan(Tier::Direct);
    plan.modules.push(ModuleSpec::inline("noisy", "print('noisy loaded') return {}"));
    let h = harness(plan);

    let report = h.runner.run(Some("print('main')")).await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "main\n");
}

#[tokio::test]
async fn test_prelude_require_failure() {
    let mut plan = plan(Tier::Direct);
    plan.prelude.push(PreludeRequire::new("not.registered"));
    let h = harness(plan);

    let report = h.runner.run(Some("print('user code')")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert!(h.board.errors().contains("not.registered"));
    assert_eq!(h.output.contents(), "");
}

#[tokio::test]
async fn test_file_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("answer.lua");
    std::fs::write(&path, "return 42").unwrap();

    let mut plan = plan(Tier::Direct);
    plan.modules.push(ModuleSpec::file("answer", &path));
    let h = harness(plan);

    let report = h.runner.run(Some("print((require('answer')))")).await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "42\n");
}
