//! End-to-end runs through the bootstrap sequencer

use std::time::Duration;

use atmos_host::bootstrap::{CompilerEntry, PreludeRequire, RunOutcome, Tier};
use atmos_host::error::RunError;
use atmos_host::lifecycle::{RunState, NO_PROGRAM};
use atmos_host::module::ModuleSpec;
use atmos_host::util::link::decode_program;

use crate::common::{harness, plan};

const TOY_COMPILER: &str = r#"
local M = {}
function M.compile (src, name)
    return load(src, "@" .. name)
end
return M
"#;

fn compiled_plan() -> atmos_host::BootPlan {
    let mut plan = plan(Tier::Compiled);
    plan.modules.push(ModuleSpec::inline("toy.compiler", TOY_COMPILER));
    plan.compiler = Some(CompilerEntry {
        module: Some("toy.compiler".to_string()),
        function: "compile".to_string(),
        wrap: Some("local args = {...}\n{code}".to_string()),
    });
    plan
}

#[tokio::test]
async fn test_hello_direct() {
    let h = harness(plan(Tier::Direct));
    let report = h.runner.run(Some("print('hello')")).await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(h.output.contents(), "hello\n");
    assert_eq!(h.board.history(), vec!["Loading...", "Running...", "Done."]);
    assert_eq!(h.board.errors(), "");
    assert_eq!(report.modules, vec!["host.sched"]);
}

#[tokio::test]
async fn test_hello_bare() {
    let h = harness(plan(Tier::Bare));
    let report = h.runner.run(Some("print('hello')")).await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "hello\n");
    assert_eq!(h.board.history(), vec!["Loading...", "Running...", "Done."]);
    assert!(report.modules.is_empty());
}

#[tokio::test]
async fn test_hello_compiled() {
    let h = harness(compiled_plan());
    let report = h.runner.run(Some("print('hello')")).await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "hello\n");
    assert_eq!(
        h.board.history(),
        vec!["Loading...", "Compiling...", "Running...", "Done."]
    );
}

#[tokio::test]
async fn test_compile_error_is_reported() {
    let h = harness(compiled_plan());
    let report = h.runner.run(Some("print(")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert!(matches!(report.error, Some(RunError::Compile(_))));
    assert_eq!(h.board.history(), vec!["Loading...", "Compiling...", "Error."]);
    assert!(h.board.errors().starts_with("ERROR: input.lua: "));
    assert_eq!(h.output.contents(), "");
}

#[tokio::test]
async fn test_compiler_module_exporting_function() {
    let mut plan = plan(Tier::Compiled);
    plan.modules.push(ModuleSpec::inline(
        "toy.load",
        "return function (src, name) return load(src, '@' .. name) end",
    ));
    plan.compiler = Some(CompilerEntry {
        module: Some("toy.load".to_string()),
        function: "compile".to_string(),
        wrap: None,
    });
    let h = harness(plan);
    let report = h.runner.run(Some("print('compiled')")).await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "compiled\n");
}

#[tokio::test]
async fn test_missing_compile_function() {
    let mut plan = compiled_plan();
    plan.compiler = Some(CompilerEntry {
        module: None,
        function: "no_such_compiler".to_string(),
        wrap: None,
    });
    let h = harness(plan);
    let report = h.runner.run(Some("print('x')")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert!(h.board.errors().contains("`no_such_compiler` is not defined"));
}

#[tokio::test]
async fn test_invalid_program_errors() {
    let h = harness(plan(Tier::Direct));
    let report = h.runner.run(Some("invalid!!!lua")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert_eq!(report.state, RunState::Errored);
    assert_eq!(h.board.status(), "Error.");
    assert!(h.board.errors().starts_with("ERROR: "));
    assert!(matches!(report.error, Some(RunError::Eval(_))));
    assert_eq!(h.output.contents(), "");
}

#[tokio::test]
async fn test_invalid_program_bare() {
    let h = harness(plan(Tier::Bare));
    let report = h.runner.run(Some("invalid!!!lua")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert_eq!(h.board.history(), vec!["Loading...", "Running...", "Error."]);
    assert!(h.board.errors().starts_with("ERROR: "));
}

#[tokio::test]
async fn test_runtime_error_in_entry() {
    let h = harness(plan(Tier::Direct));
    let report = h.runner.run(Some("print('before') error('boom')")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert_eq!(h.output.contents(), "before\n");
    assert_eq!(h.board.history(), vec!["Loading...", "Running...", "Error."]);
    assert!(h.board.errors().contains("boom"));
}

#[tokio::test]
async fn test_error_after_wait_ends_run() {
    let h = harness(plan(Tier::Direct));
    let report = h
        .runner
        .run(Some("await('clock', 2) error('late failure')"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert_eq!(h.board.status(), "Error.");
    assert!(h.board.errors().contains("late failure"));
}

#[tokio::test]
async fn test_clock_wait_completes() {
    let h = harness(plan(Tier::Direct));
    let report = h
        .runner
        .run(Some("print('a') await('clock', 5) print('b')"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "a\nb\n");
}

#[tokio::test]
async fn test_top_level_return_is_done() {
    let h = harness(plan(Tier::Direct));
    let report = h
        .runner
        .run(Some("if true then return end print('unreachable')"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "");
}

#[tokio::test]
async fn test_no_input() {
    for program in [None, Some(""), Some("  \n\t")] {
        let h = harness(plan(Tier::Direct));
        let report = h.runner.run(program).await;

        assert_eq!(report.outcome, RunOutcome::NoInput);
        assert_eq!(report.state, RunState::Idle);
        assert_eq!(h.board.history(), vec![NO_PROGRAM]);
        assert_eq!(h.output.contents(), "");
    }
}

#[tokio::test]
async fn test_prelude_binds_global() {
    let mut plan = plan(Tier::Direct);
    plan.prelude = vec![PreludeRequire::new("host.sched").bound_to("sched")];
    let h = harness(plan);
    let report = h
        .runner
        .run(Some("print(type(sched.start), sched.pending())"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "function\t1\n");
}

#[tokio::test]
async fn test_missing_scheduler_is_an_error() {
    let mut plan = plan(Tier::Direct);
    plan.modules.clear();
    plan.prelude.clear();
    let h = harness(plan);
    let report = h.runner.run(Some("print('never')")).await;

    assert_eq!(report.outcome, RunOutcome::Errored);
    assert!(h.board.errors().contains("`start`"));
    assert_eq!(h.output.contents(), "");
}

#[tokio::test]
async fn test_host_close_cancels_run() {
    let h = harness(plan(Tier::Direct));
    let report = h
        .runner
        .run(Some("print('closing') host_close() await('clock', 60000)"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.state, RunState::Running);
    assert_eq!(h.board.status(), "Running...");
    assert_eq!(h.output.contents(), "closing\n");
}

#[tokio::test]
async fn test_stop_handle_cancels_running_program() {
    let h = harness(plan(Tier::Direct));
    let stop = h.runner.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.stop();
    });

    let report = h.runner.run(Some("await('clock', 60000) print('late')")).await;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(h.output.contents(), "");
    assert_eq!(h.board.errors(), "");
}

#[tokio::test]
async fn test_stop_before_start_skips_program() {
    let h = harness(plan(Tier::Direct));
    h.runner.stop_handle().stop();
    let report = h.runner.run(Some("print('never')")).await;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(h.output.contents(), "");
}

#[tokio::test]
async fn test_program_from_link() {
    let program = decode_program("file:///tmp/run.html#cHJpbnQoJ2hlbGxvJyk=").unwrap();
    let h = harness(plan(Tier::Direct));
    let report = h.runner.run(program.as_deref()).await;

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(h.output.contents(), "hello\n");
}

#[tokio::test]
async fn test_empty_link_fragment_is_no_input() {
    let program = decode_program("file:///tmp/run.html#").unwrap();
    let h = harness(plan(Tier::Direct));
    let report = h.runner.run(program.as_deref()).await;

    assert_eq!(report.outcome, RunOutcome::NoInput);
    assert_eq!(h.board.status(), NO_PROGRAM);
}
