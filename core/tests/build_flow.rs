mod common;

use common::load_blueprint;

use bluebuild_core::error::BlueprintError;
use bluebuild_core::executor::{ExecutionEngine, TaskState};

#[tokio::test]
async fn chained_local_tasks_build_in_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let d = dir.path().display();

    let blueprint = load_blueprint(&format!(
        "[BUILD]\nTASKS = [publish]\nWORKERS = 4\n\n\
         [extract]\nTYPE = LOCAL_TASK\nCOMMAND = printf raw\nRESULTS = {d}/extract.out\n\n\
         [transform]\nTYPE = LOCAL_TASK\nCOMMAND = cat {d}/extract.out | tr a-z A-Z\n\
         RESULTS = {d}/transform.out\nREQUIRES = [extract]\n\n\
         [publish]\nTYPE = LOCAL_TASK\nCOMMAND = cat {d}/transform.out\n\
         RESULTS = {d}/publish.out\nREQUIRES = [transform]\n"
    ))
    .unwrap();

    let report = ExecutionEngine::new(blueprint).run().await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(report.succeeded(), 3);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("publish.out")).unwrap(),
        "RAW"
    );
}

#[tokio::test]
async fn second_pass_skips_satisfied_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let d = dir.path().display();

    let text = format!(
        "[BUILD]\nTASKS = [count]\n\n\
         [count]\nTYPE = LOCAL_TASK\nCOMMAND = date +%s%N\nRESULTS = {d}/count.out\n"
    );

    let first = ExecutionEngine::new(load_blueprint(&text).unwrap())
        .run()
        .await
        .unwrap();
    assert_eq!(first.tasks["count"].state, TaskState::Succeeded);
    let artifact = std::fs::read_to_string(dir.path().join("count.out")).unwrap();

    let second = ExecutionEngine::new(load_blueprint(&text).unwrap())
        .run()
        .await
        .unwrap();
    assert_eq!(second.tasks["count"].state, TaskState::SkippedExisting);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("count.out")).unwrap(),
        artifact,
        "a skipped task must not touch its artifact"
    );
}

#[tokio::test]
async fn cleanup_forces_regeneration_on_the_second_pass() {
    let dir = tempfile::tempdir().unwrap();
    let d = dir.path().display();

    let text = format!(
        "[BUILD]\nTASKS = [count]\n\n\
         [count]\nTYPE = LOCAL_TASK\nCOMMAND = date +%s%N\nRESULTS = {d}/count.out\n\
         CLEANUP = True\n"
    );

    ExecutionEngine::new(load_blueprint(&text).unwrap())
        .run()
        .await
        .unwrap();
    let first = std::fs::read_to_string(dir.path().join("count.out")).unwrap();

    let report = ExecutionEngine::new(load_blueprint(&text).unwrap())
        .run()
        .await
        .unwrap();
    assert_eq!(report.tasks["count"].state, TaskState::Succeeded);
    let second = std::fs::read_to_string(dir.path().join("count.out")).unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn failure_produces_diagnostic_and_nonzero_report() {
    let dir = tempfile::tempdir().unwrap();
    let d = dir.path().display();

    let blueprint = load_blueprint(&format!(
        "[BUILD]\nTASKS = [broken]\n\n\
         [broken]\nTYPE = LOCAL_TASK\nCOMMAND = echo no such input >&2; exit 2\n\
         RESULTS = {d}/broken.out\n"
    ))
    .unwrap();

    let report = ExecutionEngine::new(blueprint).run().await.unwrap();

    assert!(!report.all_succeeded());
    assert!(matches!(
        report.tasks["broken"].state,
        TaskState::Failed { .. }
    ));
    assert!(!dir.path().join("broken.out").exists());
    let diagnostic = std::fs::read_to_string(dir.path().join("broken.out.stderr")).unwrap();
    assert_eq!(diagnostic.trim(), "no such input");
}

#[test]
fn self_dependency_aborts_validation() {
    let err = load_blueprint(
        "[BUILD]\nTASKS = [loop]\n\n\
         [loop]\nTYPE = LOCAL_TASK\nCOMMAND = true\nRESULTS = /tmp/loop.out\n\
         REQUIRES = [loop]\n",
    )
    .unwrap_err();

    assert!(matches!(err, BlueprintError::SelfDependency { .. }));
}

#[test]
fn undeclared_build_task_aborts_validation() {
    let err = load_blueprint(
        "[BUILD]\nTASKS = [ghost]\n\n\
         [real]\nTYPE = LOCAL_TASK\nCOMMAND = true\nRESULTS = /tmp/real.out\n",
    )
    .unwrap_err();

    assert!(matches!(err, BlueprintError::UnknownBuildTask { ref task } if task == "ghost"));
}

#[tokio::test]
async fn mixed_outcome_exercises_every_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let d = dir.path().display();
    std::fs::write(dir.path().join("cached.out"), "prior").unwrap();

    let blueprint = load_blueprint(&format!(
        "[BUILD]\nTASKS = [cached,fresh,blocked]\nWORKERS = 2\n\n\
         [cached]\nTYPE = LOCAL_TASK\nCOMMAND = printf cached\nRESULTS = {d}/cached.out\n\n\
         [fresh]\nTYPE = LOCAL_TASK\nCOMMAND = printf fresh\nRESULTS = {d}/fresh.out\n\n\
         [doomed]\nTYPE = LOCAL_TASK\nCOMMAND = exit 9\nRESULTS = {d}/doomed.out\n\n\
         [blocked]\nTYPE = LOCAL_TASK\nCOMMAND = printf blocked\nRESULTS = {d}/blocked.out\n\
         REQUIRES = [doomed]\n"
    ))
    .unwrap();

    let report = ExecutionEngine::new(blueprint).run().await.unwrap();

    assert_eq!(report.tasks["cached"].state, TaskState::SkippedExisting);
    assert_eq!(report.tasks["fresh"].state, TaskState::Succeeded);
    assert!(matches!(
        report.tasks["doomed"].state,
        TaskState::Failed { .. }
    ));
    assert!(matches!(
        report.tasks["blocked"].state,
        TaskState::FailedDependency { ref dependency } if dependency == "doomed"
    ));
    assert!(!dir.path().join("blocked.out").exists());
    assert_eq!(report.failed(), 2);
}
