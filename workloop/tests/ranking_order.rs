//! Selection order over real work item files.

use std::fs;

use workloop::controller::{LoopController, LoopOptions, RunMode};
use workloop::core::machine::LoopStop;
use workloop::core::ranking::RiskPolicy;
use workloop::core::types::ItemStatus;
use workloop::io::config::{StatusLabels, WorkloopConfig};
use workloop::io::work_items::{FileSource, WorkItemSource};
use workloop::select::rank_items;
use workloop::test_support::{
    RecordingVcs, ScriptedAgent, ScriptedOperator, ScriptedReply, TestWorkspace, checklist_item,
};

/// Risk ratios 0.2, 0.5 and 0.8; ids sort the opposite way.
fn seeded_workspace() -> TestWorkspace {
    let ws = TestWorkspace::new().expect("workspace");
    for item in [
        checklist_item("a-low", ItemStatus::Todo, 1, 4, 0),
        checklist_item("b-mid", ItemStatus::Todo, 1, 1, 0),
        checklist_item("c-high", ItemStatus::Todo, 4, 1, 0),
    ] {
        ws.write_item(&item).expect("write item");
    }
    ws
}

#[test]
fn repeated_selection_walks_items_by_descending_risk() {
    let ws = seeded_workspace();
    let source = FileSource::new(&ws.paths().default_specs_dir, StatusLabels::default());
    let policy = RiskPolicy::default();

    let mut order = Vec::new();
    while let Some(next) = policy.select_next(&source.list_items().expect("list")) {
        source
            .set_status(&next.id, ItemStatus::InProgress)
            .expect("start");
        source.set_status(&next.id, ItemStatus::Done).expect("finish");
        order.push(next.id.clone());
    }
    assert_eq!(order, vec!["c-high", "b-mid", "a-low"]);
}

#[test]
fn malformed_files_are_left_out_of_the_ranking() {
    let ws = seeded_workspace();
    fs::write(
        ws.paths().default_specs_dir.join("broken.md"),
        "---\nid: [unterminated\n---\n",
    )
    .expect("write broken item");
    let source = FileSource::new(&ws.paths().default_specs_dir, StatusLabels::default());

    let rows = rank_items(&source, &RiskPolicy::default()).expect("rank");
    let ids: Vec<_> = rows.iter().map(|row| row.id.as_str()).collect();
    assert_eq!(ids, vec!["c-high", "b-mid", "a-low"]);
    assert!((rows[0].risk - 0.8).abs() < 1e-9);
}

#[test]
fn autonomous_run_completes_items_in_rank_order() {
    let ws = seeded_workspace();
    let source = FileSource::new(&ws.paths().default_specs_dir, StatusLabels::default());
    let agent = ScriptedAgent::new(vec![
        ScriptedReply::complete(),
        ScriptedReply::complete(),
        ScriptedReply::complete(),
    ]);
    let vcs = RecordingVcs::new();
    let operator = ScriptedOperator::default();
    let options = LoopOptions {
        max_iterations: 10,
        ..LoopOptions::from_config(&WorkloopConfig::default(), RunMode::Autonomous)
    };

    let outcome = LoopController::new(ws.paths(), &source, &agent, &vcs, &operator, options)
        .run()
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::Completed);
    assert_eq!(outcome.completed, vec!["c-high", "b-mid", "a-low"]);
    assert_eq!(outcome.iterations_run, 3);
    assert!(
        source
            .list_items()
            .expect("list")
            .iter()
            .all(|item| item.status == ItemStatus::Done)
    );
}
