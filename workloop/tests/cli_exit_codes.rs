//! End-to-end checks of the `workloop` binary: exit codes and on-disk effects.

use std::path::Path;
use std::process::{Command, Output};

use workloop::core::types::ItemStatus;
use workloop::exit_codes;
use workloop::io::config::{BoardConfig, WorkloopConfig, load_config, write_config};
use workloop::io::paths::WorkloopPaths;
use workloop::test_support::{TestWorkspace, work_item};

fn workloop(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_workloop"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn workloop")
}

fn code(output: &Output) -> i32 {
    output.status.code().expect("exit code")
}

fn edit_config(paths: &WorkloopPaths, edit: impl FnOnce(&mut WorkloopConfig)) {
    let mut config = load_config(&paths.config_path).expect("load config");
    edit(&mut config);
    write_config(&paths.config_path, &config).expect("write config");
}

#[test]
fn init_then_status_reports_no_session() {
    let temp = tempfile::tempdir().expect("tempdir");

    let init = workloop(temp.path(), &["init"]);
    assert_eq!(code(&init), exit_codes::OK, "{init:?}");
    assert!(temp.path().join(".workloop/config.toml").is_file());

    let again = workloop(temp.path(), &["init"]);
    assert_eq!(code(&again), exit_codes::INVALID);

    let status = workloop(temp.path(), &["status"]);
    assert_eq!(code(&status), exit_codes::OK, "{status:?}");
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("session:    none"));
    assert!(stdout.contains("no actionable work items"));
}

#[test]
fn afk_without_work_items_exits_no_work() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(code(&workloop(temp.path(), &["init"])), exit_codes::OK);

    let afk = workloop(temp.path(), &["afk"]);
    assert_eq!(code(&afk), exit_codes::NO_WORK, "{afk:?}");
    assert!(!temp.path().join(".workloop/run.lock").exists());
}

#[test]
fn conflicting_sources_exit_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(code(&workloop(temp.path(), &["init"])), exit_codes::OK);
    edit_config(&WorkloopPaths::new(temp.path()), |config| {
        config.board = Some(BoardConfig {
            id: "team-board".to_string(),
        });
    });

    let rank = workloop(temp.path(), &["rank"]);
    assert_eq!(code(&rank), exit_codes::INVALID);
    assert!(String::from_utf8_lossy(&rank.stderr).contains("conflicting work-item sources"));

    let rank = workloop(temp.path(), &["rank", "--source", "files"]);
    assert_eq!(code(&rank), exit_codes::NO_WORK, "{rank:?}");
}

#[cfg(unix)]
#[test]
fn once_with_completing_agent_marks_item_done() {
    let ws = TestWorkspace::new().expect("workspace");
    assert_eq!(code(&workloop(ws.path(), &["init"])), exit_codes::OK);
    edit_config(ws.paths(), |config| {
        config.agent.command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat > /dev/null; echo '<promise>COMPLETE</promise>'".to_string(),
        ];
        config.vcs.enabled = false;
    });
    ws.write_item(&work_item("auth", ItemStatus::Todo, "- [ ] design api\n"))
        .expect("write item");

    let once = workloop(ws.path(), &["once"]);
    assert_eq!(code(&once), exit_codes::OK, "{once:?}");
    assert!(String::from_utf8_lossy(&once.stdout).contains("completed auth"));

    let item = std::fs::read_to_string(ws.paths().default_specs_dir.join("auth.md"))
        .expect("item file");
    assert!(item.contains("status: done"), "{item}");
    assert!(!ws.paths().session_path.exists());

    let status = workloop(ws.path(), &["status"]);
    assert!(String::from_utf8_lossy(&status.stdout).contains("session:    none"));
}

#[cfg(unix)]
#[test]
fn reset_keeps_state_of_a_live_run_unless_forced() {
    let ws = TestWorkspace::new().expect("workspace");
    assert_eq!(code(&workloop(ws.path(), &["init"])), exit_codes::OK);
    let session = ws.paths().session_path.clone();
    std::fs::write(&session, "{}").expect("write session");
    // This test process stands in for the running holder.
    std::fs::write(&ws.paths().lock_path, format!("{}\n", std::process::id()))
        .expect("write lock");

    let reset = workloop(ws.path(), &["reset"]);
    assert_eq!(code(&reset), exit_codes::INVALID, "{reset:?}");
    assert!(String::from_utf8_lossy(&reset.stderr).contains("--force"));
    assert!(session.exists());
    assert!(ws.paths().lock_path.exists());

    let forced = workloop(ws.path(), &["reset", "--force"]);
    assert_eq!(code(&forced), exit_codes::OK, "{forced:?}");
    assert!(!session.exists());
    assert!(!ws.paths().lock_path.exists());
}

#[test]
fn agent_timeout_flag_is_validated() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(code(&workloop(temp.path(), &["init"])), exit_codes::OK);

    let rank = workloop(temp.path(), &["rank", "--agent-timeout", "0"]);
    assert_eq!(code(&rank), exit_codes::INVALID, "{rank:?}");
    assert!(String::from_utf8_lossy(&rank.stderr).contains("agent.timeout_secs"));
}
