//! Full pipeline dry runs: generation, uniqueness, output and checkpoints,
//! no database required.

use rqg::config::{
    CheckpointSettings, OutputSettings, OutputSinkKind, RunConfig, UniquenessMode,
    UniquenessSettings,
};
use rqg::grammars;
use rqg_runner::{Checkpoint, CheckpointCadence};

fn base_config(seed: u64) -> RunConfig {
    RunConfig {
        grammar: "smoke".to_string(),
        count: Some(500),
        workers: Some(2),
        batch: 50,
        seed: Some(seed),
        ..RunConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dry_run_writes_one_statement_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("queries.sql");
    let mut config = base_config(11);
    config.uniqueness = UniquenessSettings {
        mode: UniquenessMode::Off,
        ..UniquenessSettings::default()
    };
    config.output = OutputSettings {
        sink: OutputSinkKind::File,
        path: Some(out_path.clone()),
    };

    let grammar = grammars::builtin("smoke").unwrap();
    let summary = rqg::run::run(&config, grammar, None).await.unwrap();
    assert_eq!(summary.generated, 500);
    assert_eq!(summary.submitted, 500);

    let content = std::fs::read_to_string(&out_path).unwrap();
    assert!(content.ends_with('\n'));
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 500);
    assert!(lines.iter().all(|line| line.ends_with(';')));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_seed_same_output() {
    let grammar = grammars::builtin("smoke").unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut outputs = Vec::new();
    for run_index in 0..2 {
        let out_path = dir.path().join(format!("run{run_index}.sql"));
        let mut config = base_config(77);
        config.uniqueness.mode = UniquenessMode::Off;
        config.output = OutputSettings {
            sink: OutputSinkKind::File,
            path: Some(out_path.clone()),
        };
        rqg::run::run(&config, grammar.clone(), None).await.unwrap();
        let mut lines: Vec<String> = std::fs::read_to_string(&out_path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        lines.sort();
        outputs.push(lines);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fixup_hook_drops_queries() {
    let mut config = base_config(5);
    config.uniqueness.mode = UniquenessMode::Off;
    let grammar = grammars::builtin("smoke").unwrap();
    let fixup: rqg_runner::FixupHook =
        std::sync::Arc::new(|sql: &str| {
            if sql.starts_with("DELETE") {
                None
            } else {
                Some(sql.to_string())
            }
        });
    let summary = rqg::run::run(&config, grammar, Some(fixup)).await.unwrap();
    assert!(summary.dropped > 0);
    assert_eq!(summary.submitted + summary.dropped, 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checkpoint_written_and_resume_validated() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint_path = dir.path().join("run.checkpoint");
    let mut config = base_config(9);
    config.uniqueness.mode = UniquenessMode::Off;
    config.checkpoint = CheckpointSettings {
        path: Some(checkpoint_path.clone()),
        every: CheckpointCadence::Queries(100),
    };

    let grammar = grammars::builtin("smoke").unwrap();
    rqg::run::run(&config, grammar.clone(), None).await.unwrap();

    let checkpoint = Checkpoint::load(&checkpoint_path).unwrap();
    assert_eq!(checkpoint.master_seed, 9);
    assert_eq!(checkpoint.workers, 2);
    assert_eq!(checkpoint.done.iter().sum::<u64>(), 500);

    // Resuming a finished run generates nothing further.
    let summary = rqg::run::run(&config, grammar.clone(), None).await.unwrap();
    assert_eq!(summary.generated, 0);

    // A conflicting configuration is checkpoint corruption, not a restart.
    let mut conflicting = config.clone();
    conflicting.seed = Some(10);
    let error = rqg::run::run(&conflicting, grammar, None).await.unwrap_err();
    assert_eq!(error.exit_code(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_uniqueness_filter_counts_collisions() {
    // A one-value grammar forces every query after the first into the
    // retry path and then through as a counted collision.
    let grammar = rqg_grammar::GrammarBuilder::new("constant")
        .rule("query", rqg_grammar::dsl::lit("SELECT 1;"))
        .freeze()
        .unwrap();
    let mut config = base_config(3);
    config.grammar = "constant".to_string();
    config.count = Some(50);
    config.workers = Some(1);
    config.uniqueness = UniquenessSettings {
        mode: UniquenessMode::Probabilistic,
        fpr: 0.01,
        capacity: 1024,
    };
    let summary = rqg::run::run(&config, grammar, None).await.unwrap();
    assert_eq!(summary.duplicate_collisions, 49);
    assert_eq!(summary.submitted, 50);
}
