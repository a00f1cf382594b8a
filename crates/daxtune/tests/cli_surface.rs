use std::path::Path;

use clap::Parser;
use daxtune::cli::app::{Cli, Command};

#[test]
fn parses_global_runtime_flags_for_prepare() {
    let cli = Cli::parse_from([
        "daxtune",
        "--fixture",
        "/tmp/model.json",
        "--runs",
        "5",
        "--threshold",
        "12.5",
        "--timeout-secs",
        "30",
        "prepare",
        "--dataset",
        "Sales",
        "EVALUATE ROW(\"x\", 1)",
    ]);

    assert_eq!(cli.runtime.fixture.as_deref(), Some(Path::new("/tmp/model.json")));
    assert_eq!(cli.runtime.runs, Some(5));
    assert_eq!(cli.runtime.threshold, Some(12.5));
    assert_eq!(cli.runtime.timeout_secs, Some(30));

    match cli.command {
        Command::Prepare(args) => {
            assert_eq!(args.connection.dataset.as_deref(), Some("Sales"));
            assert_eq!(args.input.query.as_deref(), Some("EVALUATE ROW(\"x\", 1)"));
            assert!(args.input.query_file.is_none());
        }
        other => panic!("expected prepare command, got {other:?}"),
    }
}

#[test]
fn parses_connect_targeting_flags() {
    let cli = Cli::parse_from([
        "daxtune", "connect", "--group", "Finance", "--dataset", "Budget", "--topology", "remote",
    ]);

    match cli.command {
        Command::Connect(args) => {
            let request = args.to_request();
            assert_eq!(request.group.as_deref(), Some("Finance"));
            assert_eq!(request.dataset.as_deref(), Some("Budget"));
            assert_eq!(request.topology.as_deref(), Some("remote"));
            assert!(request.port.is_none());
        }
        other => panic!("expected connect command, got {other:?}"),
    }
}

#[test]
fn tune_collects_repeated_rewrites() {
    let cli = Cli::parse_from([
        "daxtune",
        "tune",
        "--port",
        "51000",
        "--query-file",
        "baseline.dax",
        "--rewrite",
        "a.dax",
        "--rewrite",
        "b.dax",
    ]);

    match cli.command {
        Command::Tune(args) => {
            assert_eq!(args.connection.port, Some(51000));
            assert_eq!(args.input.query_file.as_deref(), Some(Path::new("baseline.dax")));
            assert_eq!(args.rewrites.len(), 2);
        }
        other => panic!("expected tune command, got {other:?}"),
    }
}

#[test]
fn tune_requires_at_least_one_rewrite() {
    let err = Cli::try_parse_from(["daxtune", "tune", "--port", "51000", "EVALUATE x"])
        .expect_err("missing --rewrite must fail");
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
}

#[test]
fn inline_query_conflicts_with_query_file() {
    let err = Cli::try_parse_from([
        "daxtune",
        "prepare",
        "EVALUATE x",
        "--query-file",
        "q.dax",
    ])
    .expect_err("both query sources must fail");
    assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
}
