#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;
use serde_json::Value;
use ulid::Ulid;

fn draftdb_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_draftdb") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/draftdb");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "draft-ingest-cli", "--bin", "draftdb"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build draftdb binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

fn temp_db(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("draftdb-contract-{label}-{}.sqlite3", Ulid::new()))
}

fn draftdb_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(draftdb_binary_path());
    command.env_remove("DRAFTDB_PATH");
    command.env_remove("DRAFTDB_CHAMPIONS");
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run draftdb command {:?}: {err}", args),
    }
}

fn ingest_fixture(db_path: &Path, records: &Path) -> Output {
    let records = records.to_string_lossy().to_string();
    let champions = fixture_path("champions.sample.json")
        .to_string_lossy()
        .to_string();
    draftdb_output(
        db_path,
        &[
            "ingest",
            "--input",
            &records,
            "--champions",
            &champions,
            "--json",
        ],
    )
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn count(db_path: &Path, table: &str) -> i64 {
    let conn = match Connection::open(db_path) {
        Ok(value) => value,
        Err(err) => panic!("failed to open db for inspection: {err}"),
    };
    match conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    }) {
        Ok(value) => value,
        Err(err) => panic!("failed to count {table}: {err}"),
    }
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(draftdb_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["ingest", "tournament", "games", "stats"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn ingest_report_contract_is_stable_and_rerun_is_a_no_op() {
    let db_path = temp_db("ingest");
    let records = fixture_path("records.sample.json");

    let first = ingest_fixture(&db_path, &records);
    assert!(
        first.status.success(),
        "ingest failed: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    let payload = stdout_json(&first);
    assert_eq!(
        payload["contract_version"],
        Value::String("ingest_batch.v1".to_string())
    );
    assert_eq!(payload["processed"], Value::from(2));
    assert_eq!(payload["failures"], Value::Array(Vec::new()));
    assert_eq!(payload["ingested"][0]["tournament"], Value::from("2017/Summer/EU"));
    assert_eq!(payload["ingested"][1]["tournament"], Value::from("2017/WRLDS"));
    assert_eq!(
        payload["ingested"][0]["bans"]["outcome"],
        serde_json::json!({"status": "written", "rows": 6})
    );
    // "Camille" is not in the sample champion table.
    assert_eq!(payload["unresolved_champions"], Value::from(1));

    let second = ingest_fixture(&db_path, &records);
    assert!(second.status.success());
    let payload = stdout_json(&second);
    assert_eq!(
        payload["ingested"][0]["bans"]["outcome"],
        serde_json::json!({"status": "already_present"})
    );

    assert_eq!(count(&db_path, "game"), 2);
    assert_eq!(count(&db_path, "team"), 3);
    assert_eq!(count(&db_path, "ban"), 10);
    assert_eq!(count(&db_path, "pick"), 7);

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn ingest_exits_non_zero_but_keeps_valid_records() {
    let db_path = temp_db("ingest-partial");
    let records_path =
        std::env::temp_dir().join(format!("draftdb-contract-records-{}.json", Ulid::new()));
    let body = serde_json::json!([
        {
            "region": "Atlantis_2017",
            "split": "Spring",
            "tourn_game_id": 1,
            "blue_team": "Team A",
            "red_team": "Team B",
            "winning_team": "blue"
        },
        {
            "region": "LCK",
            "season": "2018",
            "split": "Spring",
            "tourn_game_id": 2,
            "blue_team": "SKT T1",
            "red_team": "KT Rolster",
            "winning_team": "red",
            "bans": {"blue": ["Ahri"], "red": ["Braum"]},
            "picks": {"blue": [["Orianna", 3]], "red": [["Syndra", 3]]}
        }
    ]);
    if let Err(err) = std::fs::write(&records_path, body.to_string()) {
        panic!("failed to write records file: {err}");
    }

    let output = ingest_fixture(&db_path, &records_path);
    assert!(!output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload["failures"][0]["index"], Value::from(0));
    assert_eq!(payload["failures"][0]["kind"], Value::from("normalization"));
    assert_eq!(payload["ingested"][0]["tournament"], Value::from("2018/Spring/LCK"));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("1 of 2 records failed to ingest"),
        "expected stable error shape, got stderr={stderr}"
    );
    assert_eq!(count(&db_path, "game"), 1);
    assert_eq!(count(&db_path, "team"), 2);

    let _ = std::fs::remove_file(&db_path);
    let _ = std::fs::remove_file(&records_path);
}

#[test]
fn games_commands_read_back_ingested_drafts() {
    let db_path = temp_db("games");
    let ingest = ingest_fixture(&db_path, &fixture_path("records.sample.json"));
    assert!(ingest.status.success());

    let list = draftdb_output(&db_path, &["games", "list", "--tournament", "2017/WRLDS"]);
    assert!(list.status.success());
    let ids = stdout_json(&list);
    let Some(game_id) = ids[0].as_i64() else {
        panic!("expected one game id, got {ids}");
    };

    let show = draftdb_output(&db_path, &["games", "show", "--id", &game_id.to_string()]);
    assert!(show.status.success());
    let draft = stdout_json(&show);
    assert_eq!(draft["winner"], Value::from("blue"));
    assert_eq!(draft["tourn_game_id"], Value::from(12));
    // "kaisa" only resolves through the folded-name alias lookup.
    assert_eq!(draft["sides"]["red"]["bans"][1]["champion_id"], Value::from(145));
    assert_eq!(draft["sides"]["red"]["picks"][0]["champion_id"], Value::Null);

    let missing = draftdb_output(&db_path, &["games", "show", "--id", "9999"]);
    assert!(!missing.status.success());
    let stderr = String::from_utf8_lossy(&missing.stderr);
    assert!(stderr.contains("game not found"), "stderr={stderr}");

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn tournament_key_command_prints_canonical_key() {
    let db_path = temp_db("tournament");
    let output = draftdb_output(
        &db_path,
        &["tournament", "key", "--region", "2019_Mid-Season_Invitational"],
    );
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "2019/MSI");

    let output = draftdb_output(
        &db_path,
        &[
            "tournament",
            "key",
            "--region",
            "Europe",
            "--season",
            "2017 Season",
            "--split",
            "Summer",
        ],
    );
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "2017/Summer/EU");

    let output = draftdb_output(&db_path, &["tournament", "key", "--region", "2017_Worlds"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown international event"), "stderr={stderr}");
}
