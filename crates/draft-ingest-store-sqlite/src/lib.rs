#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{Context, Result};
use draft_ingest_core::{
    normalize_tournament, resolve_champion, team_region, ChampionId, ChampionResolution,
    ChampionResolver, DraftKind, MatchRecord, NormalizeError, Side, Sided, TournamentKey,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

const BATCH_CONTRACT_VERSION: &str = "ingest_batch.v1";

const SCHEMA_DRAFT_V1: &str = r"
CREATE TABLE IF NOT EXISTS team (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  region TEXT,
  display_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS game (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  tournament TEXT NOT NULL,
  tourn_game_id INTEGER NOT NULL,
  blue_team_id INTEGER NOT NULL,
  red_team_id INTEGER NOT NULL,
  winning_team INTEGER NOT NULL CHECK (winning_team IN (0, 1)),
  UNIQUE (tournament, tourn_game_id),
  FOREIGN KEY (blue_team_id) REFERENCES team(id),
  FOREIGN KEY (red_team_id) REFERENCES team(id)
);

CREATE TABLE IF NOT EXISTS ban (
  game_id INTEGER NOT NULL,
  champion_id INTEGER,
  selection_order INTEGER NOT NULL CHECK (selection_order >= 1),
  side_id INTEGER NOT NULL CHECK (side_id IN (0, 1)),
  PRIMARY KEY (game_id, side_id, selection_order),
  FOREIGN KEY (game_id) REFERENCES game(id)
);

CREATE TABLE IF NOT EXISTS pick (
  game_id INTEGER NOT NULL,
  champion_id INTEGER,
  position_id INTEGER NOT NULL,
  selection_order INTEGER NOT NULL CHECK (selection_order >= 1),
  side_id INTEGER NOT NULL CHECK (side_id IN (0, 1)),
  PRIMARY KEY (game_id, side_id, selection_order),
  FOREIGN KEY (game_id) REFERENCES game(id)
);

CREATE TRIGGER IF NOT EXISTS trg_ban_no_update
BEFORE UPDATE ON ban
BEGIN
  SELECT RAISE(FAIL, 'ban rows are write-once');
END;

CREATE TRIGGER IF NOT EXISTS trg_ban_no_delete
BEFORE DELETE ON ban
BEGIN
  SELECT RAISE(FAIL, 'ban rows are write-once');
END;

CREATE TRIGGER IF NOT EXISTS trg_pick_no_update
BEFORE UPDATE ON pick
BEGIN
  SELECT RAISE(FAIL, 'pick rows are write-once');
END;

CREATE TRIGGER IF NOT EXISTS trg_pick_no_delete
BEFORE DELETE ON pick
BEGIN
  SELECT RAISE(FAIL, 'pick rows are write-once');
END;

CREATE INDEX IF NOT EXISTS idx_game_tournament ON game(tournament, id);
";

/// Fatal per-record failures raised by the upsert protocol.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("record cannot be normalized: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("integrity error: {entity} {key} still missing after insert attempt")]
    Integrity { entity: &'static str, key: String },
}

pub struct SqliteDraftStore {
    conn: Connection,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DraftWriteOutcome {
    Written { rows: usize },
    AlreadyPresent,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct UnresolvedChampion {
    pub side: Side,
    pub selection_order: i64,
    pub name: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct DraftWriteReport {
    pub game_id: i64,
    pub kind: DraftKind,
    pub outcome: DraftWriteOutcome,
    pub unresolved: Vec<UnresolvedChampion>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RecordReport {
    pub tournament: TournamentKey,
    pub tourn_game_id: i64,
    pub game_id: i64,
    pub bans: DraftWriteReport,
    pub picks: DraftWriteReport,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Normalization,
    Integrity,
    Storage,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RecordFailure {
    pub index: usize,
    pub tourn_game_id: i64,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub contract_version: String,
    pub processed: usize,
    pub ingested: Vec<RecordReport>,
    pub failures: Vec<RecordFailure>,
    pub unresolved_champions: usize,
}

impl BatchReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct BanRow {
    pub champion_id: Option<ChampionId>,
    pub selection_order: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct PickRow {
    pub champion_id: Option<ChampionId>,
    pub position_id: i64,
    pub selection_order: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SideDraft {
    pub bans: Vec<BanRow>,
    pub picks: Vec<PickRow>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct MatchDraft {
    pub game_id: i64,
    pub tournament: String,
    pub tourn_game_id: i64,
    pub winner: Side,
    pub sides: Sided<SideDraft>,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct StoreCounts {
    pub teams: i64,
    pub games: i64,
    pub bans: i64,
    pub picks: i64,
}

impl SqliteDraftStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Creates the four draft tables when absent. Existing data is untouched.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA_DRAFT_V1)
            .context("failed to apply draft schema")?;
        Ok(())
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the team id for one side of `record`, inserting the team on
    /// first sight.
    pub fn ensure_team(&mut self, record: &MatchRecord, side: Side) -> Result<i64> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start team transaction")?;
        let team_id = ensure_team_in(&tx, record, side)?;
        tx.commit().context("failed to commit team transaction")?;
        Ok(team_id)
    }

    /// Returns the game id for `record`, creating both teams and the game
    /// row when the game has not been seen before.
    pub fn ensure_game(&mut self, record: &MatchRecord) -> Result<i64> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start game transaction")?;
        let game_id = ensure_game_in(&tx, record)?;
        tx.commit().context("failed to commit game transaction")?;
        Ok(game_id)
    }

    /// Looks up a game that callers expect to exist already, recreating it
    /// with a warning when it does not.
    pub fn get_or_fetch_game_id(&mut self, record: &MatchRecord) -> Result<i64> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start game lookup transaction")?;
        let game_id = get_or_fetch_game_id_in(&tx, record)?;
        tx.commit()
            .context("failed to commit game lookup transaction")?;
        Ok(game_id)
    }

    pub fn write_bans<R: ChampionResolver + ?Sized>(
        &mut self,
        record: &MatchRecord,
        resolver: &R,
    ) -> Result<DraftWriteReport> {
        self.write_draft(record, resolver, DraftKind::Ban)
    }

    pub fn write_picks<R: ChampionResolver + ?Sized>(
        &mut self,
        record: &MatchRecord,
        resolver: &R,
    ) -> Result<DraftWriteReport> {
        self.write_draft(record, resolver, DraftKind::Pick)
    }

    /// Writes the full ban or pick set of a game in one transaction, or
    /// nothing at all when any row of that kind is already stored.
    fn write_draft<R: ChampionResolver + ?Sized>(
        &mut self,
        record: &MatchRecord,
        resolver: &R,
        kind: DraftKind,
    ) -> Result<DraftWriteReport> {
        let tx = self
            .conn
            .transaction()
            .with_context(|| format!("failed to start {kind} transaction"))?;

        let game_id = get_or_fetch_game_id_in(&tx, record)?;

        if draft_rows_exist(&tx, kind, game_id)? {
            info!(game_id, kind = %kind, "draft rows already present; skipping");
            tx.commit()
                .with_context(|| format!("failed to commit {kind} transaction"))?;
            return Ok(DraftWriteReport {
                game_id,
                kind,
                outcome: DraftWriteOutcome::AlreadyPresent,
                unresolved: Vec::new(),
            });
        }

        let mut rows = 0_usize;
        let mut unresolved = Vec::new();
        for side in Side::ALL {
            for (index, entry) in draft_entries(record, kind, side).into_iter().enumerate() {
                let selection_order =
                    i64::try_from(index + 1).context("selection order out of range")?;
                let resolution = resolve_champion(resolver, entry.name);
                match &resolution {
                    ChampionResolution::Unresolved => {
                        warn!(
                            game_id,
                            kind = %kind,
                            side = %side,
                            selection_order,
                            champion = entry.name,
                            "unresolved champion reference; writing null champion_id"
                        );
                        unresolved.push(UnresolvedChampion {
                            side,
                            selection_order,
                            name: entry.name.to_string(),
                        });
                    }
                    ChampionResolution::ResolvedViaAlias { canonical_name, .. } => {
                        debug!(
                            champion = entry.name,
                            canonical = canonical_name.as_str(),
                            "champion resolved through alias"
                        );
                    }
                    ChampionResolution::Resolved(_) | ChampionResolution::NoSelection => {}
                }

                insert_draft_row(
                    &tx,
                    kind,
                    game_id,
                    resolution.champion_id(),
                    entry.position,
                    selection_order,
                    side,
                )?;
                rows += 1;
            }
        }

        tx.commit()
            .with_context(|| format!("failed to commit {kind} transaction"))?;
        debug!(game_id, kind = %kind, rows, "draft rows written");

        Ok(DraftWriteReport {
            game_id,
            kind,
            outcome: DraftWriteOutcome::Written { rows },
            unresolved,
        })
    }

    /// Runs game, ban and pick writes for one record.
    pub fn ingest_record<R: ChampionResolver + ?Sized>(
        &mut self,
        record: &MatchRecord,
        resolver: &R,
    ) -> Result<RecordReport> {
        let tournament = normalize_tournament(record).map_err(IngestError::from)?;
        let game_id = self.ensure_game(record)?;
        let bans = self.write_bans(record, resolver)?;
        let picks = self.write_picks(record, resolver)?;

        Ok(RecordReport {
            tournament,
            tourn_game_id: record.tourn_game_id,
            game_id,
            bans,
            picks,
        })
    }

    /// Ingests every record, collecting failures instead of stopping at the
    /// first one.
    pub fn ingest_batch<R: ChampionResolver + ?Sized>(
        &mut self,
        records: &[MatchRecord],
        resolver: &R,
    ) -> BatchReport {
        let mut ingested = Vec::new();
        let mut failures = Vec::new();

        for (index, record) in records.iter().enumerate() {
            match self.ingest_record(record, resolver) {
                Ok(report) => ingested.push(report),
                Err(err) => {
                    let kind = classify_failure(&err);
                    let message = format!("{err:#}");
                    warn!(
                        index,
                        tourn_game_id = record.tourn_game_id,
                        ?kind,
                        error = %message,
                        "record rejected"
                    );
                    failures.push(RecordFailure {
                        index,
                        tourn_game_id: record.tourn_game_id,
                        kind,
                        message,
                    });
                }
            }
        }

        let unresolved_champions: usize = ingested
            .iter()
            .map(|item: &RecordReport| item.bans.unresolved.len() + item.picks.unresolved.len())
            .sum();

        info!(
            processed = records.len(),
            ingested = ingested.len(),
            failed = failures.len(),
            unresolved_champions,
            "batch ingest finished"
        );

        BatchReport {
            contract_version: BATCH_CONTRACT_VERSION.to_string(),
            processed: records.len(),
            ingested,
            failures,
            unresolved_champions,
        }
    }

    pub fn game_ids_by_tournament(&self, tournament: &str) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM game WHERE tournament = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![tournament], |row| row.get(0))?;
        collect_rows(rows)
    }

    /// Reads back the stored draft of one game, ordered by selection order.
    pub fn match_draft(&self, game_id: i64) -> Result<Option<MatchDraft>> {
        let header = self
            .conn
            .query_row(
                "SELECT tournament, tourn_game_id, winning_team FROM game WHERE id = ?1",
                params![game_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        parse_side(row.get(2)?)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to load game {game_id}"))?;

        let Some((tournament, tourn_game_id, winner)) = header else {
            return Ok(None);
        };

        Ok(Some(MatchDraft {
            game_id,
            tournament,
            tourn_game_id,
            winner,
            sides: Sided {
                blue: self.side_draft(game_id, Side::Blue)?,
                red: self.side_draft(game_id, Side::Red)?,
            },
        }))
    }

    fn side_draft(&self, game_id: i64, side: Side) -> Result<SideDraft> {
        let mut stmt = self.conn.prepare(
            "SELECT champion_id, selection_order FROM ban
             WHERE game_id = ?1 AND side_id = ?2
             ORDER BY selection_order ASC",
        )?;
        let bans = collect_rows(stmt.query_map(params![game_id, side.id()], |row| {
            Ok(BanRow {
                champion_id: row.get(0)?,
                selection_order: row.get(1)?,
            })
        })?)?;

        let mut stmt = self.conn.prepare(
            "SELECT champion_id, position_id, selection_order FROM pick
             WHERE game_id = ?1 AND side_id = ?2
             ORDER BY selection_order ASC",
        )?;
        let picks = collect_rows(stmt.query_map(params![game_id, side.id()], |row| {
            Ok(PickRow {
                champion_id: row.get(0)?,
                position_id: row.get(1)?,
                selection_order: row.get(2)?,
            })
        })?)?;

        Ok(SideDraft { bans, picks })
    }

    pub fn table_counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            teams: count_rows(&self.conn, "SELECT COUNT(*) FROM team")?,
            games: count_rows(&self.conn, "SELECT COUNT(*) FROM game")?,
            bans: count_rows(&self.conn, "SELECT COUNT(*) FROM ban")?,
            picks: count_rows(&self.conn, "SELECT COUNT(*) FROM pick")?,
        })
    }
}

struct DraftEntry<'a> {
    name: &'a str,
    position: Option<i64>,
}

fn draft_entries(record: &MatchRecord, kind: DraftKind, side: Side) -> Vec<DraftEntry<'_>> {
    match kind {
        DraftKind::Ban => record
            .bans
            .get(side)
            .iter()
            .map(|name| DraftEntry {
                name: name.as_str(),
                position: None,
            })
            .collect(),
        DraftKind::Pick => record
            .picks
            .get(side)
            .iter()
            .map(|pick| DraftEntry {
                name: &pick.champion,
                position: Some(pick.position),
            })
            .collect(),
    }
}

fn select_team_id(conn: &Connection, display_name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM team WHERE display_name = ?1",
        params![display_name],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("failed to look up team {display_name:?}"))
}

fn ensure_team_in(conn: &Connection, record: &MatchRecord, side: Side) -> Result<i64> {
    let display_name = record.team(side);
    if let Some(team_id) = select_team_id(conn, display_name)? {
        return Ok(team_id);
    }

    let region = team_region(record).map_err(IngestError::from)?;
    let inserted = conn
        .execute(
            "INSERT INTO team(region, display_name) VALUES (?1, ?2)
             ON CONFLICT(display_name) DO NOTHING",
            params![region, display_name],
        )
        .with_context(|| format!("failed to insert team {display_name:?}"))?;
    debug!(team = display_name, region = ?region, inserted, "team insert attempted");

    select_team_id(conn, display_name)?.ok_or_else(|| {
        IngestError::Integrity {
            entity: "team",
            key: display_name.to_string(),
        }
        .into()
    })
}

fn select_game_id(
    conn: &Connection,
    tournament: &TournamentKey,
    tourn_game_id: i64,
) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM game WHERE tournament = ?1 AND tourn_game_id = ?2",
        params![tournament.as_str(), tourn_game_id],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("failed to look up game {tournament}#{tourn_game_id}"))
}

fn ensure_game_in(conn: &Connection, record: &MatchRecord) -> Result<i64> {
    let tournament = normalize_tournament(record).map_err(IngestError::from)?;
    if let Some(game_id) = select_game_id(conn, &tournament, record.tourn_game_id)? {
        debug!(game_id, tournament = %tournament, "game already present");
        return Ok(game_id);
    }
    insert_game(conn, record, &tournament)
}

fn get_or_fetch_game_id_in(conn: &Connection, record: &MatchRecord) -> Result<i64> {
    let tournament = normalize_tournament(record).map_err(IngestError::from)?;
    if let Some(game_id) = select_game_id(conn, &tournament, record.tourn_game_id)? {
        return Ok(game_id);
    }
    warn!(
        tournament = %tournament,
        tourn_game_id = record.tourn_game_id,
        "game not found before draft write; creating it"
    );
    insert_game(conn, record, &tournament)
}

/// Single creation attempt: teams, then the game row, then one re-read.
fn insert_game(conn: &Connection, record: &MatchRecord, tournament: &TournamentKey) -> Result<i64> {
    let blue_team_id = ensure_team_in(conn, record, Side::Blue)?;
    let red_team_id = ensure_team_in(conn, record, Side::Red)?;

    let inserted = conn
        .execute(
            "INSERT INTO game(tournament, tourn_game_id, blue_team_id, red_team_id, winning_team)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tournament, tourn_game_id) DO NOTHING",
            params![
                tournament.as_str(),
                record.tourn_game_id,
                blue_team_id,
                red_team_id,
                record.winning_team.id(),
            ],
        )
        .with_context(|| {
            format!(
                "failed to insert game {tournament}#{}",
                record.tourn_game_id
            )
        })?;
    debug!(
        tournament = %tournament,
        tourn_game_id = record.tourn_game_id,
        inserted,
        "game insert attempted"
    );

    select_game_id(conn, tournament, record.tourn_game_id)?.ok_or_else(|| {
        IngestError::Integrity {
            entity: "game",
            key: format!("{tournament}#{}", record.tourn_game_id),
        }
        .into()
    })
}

fn draft_rows_exist(conn: &Connection, kind: DraftKind, game_id: i64) -> Result<bool> {
    let sql = match kind {
        DraftKind::Ban => "SELECT 1 FROM ban WHERE game_id = ?1 LIMIT 1",
        DraftKind::Pick => "SELECT 1 FROM pick WHERE game_id = ?1 LIMIT 1",
    };
    let exists = conn
        .query_row(sql, params![game_id], |_| Ok(()))
        .optional()
        .with_context(|| format!("failed to check existing {kind} rows for game {game_id}"))?
        .is_some();
    Ok(exists)
}

fn insert_draft_row(
    conn: &Connection,
    kind: DraftKind,
    game_id: i64,
    champion_id: Option<ChampionId>,
    position: Option<i64>,
    selection_order: i64,
    side: Side,
) -> Result<()> {
    match kind {
        DraftKind::Ban => conn.execute(
            "INSERT INTO ban(game_id, champion_id, selection_order, side_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![game_id, champion_id, selection_order, side.id()],
        ),
        DraftKind::Pick => conn.execute(
            "INSERT INTO pick(game_id, champion_id, position_id, selection_order, side_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![game_id, champion_id, position, selection_order, side.id()],
        ),
    }
    .with_context(|| {
        format!("failed to insert {kind} row {side}#{selection_order} for game {game_id}")
    })?;
    Ok(())
}

fn classify_failure(err: &anyhow::Error) -> FailureKind {
    match err.downcast_ref::<IngestError>() {
        Some(IngestError::Normalize(_)) => FailureKind::Normalization,
        Some(IngestError::Integrity { .. }) => FailureKind::Integrity,
        None => FailureKind::Storage,
    }
}

fn parse_side(raw: i64) -> rusqlite::Result<Side> {
    Side::from_id(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid side id: {raw}"),
            )),
        )
    })
}

fn count_rows(conn: &Connection, sql: &str) -> Result<i64> {
    conn.query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to run count query: {sql}"))
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
