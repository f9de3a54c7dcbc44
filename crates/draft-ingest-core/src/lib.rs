use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Source marker for a ban or pick slot that was left empty.
pub const NO_SELECTION: &str = "none";

/// Tracked domestic regions and the short code stored on team rows and in
/// tournament keys.
pub const REGION_ABBREVIATIONS: &[(&str, &str)] = &[
    ("North_America", "NA"),
    ("Europe", "EU"),
    ("LCK", "LCK"),
    ("LPL", "LPL"),
    ("LMS", "LMS"),
];

/// International events recorded without a split.
pub const INTERNATIONAL_EVENTS: &[(&str, &str)] = &[
    ("Mid-Season_Invitational", "MSI"),
    ("Rift_Rivals", "RR"),
    ("World_Championship", "WRLDS"),
];

pub type ChampionId = i64;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum NormalizeError {
    #[error("no year digits found in {field} value {value:?}")]
    MissingYear { field: &'static str, value: String },
    #[error("unknown region {0:?}")]
    UnknownRegion(String),
    #[error("unknown international event {event:?} (from region {region:?})")]
    UnknownEvent { region: String, event: String },
    #[error("invalid year pattern: {0}")]
    Pattern(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Blue,
    Red,
}

impl Side {
    /// Blue is always written before red.
    pub const ALL: [Side; 2] = [Side::Blue, Side::Red];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Red => "red",
        }
    }

    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Blue => 0,
            Self::Red => 1,
        }
    }

    #[must_use]
    pub fn from_id(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Blue),
            1 => Some(Self::Red),
            _ => None,
        }
    }

}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One value per side of a game.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Sided<T> {
    pub blue: T,
    pub red: T,
}

impl<T> Sided<T> {
    #[must_use]
    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Blue => &self.blue,
            Side::Red => &self.red,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(from = "(String, i64)", into = "(String, i64)")]
pub struct PickSelection {
    pub champion: String,
    pub position: i64,
}

impl From<(String, i64)> for PickSelection {
    fn from((champion, position): (String, i64)) -> Self {
        Self { champion, position }
    }
}

impl From<PickSelection> for (String, i64) {
    fn from(value: PickSelection) -> Self {
        (value.champion, value.position)
    }
}

/// A single game as delivered by the match data source.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MatchRecord {
    pub region: String,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub split: Option<String>,
    pub tourn_game_id: i64,
    pub blue_team: String,
    pub red_team: String,
    pub winning_team: Side,
    #[serde(default)]
    pub bans: Sided<Vec<String>>,
    #[serde(default)]
    pub picks: Sided<Vec<PickSelection>>,
}

impl MatchRecord {
    #[must_use]
    pub fn team(&self, side: Side) -> &str {
        match side {
            Side::Blue => &self.blue_team,
            Side::Red => &self.red_team,
        }
    }

    /// Domestic records carry a split; international events do not.
    #[must_use]
    pub fn is_international(&self) -> bool {
        self.split.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DraftKind {
    Ban,
    Pick,
}

impl DraftKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Pick => "pick",
        }
    }
}

impl Display for DraftKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Canonical `year/body` tournament identifier, e.g. `2017/Summer/EU`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct TournamentKey(String);

impl TournamentKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TournamentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Derives the canonical tournament key for a record.
///
/// # Errors
/// Returns [`NormalizeError`] when no year can be found or the region/event
/// name is outside the tracked tables.
pub fn normalize_tournament(record: &MatchRecord) -> Result<TournamentKey, NormalizeError> {
    normalize_tournament_fields(
        &record.region,
        record.season.as_deref(),
        record.split.as_deref(),
    )
}

/// Field-level form of [`normalize_tournament`].
///
/// The year comes from the first digit run of `season` when present,
/// otherwise from `region`.
///
/// # Errors
/// See [`normalize_tournament`].
pub fn normalize_tournament_fields(
    region: &str,
    season: Option<&str>,
    split: Option<&str>,
) -> Result<TournamentKey, NormalizeError> {
    let year = match season {
        Some(season) => first_digit_run(season)?.ok_or_else(|| NormalizeError::MissingYear {
            field: "season",
            value: season.to_string(),
        })?,
        None => first_digit_run(region)?.ok_or_else(|| NormalizeError::MissingYear {
            field: "region",
            value: region.to_string(),
        })?,
    };

    let body = match split {
        Some(split) => format!("{split}/{}", region_code(region)?),
        None => {
            let event = strip_year_digits(region)?;
            lookup(INTERNATIONAL_EVENTS, &event)
                .ok_or_else(|| NormalizeError::UnknownEvent {
                    region: region.to_string(),
                    event: event.clone(),
                })?
                .to_string()
        }
    };

    Ok(TournamentKey(format!("{year}/{body}")))
}

/// Region stored on team rows: `None` for international records, where
/// wildcard teams can appear.
///
/// # Errors
/// Returns [`NormalizeError::UnknownRegion`] for an untracked domestic region.
pub fn team_region(record: &MatchRecord) -> Result<Option<&'static str>, NormalizeError> {
    if record.is_international() {
        return Ok(None);
    }
    region_code(&record.region).map(Some)
}

/// Looks up the region code, falling back to the name with any year
/// digits removed (`2017_Europe` resolves as `Europe`).
///
/// # Errors
/// Returns [`NormalizeError::UnknownRegion`] when neither form is tracked.
pub fn region_code(region: &str) -> Result<&'static str, NormalizeError> {
    if let Some(code) = lookup(REGION_ABBREVIATIONS, region) {
        return Ok(code);
    }
    lookup(REGION_ABBREVIATIONS, &strip_year_digits(region)?)
        .ok_or_else(|| NormalizeError::UnknownRegion(region.to_string()))
}

fn lookup(table: &[(&str, &'static str)], name: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, code)| *code)
}

static YEAR_DIGITS: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
static YEAR_RUN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn compiled(
    cell: &'static OnceLock<Result<Regex, regex::Error>>,
    pattern: &str,
) -> Result<&'static Regex, NormalizeError> {
    cell.get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(|err| NormalizeError::Pattern(err.to_string()))
}

fn first_digit_run(value: &str) -> Result<Option<&str>, NormalizeError> {
    let pattern = compiled(&YEAR_DIGITS, "[0-9]+")?;
    Ok(pattern.find(value).as_ref().map(regex::Match::as_str))
}

/// Removes every `_?[0-9]+_?` run, e.g. `2019_Mid-Season_Invitational`
/// becomes `Mid-Season_Invitational`.
fn strip_year_digits(value: &str) -> Result<String, NormalizeError> {
    let pattern = compiled(&YEAR_RUN, "_?[0-9]+_?")?;
    Ok(pattern.split(value).collect())
}

/// Lookup service mapping champion display names to stable ids.
pub trait ChampionResolver {
    fn resolve_by_name(&self, name: &str) -> Option<ChampionId>;

    /// Maps a known alias or variant spelling to the canonical display name.
    fn resolve_alias(&self, name: &str) -> Option<String>;
}

impl<R: ChampionResolver + ?Sized> ChampionResolver for &R {
    fn resolve_by_name(&self, name: &str) -> Option<ChampionId> {
        (**self).resolve_by_name(name)
    }

    fn resolve_alias(&self, name: &str) -> Option<String> {
        (**self).resolve_alias(name)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ChampionResolution {
    NoSelection,
    Resolved(ChampionId),
    ResolvedViaAlias {
        champion_id: ChampionId,
        canonical_name: String,
    },
    Unresolved,
}

impl ChampionResolution {
    #[must_use]
    pub fn champion_id(&self) -> Option<ChampionId> {
        match self {
            Self::Resolved(champion_id) | Self::ResolvedViaAlias { champion_id, .. } => {
                Some(*champion_id)
            }
            Self::NoSelection | Self::Unresolved => None,
        }
    }
}

/// Resolves one draft entry: literal name first, then its alias.
pub fn resolve_champion<R: ChampionResolver + ?Sized>(
    resolver: &R,
    name: &str,
) -> ChampionResolution {
    if name == NO_SELECTION {
        return ChampionResolution::NoSelection;
    }
    if let Some(champion_id) = resolver.resolve_by_name(name) {
        return ChampionResolution::Resolved(champion_id);
    }
    match resolver.resolve_alias(name) {
        Some(canonical_name) => match resolver.resolve_by_name(&canonical_name) {
            Some(champion_id) => ChampionResolution::ResolvedViaAlias {
                champion_id,
                canonical_name,
            },
            None => ChampionResolution::Unresolved,
        },
        None => ChampionResolution::Unresolved,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct ChampionTableFile {
    champions: BTreeMap<String, ChampionId>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

/// In-memory champion table. Alias lookups ignore case and punctuation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChampionTable {
    champions: BTreeMap<String, ChampionId>,
    aliases: BTreeMap<String, String>,
    folded_names: BTreeMap<String, String>,
}

impl ChampionTable {
    #[must_use]
    pub fn new(
        champions: BTreeMap<String, ChampionId>,
        aliases: BTreeMap<String, String>,
    ) -> Self {
        let folded_names = champions
            .keys()
            .map(|name| (fold_name(name), name.clone()))
            .collect();
        let aliases = aliases
            .into_iter()
            .map(|(alias, canonical)| (fold_name(&alias), canonical))
            .collect();
        Self {
            champions,
            aliases,
            folded_names,
        }
    }

    /// Parses `{"champions": {name: id}, "aliases": {alias: name}}`.
    ///
    /// # Errors
    /// Returns the underlying JSON error for malformed input.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let file: ChampionTableFile = serde_json::from_str(raw)?;
        Ok(Self::new(file.champions, file.aliases))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.champions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.champions.is_empty()
    }
}

impl ChampionResolver for ChampionTable {
    fn resolve_by_name(&self, name: &str) -> Option<ChampionId> {
        self.champions.get(name).copied()
    }

    fn resolve_alias(&self, name: &str) -> Option<String> {
        let folded = fold_name(name);
        self.aliases
            .get(&folded)
            .or_else(|| self.folded_names.get(&folded))
            .cloned()
    }
}

fn fold_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
