use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the source's listening history, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default, rename = "playedAt", alias = "played_at")]
    pub played_at: Option<String>,
}

impl Track {
    pub fn new(title: &str, artist: &str, album: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            played_at: None,
        }
    }

    pub fn with_played_at(mut self, played_at: &str) -> Self {
        self.played_at = Some(played_at.to_string());
        self
    }

    /// `None` when any identity field is missing or empty.
    pub fn key(&self) -> Option<LedgerKey> {
        Some(LedgerKey {
            title: non_empty(&self.title)?.to_string(),
            artist: non_empty(&self.artist)?.to_string(),
            album: non_empty(&self.album)?.to_string(),
        })
    }

    pub fn display_name(&self) -> String {
        format!(
            "{} by {}",
            self.title.as_deref().unwrap_or("?"),
            self.artist.as_deref().unwrap_or("?")
        )
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerKey {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} [{}]", self.artist, self.title, self.album)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub key: LedgerKey,
    pub array_position: usize,
    pub max_array_position: usize,
    #[serde(default)]
    pub first_time: bool,
    pub last_seen_at: DateTime<Utc>,
}

pub type Ledger = HashMap<LedgerKey, LedgerEntry>;

pub fn ledger_from_entries(entries: Vec<LedgerEntry>) -> Ledger {
    entries
        .into_iter()
        .map(|entry| (entry.key.clone(), entry))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    NewSong,
    Reproduction,
    PositionUpdate,
    FirstTime,
    FirstTimeNoScrobble,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::NewSong => "new_song",
            Reason::Reproduction => "reproduction",
            Reason::PositionUpdate => "position_update",
            Reason::FirstTime => "first_time",
            Reason::FirstTimeNoScrobble => "first_time_no_scrobble",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationDecision {
    pub track: Track,
    pub key: LedgerKey,
    pub position: usize,
    pub reason: Reason,
    pub should_submit: bool,
    pub previous_position: Option<usize>,
}

/// Decides, for every valid track of today's history, whether it has to be scrobbled.
///
/// Positions are 1-based over the unfiltered history, so dropping an invalid
/// track never renumbers the ones after it. Within one pass a repeated key is
/// compared against the high-water mark left by its earlier occurrence.
pub fn reconcile(
    history: &[Track],
    ledger: &Ledger,
    is_first_run: bool,
    first_run_cap: usize,
) -> Vec<ReconciliationDecision> {
    let valid = history
        .iter()
        .enumerate()
        .filter_map(|(index, track)| track.key().map(|key| (index + 1, track, key)));

    if is_first_run {
        return valid
            .enumerate()
            .map(|(rank, (position, track, key))| {
                let should_submit = rank < first_run_cap;
                ReconciliationDecision {
                    track: track.clone(),
                    key,
                    position,
                    reason: if should_submit {
                        Reason::FirstTime
                    } else {
                        Reason::FirstTimeNoScrobble
                    },
                    should_submit,
                    previous_position: None,
                }
            })
            .collect();
    }

    let mut high_water: HashMap<LedgerKey, usize> = HashMap::new();
    let mut decisions = Vec::new();
    for (position, track, key) in valid {
        let known_max = high_water
            .get(&key)
            .copied()
            .or_else(|| ledger.get(&key).map(|entry| entry.max_array_position));
        let (reason, should_submit, previous_position) = match known_max {
            None => (Reason::NewSong, true, None),
            Some(max) if position < max => (Reason::Reproduction, true, Some(max)),
            Some(_) => (Reason::PositionUpdate, false, None),
        };
        high_water.insert(key.clone(), known_max.map_or(position, |max| max.max(position)));
        decisions.push(ReconciliationDecision {
            track: track.clone(),
            key,
            position,
            reason,
            should_submit,
            previous_position,
        });
    }
    decisions
}

/// Ledger keys with no matching track anywhere in today's history.
pub fn stale_keys(history: &[Track], ledger: &Ledger) -> Vec<LedgerKey> {
    let present: HashSet<LedgerKey> = history.iter().filter_map(Track::key).collect();
    let mut stale: Vec<LedgerKey> = ledger
        .keys()
        .filter(|key| !present.contains(*key))
        .cloned()
        .collect();
    stale.sort();
    stale
}

pub fn upserted_entry(
    existing: Option<&LedgerEntry>,
    key: &LedgerKey,
    position: usize,
    is_first_run: bool,
    now: DateTime<Utc>,
) -> LedgerEntry {
    match existing {
        Some(entry) => LedgerEntry {
            key: key.clone(),
            array_position: position,
            max_array_position: entry.max_array_position.max(position),
            first_time: entry.first_time,
            last_seen_at: now,
        },
        None => LedgerEntry {
            key: key.clone(),
            array_position: position,
            max_array_position: position,
            first_time: is_first_run,
            last_seen_at: now,
        },
    }
}
