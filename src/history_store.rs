use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::session::{GameResult, HistoryRecorder};
use crate::types::{HistoryEntryView, HistoryResponse};

const STORE_VERSION: u8 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredHistoryEntry {
    name: String,
    games_played: u64,
    games_won: u64,
    total_points: i64,
    updated_at_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
struct HistoryStoreFile<'a> {
    version: u8,
    players: &'a HashMap<String, StoredHistoryEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct HistoryStoreFileRaw {
    version: u8,
    players: HashMap<String, serde_json::Value>,
}

/// Per-player win/points tally, persisted as a JSON file once per recorded game.
pub struct HistoryStore {
    file_path: PathBuf,
    players: HashMap<String, StoredHistoryEntry>,
}

impl HistoryStore {
    pub fn new(file_path: PathBuf) -> Self {
        let players = load_players(&file_path);
        Self { file_path, players }
    }

    pub fn build_response(&self, requested_limit: Option<usize>) -> HistoryResponse {
        HistoryResponse {
            generated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            entries: self.get_top(requested_limit),
        }
    }

    fn get_top(&self, requested_limit: Option<usize>) -> Vec<HistoryEntryView> {
        let normalized_limit = requested_limit.unwrap_or(10).clamp(1, 100);
        let mut entries: Vec<HistoryEntryView> = self
            .players
            .values()
            .map(|entry| HistoryEntryView {
                name: entry.name.clone(),
                games_won: entry.games_won.min(entry.games_played),
                games_played: entry.games_played,
                total_points: entry.total_points,
            })
            .collect();

        entries.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| a.name.cmp(&b.name))
        });
        entries.truncate(normalized_limit);
        entries
    }

    fn save(&self) {
        if let Some(parent) = self.file_path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                error!(path = %parent.display(), %err, "failed to create history directory");
                return;
            }
        }

        let payload = HistoryStoreFile {
            version: STORE_VERSION,
            players: &self.players,
        };
        match serde_json::to_string_pretty(&payload) {
            Ok(text) => {
                if let Err(err) = fs::write(&self.file_path, text) {
                    error!(path = %self.file_path.display(), %err, "failed to write history");
                }
            }
            Err(err) => {
                error!(path = %self.file_path.display(), %err, "failed to serialize history");
            }
        }
    }
}

impl HistoryStore {
    fn tally(&mut self, player_name: &str, points: i64, won: bool, now_ms: u64) {
        let name = player_name.trim();
        if name.is_empty() {
            return;
        }
        let entry = self
            .players
            .entry(name.to_string())
            .or_insert_with(|| StoredHistoryEntry {
                name: name.to_string(),
                games_played: 0,
                games_won: 0,
                total_points: 0,
                updated_at_ms: now_ms,
            });
        entry.games_played += 1;
        if won {
            entry.games_won += 1;
        }
        entry.total_points += points;
        entry.updated_at_ms = now_ms;
    }
}

impl HistoryRecorder for HistoryStore {
    fn record(&mut self, player_name: &str, points: i64, won: bool) {
        self.tally(player_name, points, won, now_ms());
        self.save();
    }

    /// Tallies the whole game, then writes the file once.
    fn record_game(&mut self, results: &[GameResult]) {
        if results.is_empty() {
            return;
        }
        let now_ms = now_ms();
        for result in results {
            self.tally(&result.player_name, result.points, result.won, now_ms);
        }
        self.save();
    }
}

/// Keeps every call in memory. Used by tests and the simulator.
#[derive(Clone, Debug, Default)]
pub struct MemoryHistory {
    pub records: Vec<(String, i64, bool)>,
    pub games: usize,
}

impl HistoryRecorder for MemoryHistory {
    fn record(&mut self, player_name: &str, points: i64, won: bool) {
        self.records.push((player_name.to_string(), points, won));
    }

    fn record_game(&mut self, results: &[GameResult]) {
        self.games += 1;
        for result in results {
            self.record(&result.player_name, result.points, result.won);
        }
    }
}

fn load_players(path: &Path) -> HashMap<String, StoredHistoryEntry> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %err, "failed to read history");
            }
            return HashMap::new();
        }
    };
    let parsed = match serde_json::from_str::<HistoryStoreFileRaw>(&text) {
        Ok(value) if value.version == STORE_VERSION => value,
        Ok(value) => {
            warn!(path = %path.display(), version = value.version, "unsupported history version");
            return HashMap::new();
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to parse history");
            return HashMap::new();
        }
    };

    let mut players = HashMap::new();
    for (key, raw_value) in parsed.players {
        let mut entry: StoredHistoryEntry = match serde_json::from_value(raw_value) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %path.display(), player = %key, %err, "skipping malformed history entry");
                continue;
            }
        };
        entry.name = entry.name.trim().to_string();
        if entry.name.is_empty() {
            continue;
        }
        entry.games_won = entry.games_won.min(entry.games_played);
        players.insert(entry.name.clone(), entry);
    }
    players
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
