use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    #[default]
    TurnBased,
    Race,
}

impl GameMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "turn_based" => Some(Self::TurnBased),
            "race" => Some(Self::Race),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnBased => "turn_based",
            Self::Race => "race",
        }
    }
}

/// Grid coordinate. Serialized as `[row, col]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Position {
    pub row: i32,
    pub col: i32,
}

impl Position {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }
}

impl From<[i32; 2]> for Position {
    fn from(value: [i32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Position> for [i32; 2] {
    fn from(value: Position) -> Self {
        [value.row, value.col]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayerView {
    pub color: String,
    pub color_name: String,
    pub order: usize,
    pub connected: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameSnapshot {
    pub is_running: bool,
    pub game_mode: GameMode,
    pub players: Vec<String>,
    pub player_colors: BTreeMap<String, PlayerView>,
    pub player_points: BTreeMap<String, i64>,
    /// Row-major, `1` = wall, `0` = passage.
    pub maze: Option<Vec<Vec<u8>>>,
    pub current_position: Option<Position>,
    pub player_positions: BTreeMap<String, Position>,
    pub start_position: Option<Position>,
    pub end_position: Option<Position>,
    pub current_player: Option<String>,
    pub moves_remaining: u32,
    pub player_moves: BTreeMap<String, u32>,
    pub winner: Option<String>,
    pub finished_players: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Welcome {
        is_host: bool,
    },
    JoinSuccess {
        name: String,
        color: String,
    },
    JoinError {
        message: String,
    },
    GameError {
        message: String,
    },
    GameStarted,
    GameUpdate(Box<GameSnapshot>),
    MoveResult {
        valid: bool,
        message: String,
    },
    MoveError {
        message: String,
    },
    OfferBuyMoves {
        points: i64,
        cost: i64,
        max_moves: i64,
    },
    OfferQuit {
        message: String,
    },
    BuySuccess {
        message: String,
    },
    BuyError {
        message: String,
    },
    QuitSuccess {
        message: String,
    },
    GameOver {
        winner: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_scores: Option<BTreeMap<String, i64>>,
        forced: bool,
    },
    Error {
        message: String,
    },
    Pong {
        t: f64,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntryView {
    pub name: String,
    pub games_won: u64,
    pub games_played: u64,
    pub total_points: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryResponse {
    pub generated_at_iso: String,
    pub entries: Vec<HistoryEntryView>,
}
