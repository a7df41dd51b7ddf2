use serde_json::Value;

use crate::types::{GameMode, Position};

#[derive(Debug)]
pub enum ParsedClientMessage {
    JoinGame {
        name: String,
    },
    StartGame {
        moves_per_turn: Option<i64>,
        maze_size: Option<i64>,
        game_mode: Option<GameMode>,
    },
    MakeMove {
        position: Position,
    },
    BuyMoves {
        buy: bool,
        num_moves: i64,
    },
    QuitGame,
    ForceEndGame,
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "join_game" => {
            let name = object.get("name")?.as_str()?.to_string();
            Some(ParsedClientMessage::JoinGame { name })
        }
        "start_game" => {
            let moves_per_turn = parse_optional_i64(object.get("moves_per_turn"))?;
            let maze_size = parse_optional_i64(object.get("maze_size"))?;
            let game_mode = match object.get("game_mode") {
                None | Some(Value::Null) => None,
                Some(value) => Some(GameMode::parse(value.as_str()?)?),
            };
            Some(ParsedClientMessage::StartGame {
                moves_per_turn,
                maze_size,
                game_mode,
            })
        }
        "make_move" => {
            let position = parse_position(object.get("position")?)?;
            Some(ParsedClientMessage::MakeMove { position })
        }
        "buy_moves" => {
            let buy = match object.get("buy") {
                None => false,
                Some(value) => value.as_bool()?,
            };
            let num_moves = parse_optional_i64(object.get("num_moves"))?.unwrap_or(1);
            Some(ParsedClientMessage::BuyMoves { buy, num_moves })
        }
        "quit_game" => Some(ParsedClientMessage::QuitGame),
        "force_end_game" => Some(ParsedClientMessage::ForceEndGame),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

/// `[row, col]`; each coordinate must fit an `i32`.
fn parse_position(value: &Value) -> Option<Position> {
    let [row, col] = value.as_array()?.as_slice() else {
        return None;
    };
    let row = i32::try_from(parse_optional_i64(Some(row))??).ok()?;
    let col = i32::try_from(parse_optional_i64(Some(col))??).ok()?;
    Some(Position::new(row, col))
}

fn parse_optional_i64(value: Option<&Value>) -> Option<Option<i64>> {
    const MAX_SAFE_INTEGER_F64: f64 = 9_007_199_254_740_991.0;

    let Some(value) = value else {
        return Some(None);
    };
    if value.is_null() {
        return Some(None);
    }
    if let Some(number) = value.as_i64() {
        return Some(Some(number));
    }
    if let Some(number) = value.as_u64() {
        return i64::try_from(number).ok().map(Some);
    }
    if let Some(number) = value.as_f64() {
        if number.is_finite() {
            let floored = number.floor();
            if floored.abs() > MAX_SAFE_INTEGER_F64 {
                return None;
            }
            return Some(Some(floored as i64));
        }
    }
    None
}
