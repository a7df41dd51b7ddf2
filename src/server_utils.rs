use crate::constants::{
    DEFAULT_MAZE_SIZE, DEFAULT_MOVES_PER_TURN, MAX_MAZE_SIZE, MAX_MOVES_PER_TURN,
};

pub fn normalize_moves_per_turn(value: Option<i64>) -> u32 {
    value
        .unwrap_or(i64::from(DEFAULT_MOVES_PER_TURN))
        .clamp(1, i64::from(MAX_MOVES_PER_TURN)) as u32
}

/// Only the upper bound is clamped; undersized mazes are left for the generator to refuse.
pub fn normalize_maze_size(value: Option<i64>) -> usize {
    value
        .unwrap_or(DEFAULT_MAZE_SIZE as i64)
        .clamp(0, MAX_MAZE_SIZE as i64) as usize
}

pub fn parse_history_limit(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|value| value.parse::<usize>().ok())
}

/// Player pages connect with `?view=player` or are served from `/player`.
pub fn is_player_view(view: Option<&str>, referer: Option<&str>) -> bool {
    if view.is_some_and(|value| value.trim().eq_ignore_ascii_case("player")) {
        return true;
    }
    referer.is_some_and(|value| value.contains("/player"))
}
