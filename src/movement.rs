use crate::maze::Maze;
use crate::types::Position;

/// A move is a straight, axis-aligned slide. Every cell from `from` to `to`
/// inclusive must be a passage, so walls cannot be crossed mid-slide.
pub fn is_legal(maze: &Maze, from: Position, to: Position) -> bool {
    if from.row != to.row && from.col != to.col {
        return false;
    }
    if !maze.contains(from) || !maze.contains(to) {
        return false;
    }

    if from.row == to.row {
        let (lo, hi) = (from.col.min(to.col), from.col.max(to.col));
        (lo..=hi).all(|col| maze.is_passage(Position::new(from.row, col)))
    } else {
        let (lo, hi) = (from.row.min(to.row), from.row.max(to.row));
        (lo..=hi).all(|row| maze.is_passage(Position::new(row, from.col)))
    }
}
