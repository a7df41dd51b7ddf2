use std::collections::{HashMap, HashSet, VecDeque};

use crate::constants::MIN_MAZE_SIZE;
use crate::error::MazeError;
use crate::rng::Rng;
use crate::types::Position;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cell {
    Wall,
    Passage,
}

/// Square grid with a passage path from `start` to `end`. Never mutated after generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Maze {
    size: usize,
    cells: Vec<Vec<Cell>>,
}

impl Maze {
    /// `#` is wall, anything else is passage. Rows must all be `rows.len()` wide.
    pub fn from_rows(rows: &[&str]) -> Self {
        let size = rows.len();
        let cells = rows
            .iter()
            .map(|row| {
                row.chars()
                    .map(|c| if c == '#' { Cell::Wall } else { Cell::Passage })
                    .collect()
            })
            .collect();
        Self { size, cells }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn start(&self) -> Position {
        Position::new(1, 1)
    }

    pub fn end(&self) -> Position {
        let last = self.size as i32 - 2;
        Position::new(last, last)
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.row >= 0
            && pos.col >= 0
            && (pos.row as usize) < self.size
            && (pos.col as usize) < self.size
    }

    pub fn cell(&self, pos: Position) -> Option<Cell> {
        if !self.contains(pos) {
            return None;
        }
        self.cells
            .get(pos.row as usize)
            .and_then(|row| row.get(pos.col as usize))
            .copied()
    }

    pub fn is_passage(&self, pos: Position) -> bool {
        self.cell(pos) == Some(Cell::Passage)
    }

    pub fn to_grid(&self) -> Vec<Vec<u8>> {
        self.cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Cell::Wall => 1,
                        Cell::Passage => 0,
                    })
                    .collect()
            })
            .collect()
    }

    pub fn has_path(&self) -> bool {
        reachable_interior(&self.cells, self.size, self.start()).contains(&self.end())
    }
}

const CARVE_STEPS: [(i32, i32); 4] = [(0, 2), (2, 0), (0, -2), (-2, 0)];

pub fn generate_maze(size: usize, rng: &mut Rng) -> Result<Maze, MazeError> {
    if size < MIN_MAZE_SIZE {
        return Err(MazeError::TooSmall {
            size,
            min: MIN_MAZE_SIZE,
        });
    }

    let mut cells = vec![vec![Cell::Wall; size]; size];
    carve_from(&mut cells, size, Position::new(1, 1), rng);

    let maze_end = (size - 2) as i32;
    let start = Position::new(1, 1);
    let end = Position::new(maze_end, maze_end);
    set_passage(&mut cells, start);
    set_passage(&mut cells, end);

    if !reachable_interior(&cells, size, start).contains(&end) {
        for (dr, dc) in [(-1, 0), (0, -1), (-2, 0), (0, -2)] {
            set_passage(&mut cells, Position::new(end.row + dr, end.col + dc));
        }
    }

    Ok(Maze { size, cells })
}

/// Depth-first carve with an explicit stack. Each frame keeps its own shuffled
/// direction list and resumes it after the child returns, which is the same
/// order a recursive carve visits cells in.
fn carve_from(cells: &mut [Vec<Cell>], size: usize, origin: Position, rng: &mut Rng) {
    struct Frame {
        at: Position,
        dirs: [(i32, i32); 4],
        next: usize,
    }

    fn open(cells: &mut [Vec<Cell>], at: Position, rng: &mut Rng) -> Frame {
        set_passage(cells, at);
        let mut dirs = CARVE_STEPS;
        rng.shuffle(&mut dirs);
        Frame { at, dirs, next: 0 }
    }

    let limit = size as i32 - 1;
    let mut stack = vec![open(cells, origin, rng)];
    while let Some(frame) = stack.last_mut() {
        if frame.next >= frame.dirs.len() {
            stack.pop();
            continue;
        }
        let (dr, dc) = frame.dirs[frame.next];
        frame.next += 1;
        let at = frame.at;
        let to = Position::new(at.row + dr, at.col + dc);
        if to.row <= 0 || to.col <= 0 || to.row >= limit || to.col >= limit {
            continue;
        }
        if cells[to.row as usize][to.col as usize] != Cell::Wall {
            continue;
        }
        set_passage(cells, Position::new(at.row + dr / 2, at.col + dc / 2));
        let child = open(cells, to, rng);
        stack.push(child);
    }
}

fn set_passage(cells: &mut [Vec<Cell>], pos: Position) {
    if pos.row < 0 || pos.col < 0 {
        return;
    }
    if let Some(cell) = cells
        .get_mut(pos.row as usize)
        .and_then(|row| row.get_mut(pos.col as usize))
    {
        *cell = Cell::Passage;
    }
}

/// BFS over 4-neighbour passages, never leaving the interior.
fn reachable_interior(cells: &[Vec<Cell>], size: usize, start: Position) -> HashSet<Position> {
    let mut out = HashSet::new();
    let limit = size as i32 - 1;
    let inside = |p: Position| p.row > 0 && p.col > 0 && p.row < limit && p.col < limit;
    if !inside(start) || cells[start.row as usize][start.col as usize] != Cell::Passage {
        return out;
    }

    let mut queue = VecDeque::new();
    out.insert(start);
    queue.push_back(start);

    while let Some(at) = queue.pop_front() {
        for (dr, dc) in [(0, 1), (1, 0), (0, -1), (-1, 0)] {
            let next = Position::new(at.row + dr, at.col + dc);
            if !inside(next) {
                continue;
            }
            if cells[next.row as usize][next.col as usize] != Cell::Passage {
                continue;
            }
            if out.insert(next) {
                queue.push_back(next);
            }
        }
    }

    out
}

/// Shortest passage path from `from` to `to`, both ends included.
pub fn shortest_path(maze: &Maze, from: Position, to: Position) -> Option<Vec<Position>> {
    if !maze.is_passage(from) || !maze.is_passage(to) {
        return None;
    }
    let mut came_from = HashMap::new();
    let mut queue = VecDeque::new();
    came_from.insert(from, from);
    queue.push_back(from);

    while let Some(at) = queue.pop_front() {
        if at == to {
            let mut path = vec![at];
            let mut cursor = at;
            while cursor != from {
                cursor = came_from[&cursor];
                path.push(cursor);
            }
            path.reverse();
            return Some(path);
        }
        for (dr, dc) in [(0, 1), (1, 0), (0, -1), (-1, 0)] {
            let next = Position::new(at.row + dr, at.col + dc);
            if !maze.is_passage(next) || came_from.contains_key(&next) {
                continue;
            }
            came_from.insert(next, at);
            queue.push_back(next);
        }
    }
    None
}
