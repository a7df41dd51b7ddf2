use std::collections::BTreeMap;

use crate::economy;
use crate::error::Rejection;
use crate::maze::Maze;
use crate::movement::is_legal;
use crate::types::Position;

use super::MoveOutcome;

/// Independent token and budget per player. Nobody waits on anybody.
#[derive(Clone, Debug)]
pub struct RaceScheduler {
    start: Position,
    moves_per_turn: u32,
    positions: BTreeMap<String, Position>,
    moves: BTreeMap<String, u32>,
    finished: Vec<String>,
}

impl RaceScheduler {
    pub fn new(players: &[String], start: Position, moves_per_turn: u32) -> Self {
        let mut scheduler = Self {
            start,
            moves_per_turn,
            positions: BTreeMap::new(),
            moves: BTreeMap::new(),
            finished: Vec::new(),
        };
        for name in players {
            scheduler.admit(name);
        }
        scheduler
    }

    pub fn admit(&mut self, name: &str) {
        if self.positions.contains_key(name) {
            return;
        }
        self.positions.insert(name.to_string(), self.start);
        self.moves.insert(name.to_string(), self.moves_per_turn);
    }

    pub fn position_of(&self, name: &str) -> Option<Position> {
        self.positions.get(name).copied()
    }

    pub fn moves_of(&self, name: &str) -> Option<u32> {
        self.moves.get(name).copied()
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn moves(&self) -> &BTreeMap<String, u32> {
        &self.moves
    }

    pub fn finished(&self) -> &[String] {
        &self.finished
    }

    pub fn is_finished(&self, name: &str) -> bool {
        self.finished.iter().any(|finished| finished == name)
    }

    pub fn all_finished(&self) -> bool {
        self.positions.keys().all(|name| self.is_finished(name))
    }

    pub fn ensure_active(&self, name: &str) -> Result<(), Rejection> {
        if self.is_finished(name) {
            return Err(Rejection::PlayerFinished);
        }
        if !self.positions.contains_key(name) {
            return Err(Rejection::NotJoined);
        }
        Ok(())
    }

    pub fn apply_move(
        &mut self,
        maze: &Maze,
        player: &str,
        to: Position,
        balance: &mut i64,
    ) -> Result<MoveOutcome, Rejection> {
        self.ensure_active(player)?;
        let (Some(from), Some(budget)) = (
            self.positions.get_mut(player),
            self.moves.get_mut(player),
        ) else {
            return Err(Rejection::NotJoined);
        };
        if *budget == 0 {
            return Err(Rejection::NoMovesRemaining);
        }

        let legal = is_legal(maze, *from, to);
        economy::charge_move(balance);
        *budget -= 1;
        if legal {
            *from = to;
        }
        let outcome = MoveOutcome {
            legal,
            reached_end: legal && to == maze.end(),
            moves_left: *budget,
        };
        if outcome.reached_end {
            self.finished.push(player.to_string());
        }
        Ok(outcome)
    }

    /// The player's budget becomes `num_moves`. Caller must have passed
    /// `ensure_active` and charged the buyer.
    pub fn grant_moves(&mut self, player: &str, num_moves: u32) {
        if let Some(budget) = self.moves.get_mut(player) {
            *budget = num_moves;
        }
    }

    pub fn quit(&mut self, player: &str) -> Result<(), Rejection> {
        self.ensure_active(player)?;
        self.finished.push(player.to_string());
        Ok(())
    }
}
