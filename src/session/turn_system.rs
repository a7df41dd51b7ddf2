use crate::economy;
use crate::error::Rejection;
use crate::maze::Maze;
use crate::movement::is_legal;
use crate::types::Position;

use super::MoveOutcome;

/// One shared token; players act in join order, one budget per turn.
#[derive(Clone, Debug)]
pub struct TurnScheduler {
    order: Vec<String>,
    index: usize,
    position: Position,
    moves_remaining: u32,
    moves_per_turn: u32,
    advance_pending: bool,
    serial: u64,
}

impl TurnScheduler {
    pub fn new(order: Vec<String>, start: Position, moves_per_turn: u32) -> Self {
        Self {
            order,
            index: 0,
            position: start,
            moves_remaining: moves_per_turn,
            moves_per_turn,
            advance_pending: false,
            serial: 0,
        }
    }

    pub fn current_player(&self) -> Option<&str> {
        self.order.get(self.index).map(String::as_str)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn moves_remaining(&self) -> u32 {
        self.moves_remaining
    }

    /// Bumped on every advance; a delayed advance carrying an older serial is stale.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn advance_pending(&self) -> bool {
        self.advance_pending
    }

    pub fn admit(&mut self, name: &str) {
        if !self.order.iter().any(|existing| existing == name) {
            self.order.push(name.to_string());
        }
    }

    pub fn advance_turn(&mut self) {
        if self.order.is_empty() {
            return;
        }
        self.index = (self.index + 1) % self.order.len();
        self.moves_remaining = self.moves_per_turn;
        self.advance_pending = false;
        self.serial += 1;
    }

    /// Marks the current turn as ending. Returns the serial to schedule the
    /// advance with, or `None` when one is already on its way.
    pub fn request_advance(&mut self) -> Option<u64> {
        if self.advance_pending {
            return None;
        }
        self.advance_pending = true;
        Some(self.serial)
    }

    pub fn ensure_turn(&self, player: &str) -> Result<(), Rejection> {
        if self.current_player() != Some(player) {
            return Err(Rejection::NotYourTurn);
        }
        if self.advance_pending {
            return Err(Rejection::TurnEnding);
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
        self.ensure_turn(player)?;
        if self.moves_remaining == 0 {
            return Err(Rejection::NoMovesRemaining);
        }

        let legal = is_legal(maze, self.position, to);
        economy::charge_move(balance);
        self.moves_remaining -= 1;
        if legal {
            self.position = to;
        }

        Ok(MoveOutcome {
            legal,
            reached_end: legal && to == maze.end(),
            moves_left: self.moves_remaining,
        })
    }

    /// Replaces whatever is left of the turn's budget. Caller must have
    /// passed `ensure_turn` and charged the buyer.
    pub fn grant_moves(&mut self, num_moves: u32) {
        self.moves_remaining = num_moves;
    }
}
