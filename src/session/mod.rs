//! The single maze-race session: roster, lifecycle, and the active scheduler.
//!
//! Every command returns [`Effects`]: messages for the transport to deliver and
//! timers for it to schedule. The session never sleeps or talks to sockets
//! itself, so the transport can apply commands one at a time under a lock and
//! flush their effects before releasing it.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::constants::{
    palette_entry, FINISH_DISPLAY_DELAY_MS, FORCED_END_DISPLAY_DELAY_MS, STARTING_POINTS,
    TURN_ADVANCE_DELAY_MS,
};
use crate::economy::{self, BudgetExhausted};
use crate::error::Rejection;
use crate::maze::{generate_maze, Maze};
use crate::rng::Rng;
use crate::types::{GameMode, GameSnapshot, PlayerView, Position, ServerEvent};

mod race_system;
mod turn_system;

pub use self::race_system::RaceScheduler;
pub use self::turn_system::TurnScheduler;

/// One player's standing when a session ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameResult {
    pub player_name: String,
    pub points: i64,
    pub won: bool,
}

/// Receives every player's result once whenever a session ends.
pub trait HistoryRecorder {
    fn record(&mut self, player_name: &str, points: i64, won: bool);

    fn record_game(&mut self, results: &[GameResult]) {
        for result in results {
            self.record(&result.player_name, result.points, result.won);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Ended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub legal: bool,
    pub reached_end: bool,
    pub moves_left: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Recipient {
    Client(String),
    All,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub event: ServerEvent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    AdvanceTurn { serial: u64 },
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub epoch: u64,
    pub kind: TimerKind,
    pub delay_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Effects {
    pub messages: Vec<Outbound>,
    pub timers: Vec<ScheduledTimer>,
    /// Outstanding timers belong to a finished epoch; drop them before scheduling `timers`.
    pub cancel_pending: bool,
}

impl Effects {
    fn reply(&mut self, client_id: &str, event: ServerEvent) {
        self.messages.push(Outbound {
            to: Recipient::Client(client_id.to_string()),
            event,
        });
    }

    fn broadcast(&mut self, event: ServerEvent) {
        self.messages.push(Outbound {
            to: Recipient::All,
            event,
        });
    }

    fn schedule(&mut self, epoch: u64, kind: TimerKind, delay_ms: u64) {
        self.timers.push(ScheduledTimer {
            epoch,
            kind,
            delay_ms,
        });
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameSettings {
    pub moves_per_turn: u32,
    pub maze_size: usize,
    pub mode: GameMode,
}

#[derive(Clone, Debug)]
pub struct Player {
    pub name: String,
    pub color: &'static str,
    pub color_name: &'static str,
    pub order: usize,
    pub client_id: Option<String>,
    pub connected: bool,
    pub points: i64,
}

#[derive(Clone, Debug)]
enum Board {
    Turn(TurnScheduler),
    Race(RaceScheduler),
}

pub struct Session<R: HistoryRecorder> {
    players: HashMap<String, Player>,
    player_order: Vec<String>,
    client_names: HashMap<String, String>,
    phase: Phase,
    mode: GameMode,
    maze: Option<Maze>,
    board: Option<Board>,
    winner: Option<String>,
    epoch: u64,
    rng: Rng,
    history: R,
}

impl<R: HistoryRecorder> Session<R> {
    pub fn new(history: R, seed: u32) -> Self {
        Self {
            players: HashMap::new(),
            player_order: Vec::new(),
            client_names: HashMap::new(),
            phase: Phase::Idle,
            mode: GameMode::TurnBased,
            maze: None,
            board: None,
            winner: None,
            epoch: 0,
            rng: Rng::new(seed),
            history,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn maze(&self) -> Option<&Maze> {
        self.maze.as_ref()
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    pub fn player_order(&self) -> &[String] {
        &self.player_order
    }

    pub fn name_for_client(&self, client_id: &str) -> Option<&str> {
        self.client_names.get(client_id).map(String::as_str)
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn history(&self) -> &R {
        &self.history
    }

    pub fn current_player(&self) -> Option<&str> {
        match self.board.as_ref() {
            Some(Board::Turn(turns)) => turns.current_player(),
            _ => None,
        }
    }

    pub fn position_of(&self, name: &str) -> Option<Position> {
        match self.board.as_ref()? {
            Board::Turn(turns) => Some(turns.position()),
            Board::Race(race) => race.position_of(name),
        }
    }

    /// Moves `name` could make right now, ignoring whose turn it is.
    pub fn moves_left_for(&self, name: &str) -> u32 {
        match self.board.as_ref() {
            Some(Board::Turn(turns)) if turns.current_player() == Some(name) => {
                turns.moves_remaining()
            }
            Some(Board::Race(race)) => race.moves_of(name).unwrap_or(0),
            _ => 0,
        }
    }

    pub fn is_finished(&self, name: &str) -> bool {
        match self.board.as_ref() {
            Some(Board::Race(race)) => race.is_finished(name),
            _ => false,
        }
    }

    pub fn join(&mut self, client_id: &str, raw_name: &str) -> Result<Effects, Rejection> {
        let name = raw_name.trim();
        if name.is_empty() {
            return Err(Rejection::EmptyName);
        }
        if let Some(bound) = self.client_names.get(client_id) {
            if bound == name {
                return Err(Rejection::NameInUse);
            }
            return Err(Rejection::AlreadyJoined(bound.clone()));
        }

        let color = match self.players.get_mut(name) {
            Some(player) if player.connected => return Err(Rejection::NameInUse),
            Some(player) => {
                player.connected = true;
                player.client_id = Some(client_id.to_string());
                info!(player = name, "player rejoined");
                player.color
            }
            None => {
                let order = self.player_order.len();
                let palette = palette_entry(order);
                self.players.insert(
                    name.to_string(),
                    Player {
                        name: name.to_string(),
                        color: palette.color,
                        color_name: palette.name,
                        order,
                        client_id: Some(client_id.to_string()),
                        connected: true,
                        points: STARTING_POINTS,
                    },
                );
                self.player_order.push(name.to_string());
                info!(player = name, order, "player joined");
                palette.color
            }
        };
        self.client_names
            .insert(client_id.to_string(), name.to_string());

        if self.phase == Phase::Running {
            match self.board.as_mut() {
                Some(Board::Turn(turns)) => turns.admit(name),
                Some(Board::Race(race)) => race.admit(name),
                None => {}
            }
        }

        let mut effects = Effects::default();
        effects.reply(
            client_id,
            ServerEvent::JoinSuccess {
                name: name.to_string(),
                color: color.to_string(),
            },
        );
        effects.broadcast(self.update_event());
        Ok(effects)
    }

    pub fn start(&mut self, is_host: bool, settings: GameSettings) -> Result<Effects, Rejection> {
        if !is_host {
            return Err(Rejection::NotHost);
        }
        match self.phase {
            Phase::Running => return Err(Rejection::AlreadyRunning),
            Phase::Ended => return Err(Rejection::ResetPending),
            Phase::Idle => {}
        }
        if self.player_order.is_empty() {
            return Err(Rejection::NoPlayers);
        }

        let maze = generate_maze(settings.maze_size, &mut self.rng)?;

        for player in self.players.values_mut() {
            player.points = STARTING_POINTS;
        }
        self.epoch += 1;
        self.mode = settings.mode;
        self.winner = None;
        self.board = Some(match settings.mode {
            GameMode::TurnBased => Board::Turn(TurnScheduler::new(
                self.player_order.clone(),
                maze.start(),
                settings.moves_per_turn,
            )),
            GameMode::Race => Board::Race(RaceScheduler::new(
                &self.player_order,
                maze.start(),
                settings.moves_per_turn,
            )),
        });
        self.maze = Some(maze);
        self.phase = Phase::Running;

        info!(
            players = self.player_order.len(),
            mode = settings.mode.as_str(),
            maze_size = settings.maze_size,
            moves_per_turn = settings.moves_per_turn,
            "game started"
        );

        let mut effects = Effects::default();
        effects.broadcast(ServerEvent::GameStarted);
        effects.broadcast(self.update_event());
        Ok(effects)
    }

    pub fn make_move(&mut self, client_id: &str, to: Position) -> Result<Effects, Rejection> {
        let name = self.running_player(client_id)?;
        let (Some(maze), Some(board), Some(player)) = (
            self.maze.as_ref(),
            self.board.as_mut(),
            self.players.get_mut(&name),
        ) else {
            return Err(Rejection::NotRunning);
        };

        let outcome = match board {
            Board::Turn(turns) => turns.apply_move(maze, &name, to, &mut player.points)?,
            Board::Race(race) => race.apply_move(maze, &name, to, &mut player.points)?,
        };
        debug!(
            player = %name,
            row = to.row,
            col = to.col,
            legal = outcome.legal,
            moves_left = outcome.moves_left,
            "move applied"
        );

        let mut effects = Effects::default();
        effects.reply(
            client_id,
            ServerEvent::MoveResult {
                valid: outcome.legal,
                message: if outcome.legal {
                    "Valid move!".to_string()
                } else {
                    "Invalid move - wall in the way!".to_string()
                },
            },
        );

        if outcome.reached_end {
            info!(player = %name, "player reached the end");
            self.finish(Some(name), false, &mut effects);
            return Ok(effects);
        }

        effects.broadcast(self.update_event());
        if outcome.moves_left == 0 {
            self.offer_after_exhaustion(client_id, &name, &mut effects);
        }
        Ok(effects)
    }

    /// `buy = false` or a non-positive count is a decline.
    pub fn buy_moves(
        &mut self,
        client_id: &str,
        buy: bool,
        num_moves: i64,
    ) -> Result<Effects, Rejection> {
        let name = self.running_player(client_id)?;
        match self.board.as_ref() {
            Some(Board::Turn(turns)) => turns.ensure_turn(&name)?,
            Some(Board::Race(race)) => race.ensure_active(&name)?,
            None => return Err(Rejection::NotRunning),
        }

        let mut effects = Effects::default();
        let num_moves = if buy && num_moves > 0 {
            u32::try_from(num_moves).unwrap_or(u32::MAX)
        } else {
            0
        };
        if num_moves == 0 {
            self.end_turn_early(&mut effects);
            return Ok(effects);
        }

        let Some(player) = self.players.get_mut(&name) else {
            return Err(Rejection::NotJoined);
        };
        if economy::try_buy(&mut player.points, num_moves) {
            match self.board.as_mut() {
                Some(Board::Turn(turns)) => turns.grant_moves(num_moves),
                Some(Board::Race(race)) => race.grant_moves(&name, num_moves),
                None => {}
            }
            info!(player = %name, num_moves, "extra moves bought");
            effects.broadcast(self.update_event());
            effects.reply(
                client_id,
                ServerEvent::BuySuccess {
                    message: format!("You bought {num_moves} extra moves!"),
                },
            );
            return Ok(effects);
        }

        effects.reply(
            client_id,
            ServerEvent::BuyError {
                message: "Not enough points!".to_string(),
            },
        );
        match self.board.as_ref() {
            Some(Board::Race(_)) => effects.reply(client_id, out_of_moves_offer()),
            _ => self.end_turn_early(&mut effects),
        }
        Ok(effects)
    }

    /// Race mode only; a no-op in turn-based mode.
    pub fn quit(&mut self, client_id: &str) -> Result<Effects, Rejection> {
        let name = self.running_player(client_id)?;
        let Some(Board::Race(race)) = self.board.as_mut() else {
            return Ok(Effects::default());
        };
        race.quit(&name)?;
        let everyone_done = race.all_finished();
        info!(player = %name, "player quit");

        let mut effects = Effects::default();
        effects.reply(
            client_id,
            ServerEvent::QuitSuccess {
                message: "You have quit the game".to_string(),
            },
        );
        effects.broadcast(self.update_event());
        if everyone_done {
            info!("every player finished without a winner");
            self.finish(None, false, &mut effects);
        }
        Ok(effects)
    }

    /// Ends a running game with no winner. Ended or idle sessions are left alone:
    /// the first end sequence owns the reset.
    pub fn force_end(&mut self, is_host: bool) -> Result<Effects, Rejection> {
        if !is_host {
            return Err(Rejection::NotHost);
        }
        let mut effects = Effects::default();
        if self.phase != Phase::Running {
            debug!(phase = ?self.phase, "force end ignored");
            return Ok(effects);
        }
        info!("host forced the game to end");
        self.finish(None, true, &mut effects);
        Ok(effects)
    }

    pub fn disconnect(&mut self, client_id: &str) -> Effects {
        let mut effects = Effects::default();
        let Some(name) = self.client_names.remove(client_id) else {
            return effects;
        };
        if let Some(player) = self.players.get_mut(&name) {
            player.connected = false;
            player.client_id = None;
        }
        info!(player = %name, "player disconnected");
        effects.broadcast(self.update_event());
        effects
    }

    /// Stale timers (older epoch, or a turn that already moved on) do nothing.
    pub fn fire_timer(&mut self, timer: &ScheduledTimer) -> Effects {
        let mut effects = Effects::default();
        if timer.epoch != self.epoch {
            debug!(?timer, epoch = self.epoch, "stale timer dropped");
            return effects;
        }

        match timer.kind {
            TimerKind::AdvanceTurn { serial } => {
                if self.phase != Phase::Running {
                    return effects;
                }
                let Some(Board::Turn(turns)) = self.board.as_mut() else {
                    return effects;
                };
                if turns.serial() != serial {
                    return effects;
                }
                turns.advance_turn();
                debug!(next = ?turns.current_player(), "turn advanced");
                effects.broadcast(self.update_event());
            }
            TimerKind::Reset => {
                if self.phase == Phase::Ended {
                    self.reset(&mut effects);
                }
            }
        }
        effects
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let mut snapshot = GameSnapshot {
            is_running: self.phase == Phase::Running,
            game_mode: self.mode,
            players: self.player_order.clone(),
            player_colors: BTreeMap::new(),
            player_points: BTreeMap::new(),
            maze: self.maze.as_ref().map(Maze::to_grid),
            current_position: None,
            player_positions: BTreeMap::new(),
            start_position: self.maze.as_ref().map(Maze::start),
            end_position: self.maze.as_ref().map(Maze::end),
            current_player: None,
            moves_remaining: 0,
            player_moves: BTreeMap::new(),
            winner: self.winner.clone(),
            finished_players: Vec::new(),
        };

        for name in &self.player_order {
            let Some(player) = self.players.get(name) else {
                continue;
            };
            snapshot.player_colors.insert(
                name.clone(),
                PlayerView {
                    color: player.color.to_string(),
                    color_name: player.color_name.to_string(),
                    order: player.order,
                    connected: player.connected,
                },
            );
            snapshot.player_points.insert(name.clone(), player.points);
        }

        match self.board.as_ref() {
            Some(Board::Turn(turns)) => {
                snapshot.current_position = Some(turns.position());
                snapshot.current_player = turns.current_player().map(str::to_string);
                snapshot.moves_remaining = turns.moves_remaining();
            }
            Some(Board::Race(race)) => {
                snapshot.player_positions = race.positions().clone();
                snapshot.player_moves = race.moves().clone();
                snapshot.finished_players = race.finished().to_vec();
            }
            None => {}
        }
        snapshot
    }

    fn update_event(&self) -> ServerEvent {
        ServerEvent::GameUpdate(Box::new(self.snapshot()))
    }

    fn running_player(&self, client_id: &str) -> Result<String, Rejection> {
        if self.phase != Phase::Running {
            return Err(Rejection::NotRunning);
        }
        self.client_names
            .get(client_id)
            .cloned()
            .ok_or(Rejection::NotJoined)
    }

    fn offer_after_exhaustion(&mut self, client_id: &str, name: &str, effects: &mut Effects) {
        let points = self.players.get(name).map(|p| p.points).unwrap_or(0);
        match economy::on_budget_exhausted(points) {
            BudgetExhausted::OfferBuy {
                points,
                cost,
                max_moves,
            } => effects.reply(
                client_id,
                ServerEvent::OfferBuyMoves {
                    points,
                    cost,
                    max_moves,
                },
            ),
            BudgetExhausted::OutOfOptions => match self.board.as_ref() {
                Some(Board::Race(_)) => effects.reply(client_id, out_of_moves_offer()),
                _ => self.end_turn_early(effects),
            },
        }
    }

    /// Turn-based only: the current turn ends after the display delay.
    fn end_turn_early(&mut self, effects: &mut Effects) {
        let Some(Board::Turn(turns)) = self.board.as_mut() else {
            return;
        };
        if let Some(serial) = turns.request_advance() {
            effects.schedule(
                self.epoch,
                TimerKind::AdvanceTurn { serial },
                TURN_ADVANCE_DELAY_MS,
            );
        }
    }

    fn finish(&mut self, winner: Option<String>, forced: bool, effects: &mut Effects) {
        self.phase = Phase::Ended;
        self.epoch += 1;
        effects.cancel_pending = true;

        if let Some(player) = winner.as_ref().and_then(|name| self.players.get_mut(name)) {
            economy::award_win(&mut player.points);
        }
        self.winner = winner.clone();

        let results: Vec<GameResult> = self
            .player_order
            .iter()
            .filter_map(|name| {
                self.players.get(name).map(|player| GameResult {
                    player_name: name.clone(),
                    points: player.points,
                    won: winner.as_deref() == Some(name.as_str()),
                })
            })
            .collect();
        self.history.record_game(&results);

        let final_scores = if forced {
            None
        } else {
            Some(
                self.player_order
                    .iter()
                    .filter_map(|name| self.players.get(name).map(|p| (name.clone(), p.points)))
                    .collect(),
            )
        };
        info!(winner = ?winner, forced, "game over");

        effects.broadcast(self.update_event());
        effects.broadcast(ServerEvent::GameOver {
            winner,
            final_scores,
            forced,
        });
        let delay_ms = if forced {
            FORCED_END_DISPLAY_DELAY_MS
        } else {
            FINISH_DISPLAY_DELAY_MS
        };
        effects.schedule(self.epoch, TimerKind::Reset, delay_ms);
    }

    fn reset(&mut self, effects: &mut Effects) {
        self.players.clear();
        self.player_order.clear();
        self.client_names.clear();
        self.maze = None;
        self.board = None;
        self.winner = None;
        self.phase = Phase::Idle;
        self.epoch += 1;
        info!("session reset");
        effects.broadcast(self.update_event());
    }
}

fn out_of_moves_offer() -> ServerEvent {
    ServerEvent::OfferQuit {
        message: "Out of moves and points!".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PLAYER_COLORS;
    use crate::history_store::MemoryHistory;

    fn open_maze() -> Maze {
        Maze::from_rows(&[
            "#######", "#.....#", "#.....#", "#.....#", "#.....#", "#.....#", "#######",
        ])
    }

    fn client(name: &str) -> String {
        format!("client-{name}")
    }

    fn session_with(names: &[&str]) -> Session<MemoryHistory> {
        let mut session = Session::new(MemoryHistory::default(), 7);
        for name in names {
            session.join(&client(name), name).expect("join");
        }
        session
    }

    /// Starts a game, then swaps in an all-passage 7x7 maze so moves are predictable.
    fn start_open(session: &mut Session<MemoryHistory>, mode: GameMode, moves_per_turn: u32) {
        session
            .start(
                true,
                GameSettings {
                    moves_per_turn,
                    maze_size: 7,
                    mode,
                },
            )
            .expect("start");
        session.maze = Some(open_maze());
    }

    fn set_points(session: &mut Session<MemoryHistory>, name: &str, points: i64) {
        session.players.get_mut(name).expect("player exists").points = points;
    }

    fn points(session: &Session<MemoryHistory>, name: &str) -> i64 {
        session.player(name).expect("player exists").points
    }

    fn replies<'a>(effects: &'a Effects, name: &str) -> Vec<&'a ServerEvent> {
        let target = Recipient::Client(client(name));
        effects
            .messages
            .iter()
            .filter(|out| out.to == target)
            .map(|out| &out.event)
            .collect()
    }

    fn broadcasts(effects: &Effects) -> Vec<&ServerEvent> {
        effects
            .messages
            .iter()
            .filter(|out| out.to == Recipient::All)
            .map(|out| &out.event)
            .collect()
    }

    fn step(
        session: &mut Session<MemoryHistory>,
        name: &str,
        row: i32,
        col: i32,
    ) -> Effects {
        session
            .make_move(&client(name), Position::new(row, col))
            .expect("move accepted")
    }

    #[test]
    fn colors_cycle_through_palette_by_join_order() {
        let names: Vec<String> = (0..11).map(|i| format!("p{i}")).collect();
        let mut session = Session::new(MemoryHistory::default(), 1);
        for name in &names {
            let effects = session.join(&client(name), name).expect("join");
            assert!(matches!(
                replies(&effects, name).as_slice(),
                [ServerEvent::JoinSuccess { .. }]
            ));
            assert!(matches!(
                broadcasts(&effects).as_slice(),
                [ServerEvent::GameUpdate(_)]
            ));
        }
        let tenth = session.player("p10").expect("p10");
        assert_eq!(tenth.order, 10);
        assert_eq!(tenth.color, PLAYER_COLORS[0].color);
        assert_eq!(session.player("p3").expect("p3").color_name, "Green");
        assert_eq!(tenth.points, STARTING_POINTS);
    }

    #[test]
    fn join_rejects_blank_and_connected_names() {
        let mut session = session_with(&["alice"]);
        assert_eq!(
            session.join("client-x", "   "),
            Err(Rejection::EmptyName)
        );
        assert_eq!(
            session.join("client-x", " alice "),
            Err(Rejection::NameInUse)
        );
        assert_eq!(
            session.join(&client("alice"), "bob"),
            Err(Rejection::AlreadyJoined("alice".to_string()))
        );
    }

    #[test]
    fn disconnected_name_can_rejoin_with_same_identity() {
        let mut session = session_with(&["alice", "bob"]);
        session.disconnect(&client("alice"));
        let alice = session.player("alice").expect("record kept");
        assert!(!alice.connected);
        assert!(!session.snapshot().player_colors["alice"].connected);

        session.join("new-socket", "alice").expect("rejoin");
        let alice = session.player("alice").expect("alice");
        assert!(alice.connected);
        assert_eq!(alice.order, 0);
        assert_eq!(alice.client_id.as_deref(), Some("new-socket"));
        assert_eq!(session.player_order(), ["alice", "bob"]);
        assert_eq!(session.name_for_client("new-socket"), Some("alice"));
    }

    #[test]
    fn start_is_refused_until_valid() {
        let mut empty = Session::new(MemoryHistory::default(), 3);
        let settings = GameSettings {
            moves_per_turn: 5,
            maze_size: 11,
            mode: GameMode::TurnBased,
        };
        assert_eq!(empty.start(true, settings), Err(Rejection::NoPlayers));

        let mut session = session_with(&["alice"]);
        assert_eq!(session.start(false, settings), Err(Rejection::NotHost));
        assert!(matches!(
            session.start(
                true,
                GameSettings {
                    maze_size: 3,
                    ..settings
                }
            ),
            Err(Rejection::InvalidMaze(_))
        ));
        assert_eq!(session.phase(), Phase::Idle);

        let effects = session.start(true, settings).expect("start");
        assert!(matches!(
            broadcasts(&effects).as_slice(),
            [ServerEvent::GameStarted, ServerEvent::GameUpdate(_)]
        ));
        assert_eq!(session.start(true, settings), Err(Rejection::AlreadyRunning));
    }

    #[test]
    fn start_resets_points_and_lays_out_turn_board() {
        let mut session = session_with(&["alice", "bob"]);
        set_points(&mut session, "alice", 20);
        session
            .start(
                true,
                GameSettings {
                    moves_per_turn: 3,
                    maze_size: 9,
                    mode: GameMode::TurnBased,
                },
            )
            .expect("start");

        let snapshot = session.snapshot();
        assert!(snapshot.is_running);
        assert_eq!(snapshot.game_mode, GameMode::TurnBased);
        assert_eq!(snapshot.player_points["alice"], STARTING_POINTS);
        assert_eq!(snapshot.current_player.as_deref(), Some("alice"));
        assert_eq!(snapshot.current_position, Some(Position::new(1, 1)));
        assert_eq!(snapshot.start_position, Some(Position::new(1, 1)));
        assert_eq!(snapshot.end_position, Some(Position::new(7, 7)));
        assert_eq!(snapshot.moves_remaining, 3);
        assert!(snapshot.player_positions.is_empty());
        assert_eq!(snapshot.maze.as_ref().map(Vec::len), Some(9));
    }

    #[test]
    fn every_attempt_costs_ten_points() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 5);

        let effects = step(&mut session, "alice", 1, 3);
        assert_eq!(
            replies(&effects, "alice"),
            [&ServerEvent::MoveResult {
                valid: true,
                message: "Valid move!".to_string()
            }]
        );
        assert_eq!(points(&session, "alice"), 990);
        assert_eq!(session.position_of("alice"), Some(Position::new(1, 3)));

        let effects = step(&mut session, "alice", 3, 1);
        assert!(matches!(
            replies(&effects, "alice").as_slice(),
            [ServerEvent::MoveResult { valid: false, .. }]
        ));
        assert_eq!(points(&session, "alice"), 980);
        assert_eq!(session.position_of("alice"), Some(Position::new(1, 3)));
        assert_eq!(session.moves_left_for("alice"), 3);
    }

    #[test]
    fn out_of_turn_move_changes_nothing() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 2);
        assert_eq!(
            session.make_move(&client("bob"), Position::new(1, 2)),
            Err(Rejection::NotYourTurn)
        );
        assert_eq!(points(&session, "bob"), STARTING_POINTS);
        assert_eq!(session.position_of("bob"), Some(Position::new(1, 1)));
    }

    #[test]
    fn declined_buy_hands_turn_to_next_player() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 2);

        step(&mut session, "alice", 1, 2);
        let effects = step(&mut session, "alice", 1, 3);
        assert_eq!(
            replies(&effects, "alice").last(),
            Some(&&ServerEvent::OfferBuyMoves {
                points: 980,
                cost: 50,
                max_moves: 19
            })
        );
        assert!(effects.timers.is_empty());

        let effects = session
            .buy_moves(&client("alice"), false, 0)
            .expect("decline accepted");
        let [timer] = effects.timers.as_slice() else {
            panic!("expected one advance timer, got {:?}", effects.timers);
        };
        assert_eq!(timer.kind, TimerKind::AdvanceTurn { serial: 0 });
        assert_eq!(timer.delay_ms, TURN_ADVANCE_DELAY_MS);
        assert_eq!(session.current_player(), Some("alice"));

        let effects = session.fire_timer(timer);
        assert_eq!(broadcasts(&effects).len(), 1);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.current_player.as_deref(), Some("bob"));
        assert_eq!(snapshot.moves_remaining, 2);
        assert_eq!(snapshot.current_position, Some(Position::new(1, 3)));

        // the same timer firing twice must not skip bob
        assert!(session.fire_timer(timer).messages.is_empty());
        assert_eq!(session.current_player(), Some("bob"));
    }

    #[test]
    fn broke_player_turn_advances_without_offer() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 1);
        set_points(&mut session, "alice", 15);

        let effects = step(&mut session, "alice", 2, 1);
        assert!(!replies(&effects, "alice")
            .iter()
            .any(|event| matches!(event, ServerEvent::OfferBuyMoves { .. })));
        let timer = effects.timers[0];
        assert_eq!(
            session.buy_moves(&client("alice"), true, 1),
            Err(Rejection::TurnEnding)
        );

        session.fire_timer(&timer);
        assert_eq!(session.current_player(), Some("bob"));
        assert_eq!(session.moves_left_for("bob"), 1);
        assert_eq!(points(&session, "alice"), 5);
    }

    #[test]
    fn failed_turn_buy_still_ends_the_turn() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 1);
        set_points(&mut session, "alice", 70);
        step(&mut session, "alice", 1, 2);

        let effects = session
            .buy_moves(&client("alice"), true, 2)
            .expect("buy handled");
        assert_eq!(
            replies(&effects, "alice"),
            [&ServerEvent::BuyError {
                message: "Not enough points!".to_string()
            }]
        );
        assert_eq!(points(&session, "alice"), 60);
        assert_eq!(effects.timers.len(), 1);
        session.fire_timer(&effects.timers[0]);
        assert_eq!(session.current_player(), Some("bob"));
    }

    #[test]
    fn turn_buy_by_other_player_is_refused_without_charge() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 1);
        assert_eq!(
            session.buy_moves(&client("bob"), true, 1),
            Err(Rejection::NotYourTurn)
        );
        assert_eq!(points(&session, "bob"), STARTING_POINTS);
    }

    #[test]
    fn race_buy_then_quit_offer_when_broke() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::Race, 1);
        set_points(&mut session, "alice", 130);

        let effects = step(&mut session, "alice", 1, 2);
        assert_eq!(
            replies(&effects, "alice").last(),
            Some(&&ServerEvent::OfferBuyMoves {
                points: 120,
                cost: 50,
                max_moves: 2
            })
        );

        let effects = session
            .buy_moves(&client("alice"), true, 2)
            .expect("buy handled");
        assert!(matches!(
            replies(&effects, "alice").as_slice(),
            [ServerEvent::BuySuccess { .. }]
        ));
        assert_eq!(points(&session, "alice"), 20);
        assert_eq!(session.moves_left_for("alice"), 2);

        let effects = session
            .buy_moves(&client("alice"), true, 1)
            .expect("buy handled");
        assert_eq!(
            replies(&effects, "alice"),
            [
                &ServerEvent::BuyError {
                    message: "Not enough points!".to_string()
                },
                &ServerEvent::OfferQuit {
                    message: "Out of moves and points!".to_string()
                }
            ]
        );
        assert!(effects.timers.is_empty());
        assert_eq!(points(&session, "alice"), 20);
        assert_eq!(session.moves_left_for("alice"), 2);
    }

    #[test]
    fn race_buy_with_moves_left_sets_budget_to_bought_count() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::Race, 3);

        session
            .buy_moves(&client("alice"), true, 2)
            .expect("buy handled");
        assert_eq!(session.moves_left_for("alice"), 2);
        assert_eq!(session.moves_left_for("bob"), 3);
        assert_eq!(points(&session, "alice"), 900);
    }

    #[test]
    fn turn_buy_with_moves_left_sets_budget_to_bought_count() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 3);
        step(&mut session, "alice", 1, 2);
        assert_eq!(session.moves_left_for("alice"), 2);

        session
            .buy_moves(&client("alice"), true, 1)
            .expect("buy handled");
        assert_eq!(session.moves_left_for("alice"), 1);
        assert_eq!(points(&session, "alice"), 940);
    }

    #[test]
    fn race_exhausted_and_broke_is_offered_quit() {
        let mut session = session_with(&["alice"]);
        start_open(&mut session, GameMode::Race, 1);
        set_points(&mut session, "alice", 40);
        let effects = step(&mut session, "alice", 2, 1);
        assert_eq!(
            replies(&effects, "alice").last(),
            Some(&&ServerEvent::OfferQuit {
                message: "Out of moves and points!".to_string()
            })
        );
        assert!(effects.timers.is_empty());
    }

    #[test]
    fn race_first_to_end_wins_while_others_have_budget() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::Race, 3);

        step(&mut session, "bob", 2, 1);
        step(&mut session, "alice", 1, 5);
        assert_eq!(session.position_of("bob"), Some(Position::new(2, 1)));
        assert_eq!(session.moves_left_for("bob"), 2);
        assert_eq!(session.moves_left_for("alice"), 2);

        let effects = step(&mut session, "alice", 5, 5);
        assert_eq!(session.phase(), Phase::Ended);
        assert_eq!(session.winner(), Some("alice"));
        assert_eq!(points(&session, "alice"), 1_000 - 20 + 500);
        assert_eq!(points(&session, "bob"), 990);
        assert!(session.is_finished("alice"));
        assert!(effects.cancel_pending);
        assert_eq!(
            session.history().records,
            vec![
                ("alice".to_string(), 1_480, true),
                ("bob".to_string(), 990, false)
            ]
        );
        assert_eq!(session.history().games, 1);
    }

    #[test]
    fn win_awards_bonus_then_reset_clears_everything() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 5);
        step(&mut session, "alice", 1, 5);
        let effects = step(&mut session, "alice", 5, 5);

        let events = broadcasts(&effects);
        let [ServerEvent::GameUpdate(last), ServerEvent::GameOver {
            winner,
            final_scores,
            forced,
        }] = events.as_slice()
        else {
            panic!("expected final snapshot then game over, got {events:?}");
        };
        assert!(!last.is_running);
        assert_eq!(last.winner.as_deref(), Some("alice"));
        assert_eq!(winner.as_deref(), Some("alice"));
        assert!(!forced);
        let scores = final_scores.as_ref().expect("scores on a real finish");
        assert_eq!(scores["alice"], 1_480);
        assert_eq!(scores["bob"], 1_000);

        let [timer] = effects.timers.as_slice() else {
            panic!("expected a reset timer");
        };
        assert_eq!(timer.kind, TimerKind::Reset);
        assert_eq!(timer.delay_ms, FINISH_DISPLAY_DELAY_MS);
        assert_eq!(
            session.make_move(&client("bob"), Position::new(1, 2)),
            Err(Rejection::NotRunning)
        );

        let effects = session.fire_timer(timer);
        assert_eq!(broadcasts(&effects).len(), 1);
        assert_eq!(session.phase(), Phase::Idle);
        let snapshot = session.snapshot();
        assert!(snapshot.players.is_empty());
        assert!(snapshot.maze.is_none());
        assert!(snapshot.current_position.is_none());
        assert!(snapshot.winner.is_none());
        assert!(session.player("alice").is_none());
        assert_eq!(session.name_for_client(&client("alice")), None);
    }

    #[test]
    fn forced_end_owns_reset_and_repeats_are_noops() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 2);

        assert_eq!(session.force_end(false), Err(Rejection::NotHost));
        let effects = session.force_end(true).expect("host");
        assert!(broadcasts(&effects).contains(&&ServerEvent::GameOver {
            winner: None,
            final_scores: None,
            forced: true,
        }));
        assert_eq!(effects.timers[0].delay_ms, FORCED_END_DISPLAY_DELAY_MS);
        assert_eq!(session.history().records.len(), 2);
        assert_eq!(session.history().games, 1);
        assert!(session.history().records.iter().all(|(_, _, won)| !won));

        assert_eq!(session.force_end(true), Ok(Effects::default()));
        assert_eq!(session.history().games, 1);
        assert_eq!(
            session.start(
                true,
                GameSettings {
                    moves_per_turn: 2,
                    maze_size: 7,
                    mode: GameMode::Race
                }
            ),
            Err(Rejection::ResetPending)
        );

        session.fire_timer(&effects.timers[0]);
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.force_end(true), Ok(Effects::default()));
    }

    #[test]
    fn force_end_after_win_does_not_schedule_second_reset() {
        let mut session = session_with(&["alice"]);
        start_open(&mut session, GameMode::Race, 5);
        step(&mut session, "alice", 5, 1);
        step(&mut session, "alice", 5, 5);
        assert_eq!(session.phase(), Phase::Ended);

        let effects = session.force_end(true).expect("host");
        assert!(effects.timers.is_empty());
        assert!(effects.messages.is_empty());
        assert_eq!(session.winner(), Some("alice"));
    }

    #[test]
    fn force_end_preempts_pending_turn_advance() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::TurnBased, 1);
        set_points(&mut session, "alice", 0);
        let advance = step(&mut session, "alice", 1, 2).timers[0];

        let ended = session.force_end(true).expect("host");
        assert!(ended.cancel_pending);
        assert!(session.fire_timer(&advance).messages.is_empty());
        assert_eq!(session.phase(), Phase::Ended);
    }

    #[test]
    fn race_quit_keeps_others_playing_until_everyone_is_done() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::Race, 2);

        let effects = session.quit(&client("alice")).expect("quit");
        assert!(matches!(
            replies(&effects, "alice").as_slice(),
            [ServerEvent::QuitSuccess { .. }]
        ));
        assert_eq!(session.phase(), Phase::Running);
        assert_eq!(session.snapshot().finished_players, ["alice"]);
        assert_eq!(
            session.make_move(&client("alice"), Position::new(1, 2)),
            Err(Rejection::PlayerFinished)
        );
        assert_eq!(
            session.buy_moves(&client("alice"), true, 1),
            Err(Rejection::PlayerFinished)
        );
        step(&mut session, "bob", 1, 2);

        session.quit(&client("bob")).expect("quit");
        assert_eq!(session.phase(), Phase::Ended);
        assert_eq!(session.winner(), None);
        assert_eq!(session.history().records.len(), 2);
    }

    #[test]
    fn quit_outside_race_is_a_noop() {
        let mut session = session_with(&["alice"]);
        assert_eq!(session.quit(&client("alice")), Err(Rejection::NotRunning));
        start_open(&mut session, GameMode::TurnBased, 2);
        assert_eq!(session.quit(&client("alice")), Ok(Effects::default()));
        assert_eq!(session.phase(), Phase::Running);
    }

    #[test]
    fn late_joiner_gets_a_race_token() {
        let mut session = session_with(&["alice"]);
        start_open(&mut session, GameMode::Race, 4);
        session.join(&client("bob"), "bob").expect("join");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.player_positions["bob"], Position::new(1, 1));
        assert_eq!(snapshot.player_moves["bob"], 4);
        step(&mut session, "bob", 1, 4);
    }

    #[test]
    fn disconnect_keeps_points_and_position() {
        let mut session = session_with(&["alice", "bob"]);
        start_open(&mut session, GameMode::Race, 3);
        step(&mut session, "alice", 4, 1);
        let effects = session.disconnect(&client("alice"));
        assert_eq!(broadcasts(&effects).len(), 1);
        assert_eq!(points(&session, "alice"), 990);
        assert_eq!(session.position_of("alice"), Some(Position::new(4, 1)));
        assert_eq!(
            session.make_move(&client("alice"), Position::new(5, 1)),
            Err(Rejection::NotJoined)
        );
        assert!(session.disconnect("never-joined").messages.is_empty());
    }

    #[test]
    fn update_serializes_with_wire_field_names() {
        let mut session = session_with(&["alice"]);
        start_open(&mut session, GameMode::Race, 2);
        let value = serde_json::to_value(ServerEvent::GameUpdate(Box::new(session.snapshot())))
            .expect("serializable");
        assert_eq!(value["type"], "game_update");
        assert_eq!(value["game_mode"], "race");
        assert_eq!(value["player_positions"]["alice"], serde_json::json!([1, 1]));
        assert_eq!(value["end_position"], serde_json::json!([5, 5]));
        assert_eq!(value["maze"][0][0], 1);
        assert_eq!(value["maze"][1][1], 0);
    }
}
