use clap::Parser;
use maze_race_server::error::Rejection;
use maze_race_server::history_store::MemoryHistory;
use maze_race_server::maze::shortest_path;
use maze_race_server::server_utils::{normalize_maze_size, normalize_moves_per_turn};
use maze_race_server::session::{Effects, GameSettings, Outbound, Phase, Recipient, Session};
use maze_race_server::types::{GameMode, Position, ServerEvent};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

const ACTION_SAFETY_LIMIT: usize = 20_000;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless maze race games played by path-following bots")]
struct Cli {
    #[arg(long, default_value_t = 10)]
    games: usize,
    #[arg(long, default_value_t = 3)]
    players: usize,
    #[arg(long, default_value_t = 15)]
    size: i64,
    #[arg(long, default_value = "turn_based")]
    mode: String,
    #[arg(long, default_value_t = 5)]
    moves: i64,
    #[arg(long)]
    seed: Option<u32>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug)]
struct Scenario {
    game: usize,
    seed: u32,
    players: usize,
    settings: GameSettings,
}

#[derive(Clone, Debug, Serialize)]
struct GameResultLine {
    game: usize,
    seed: u32,
    mode: GameMode,
    maze_size: usize,
    winner: Option<String>,
    total_moves: usize,
    extra_moves_bought: usize,
    quits: usize,
    final_scores: BTreeMap<String, i64>,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    started_at_ms: u64,
    finished_at_ms: u64,
    game_count: usize,
    anomaly_count: usize,
    no_winner_count: usize,
    average_moves: f64,
    wins_by_seat: BTreeMap<String, usize>,
    games: Vec<GameResultLine>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reaction {
    BuyOne,
    Quit,
}

struct Bot {
    name: String,
    client_id: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(mode) = GameMode::parse(&cli.mode) else {
        error!(mode = %cli.mode, "unknown game mode; expected turn_based or race");
        std::process::exit(2);
    };
    let settings = GameSettings {
        moves_per_turn: normalize_moves_per_turn(Some(cli.moves)),
        maze_size: normalize_maze_size(Some(cli.size)),
        mode,
    };
    let base_seed = cli.seed.unwrap_or_else(rand::random);
    let started_at_ms = now_ms();

    let mut results = Vec::with_capacity(cli.games);
    for game in 0..cli.games {
        let scenario = Scenario {
            game,
            seed: base_seed.wrapping_add(game as u32),
            players: cli.players.max(1),
            settings,
        };
        let result = run_game(&scenario);
        for anomaly in &result.anomalies {
            warn!(game, seed = scenario.seed, anomaly = %anomaly, "anomaly detected");
        }
        match serde_json::to_string(&result) {
            Ok(line) => println!("{line}"),
            Err(err) => error!(%err, "failed to serialize game result"),
        }
        results.push(result);
    }

    let summary = build_run_summary(started_at_ms, now_ms(), results);
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(err) = write_summary(path, &summary) {
            error!(path = %path.display(), %err, "failed to write run summary");
            std::process::exit(2);
        }
    }
    info!(
        games = summary.game_count,
        anomalies = summary.anomaly_count,
        no_winner = summary.no_winner_count,
        average_moves = summary.average_moves,
        "run finished"
    );

    if summary.anomaly_count > 0 {
        std::process::exit(1);
    }
}

fn run_game(scenario: &Scenario) -> GameResultLine {
    let mut session = Session::new(MemoryHistory::default(), scenario.seed);
    let bots: Vec<Bot> = (0..scenario.players)
        .map(|seat| Bot {
            name: format!("bot-{}", seat + 1),
            client_id: format!("sim_{}_{}", scenario.seed, seat + 1),
        })
        .collect();

    let mut result = GameResultLine {
        game: scenario.game,
        seed: scenario.seed,
        mode: scenario.settings.mode,
        maze_size: scenario.settings.maze_size,
        winner: None,
        total_moves: 0,
        extra_moves_bought: 0,
        quits: 0,
        final_scores: BTreeMap::new(),
        anomalies: Vec::new(),
    };
    let mut reactions: HashMap<String, Reaction> = HashMap::new();
    let mut game_over_seen = false;

    for bot in &bots {
        let outcome = session.join(&bot.client_id, &bot.name);
        settle(&mut session, outcome, &mut result, &mut reactions, &mut game_over_seen);
    }
    let outcome = session.start(true, scenario.settings);
    if let Err(rejection) = &outcome {
        result.anomalies.push(format!("start rejected: {rejection}"));
        return result;
    }
    settle(&mut session, outcome, &mut result, &mut reactions, &mut game_over_seen);
    if !session.maze().is_some_and(|maze| maze.has_path()) {
        result.anomalies.push("maze has no path from start to end".to_string());
        return result;
    }

    let mut actions = 0usize;
    while session.phase() == Phase::Running {
        actions += 1;
        if actions > ACTION_SAFETY_LIMIT {
            result
                .anomalies
                .push("action safety limit exceeded".to_string());
            break;
        }

        let actors: Vec<&Bot> = match scenario.settings.mode {
            GameMode::TurnBased => bots
                .iter()
                .filter(|bot| session.current_player() == Some(bot.name.as_str()))
                .collect(),
            GameMode::Race => bots
                .iter()
                .filter(|bot| !session.is_finished(&bot.name))
                .collect(),
        };
        if actors.is_empty() {
            result.anomalies.push("running game has nobody to act".to_string());
            break;
        }

        for bot in actors {
            if session.phase() != Phase::Running {
                break;
            }
            let outcome = match reactions.remove(&bot.name) {
                Some(Reaction::BuyOne) => {
                    result.extra_moves_bought += 1;
                    session.buy_moves(&bot.client_id, true, 1)
                }
                Some(Reaction::Quit) => {
                    result.quits += 1;
                    session.quit(&bot.client_id)
                }
                None => {
                    let Some(target) = next_target(&session, &bot.name) else {
                        result
                            .anomalies
                            .push(format!("{} has no path to the end", bot.name));
                        return result;
                    };
                    result.total_moves += 1;
                    session.make_move(&bot.client_id, target)
                }
            };
            if let Err(rejection) = &outcome {
                result
                    .anomalies
                    .push(format!("{} command rejected: {rejection}", bot.name));
            }
            settle(&mut session, outcome, &mut result, &mut reactions, &mut game_over_seen);
        }
        if !result.anomalies.is_empty() {
            break;
        }
    }

    if !game_over_seen && result.anomalies.is_empty() {
        result.anomalies.push("game ended without game_over".to_string());
    }
    if session.phase() != Phase::Idle || !session.player_order().is_empty() {
        result
            .anomalies
            .push("session did not reset after game over".to_string());
    }
    let records = &session.history().records;
    if game_over_seen && records.len() != bots.len() {
        result.anomalies.push(format!(
            "expected {} history records, found {}",
            bots.len(),
            records.len()
        ));
    }
    let recorded_winners: Vec<&str> = records
        .iter()
        .filter(|(_, _, won)| *won)
        .map(|(name, _, _)| name.as_str())
        .collect();
    if recorded_winners != result.winner.as_deref().into_iter().collect::<Vec<_>>() {
        result
            .anomalies
            .push("history winner does not match game_over".to_string());
    }
    result
}

/// Furthest cell reachable in one straight slide along the shortest path.
fn next_target(session: &Session<MemoryHistory>, name: &str) -> Option<Position> {
    let maze = session.maze()?;
    let from = session.position_of(name)?;
    let path = shortest_path(maze, from, maze.end())?;
    let first = *path.get(1)?;
    let horizontal = first.row == from.row;
    let target = path[1..]
        .iter()
        .take_while(|cell| {
            if horizontal {
                cell.row == from.row
            } else {
                cell.col == from.col
            }
        })
        .last()
        .copied()
        .unwrap_or(first);
    Some(target)
}

/// Applies a command outcome: timers fire immediately and offers become the
/// addressed bot's next action.
fn settle(
    session: &mut Session<MemoryHistory>,
    outcome: Result<Effects, Rejection>,
    result: &mut GameResultLine,
    reactions: &mut HashMap<String, Reaction>,
    game_over_seen: &mut bool,
) {
    let Ok(effects) = outcome else {
        return;
    };
    let mut pending = VecDeque::from([effects]);
    while let Some(effects) = pending.pop_front() {
        for Outbound { to, event } in effects.messages {
            match (to, event) {
                (Recipient::Client(client_id), ServerEvent::OfferBuyMoves { .. }) => {
                    if let Some(name) = session.name_for_client(&client_id) {
                        reactions.insert(name.to_string(), Reaction::BuyOne);
                    }
                }
                (Recipient::Client(client_id), ServerEvent::OfferQuit { .. }) => {
                    if let Some(name) = session.name_for_client(&client_id) {
                        reactions.insert(name.to_string(), Reaction::Quit);
                    }
                }
                (
                    Recipient::All,
                    ServerEvent::GameOver {
                        winner,
                        final_scores,
                        ..
                    },
                ) => {
                    *game_over_seen = true;
                    result.winner = winner;
                    result.final_scores = final_scores.unwrap_or_default();
                    reactions.clear();
                }
                _ => {}
            }
        }
        for timer in effects.timers {
            pending.push_back(session.fire_timer(&timer));
        }
    }
}

fn build_run_summary(
    started_at_ms: u64,
    finished_at_ms: u64,
    games: Vec<GameResultLine>,
) -> RunSummary {
    let game_count = games.len();
    let anomaly_count = games.iter().map(|game| game.anomalies.len()).sum();
    let no_winner_count = games.iter().filter(|game| game.winner.is_none()).count();
    let total_moves: usize = games.iter().map(|game| game.total_moves).sum();
    let average_moves = if game_count == 0 {
        0.0
    } else {
        total_moves as f64 / game_count as f64
    };
    let mut wins_by_seat = BTreeMap::new();
    for winner in games.iter().filter_map(|game| game.winner.as_ref()) {
        *wins_by_seat.entry(winner.clone()).or_insert(0) += 1;
    }

    RunSummary {
        started_at_ms,
        finished_at_ms,
        game_count,
        anomaly_count,
        no_winner_count,
        average_moves,
        wins_by_seat,
        games,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
