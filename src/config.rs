use std::path::PathBuf;

use clap::Parser;

/// Server settings. Every flag can also come from the environment.
#[derive(Clone, Debug, Parser)]
#[command(name = "server", about = "Maze race session server")]
pub struct ServerConfig {
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,
    #[arg(long = "history-path", env = "HISTORY_DB_PATH", default_value = ".data/history.json")]
    pub history_path: PathBuf,
    #[arg(long = "static-dir", env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
    /// Maze PRNG seed; random when absent.
    #[arg(long, env = "MAZE_SEED")]
    pub seed: Option<u32>,
}

impl ServerConfig {
    pub fn resolve_static_dir(&self) -> Option<PathBuf> {
        if let Some(path) = self.static_dir.as_ref() {
            if path.join("index.html").is_file() {
                return Some(path.clone());
            }
        }

        let candidates = [PathBuf::from("static"), PathBuf::from("../static")];
        candidates
            .into_iter()
            .find(|path| path.join("index.html").is_file())
    }
}
