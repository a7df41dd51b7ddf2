use crate::types::ServerEvent;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MazeError {
    #[error("maze size {size} is too small (minimum {min})")]
    TooSmall { size: usize, min: usize },
}

/// A command refused without touching session state. Only the caller hears about it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Please enter a name")]
    EmptyName,
    #[error("This name is already in use")]
    NameInUse,
    #[error("Already joined as {0}")]
    AlreadyJoined(String),
    #[error("Only the host can do that")]
    NotHost,
    #[error("Game already running")]
    AlreadyRunning,
    #[error("Previous game is still finishing")]
    ResetPending,
    #[error("No players joined")]
    NoPlayers,
    #[error("Invalid maze settings: {0}")]
    InvalidMaze(#[from] MazeError),
    #[error("Game is not running")]
    NotRunning,
    #[error("Join the game first")]
    NotJoined,
    #[error("Not your turn")]
    NotYourTurn,
    #[error("No moves remaining")]
    NoMovesRemaining,
    #[error("You have finished or quit")]
    PlayerFinished,
    #[error("Your turn is ending")]
    TurnEnding,
}

impl Rejection {
    pub fn to_event(&self) -> ServerEvent {
        let message = self.to_string();
        match self {
            Self::EmptyName | Self::NameInUse | Self::AlreadyJoined(_) => {
                ServerEvent::JoinError { message }
            }
            Self::NotHost
            | Self::AlreadyRunning
            | Self::ResetPending
            | Self::NoPlayers
            | Self::InvalidMaze(_)
            | Self::NotRunning
            | Self::NotJoined => ServerEvent::GameError { message },
            Self::NotYourTurn
            | Self::NoMovesRemaining
            | Self::PlayerFinished
            | Self::TurnEnding => ServerEvent::MoveError { message },
        }
    }
}
