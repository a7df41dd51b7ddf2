pub const STARTING_POINTS: i64 = 1_000;
pub const MOVE_COST: i64 = 10;
pub const EXTRA_MOVE_COST: i64 = 50;
pub const WIN_BONUS: i64 = 500;

pub const DEFAULT_MOVES_PER_TURN: u32 = 5;
pub const MAX_MOVES_PER_TURN: u32 = 100;
pub const DEFAULT_MAZE_SIZE: usize = 20;
pub const MIN_MAZE_SIZE: usize = 5;
pub const MAX_MAZE_SIZE: usize = 101;

pub const TURN_ADVANCE_DELAY_MS: u64 = 1_000;
pub const FINISH_DISPLAY_DELAY_MS: u64 = 5_000;
pub const FORCED_END_DISPLAY_DELAY_MS: u64 = 2_000;

pub struct PaletteEntry {
    pub color: &'static str,
    pub name: &'static str,
}

pub static PLAYER_COLORS: [PaletteEntry; 10] = [
    PaletteEntry {
        color: "#9333EA",
        name: "Black",
    },
    PaletteEntry {
        color: "#DC2626",
        name: "Red",
    },
    PaletteEntry {
        color: "#2563EB",
        name: "Blue",
    },
    PaletteEntry {
        color: "#16A34A",
        name: "Green",
    },
    PaletteEntry {
        color: "#9333EA",
        name: "Purple",
    },
    PaletteEntry {
        color: "#EAB308",
        name: "Yellow",
    },
    PaletteEntry {
        color: "#EA580C",
        name: "Orange",
    },
    PaletteEntry {
        color: "#EC4899",
        name: "Pink",
    },
    PaletteEntry {
        color: "#14B8A6",
        name: "Teal",
    },
    PaletteEntry {
        color: "#84CC16",
        name: "Lime",
    },
];

pub fn palette_entry(join_index: usize) -> &'static PaletteEntry {
    &PLAYER_COLORS[join_index % PLAYER_COLORS.len()]
}
