//! Native-function registry.
//!
//! The game engine exposes script-callable natives by index; everything we
//! know about them (arity, whether they return a value, a name) has been
//! reverse engineered and lives in embedded per-game TOML tables. An index
//! missing from the table is not an error: the decompiler falls back to
//! stack-based arity inference and a `func_0xNNNN` rendering.
//!
//! A leading underscore on a name marks a speculative identification; it is
//! stripped for display.

use std::collections::HashMap;

use serde::Deserialize;

/// Embedded registry tables.
pub static EO3_NATIVES: &str = include_str!("natives/eo3.toml");
pub static EOU_NATIVES: &str = include_str!("natives/eou.toml");

/// Which game's registry to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Game {
    Eo3,
    Eou,
}

impl Game {
    pub fn code(self) -> &'static str {
        match self {
            Game::Eo3 => "EO3",
            Game::Eou => "EOU",
        }
    }
}

impl std::str::FromStr for Game {
    type Err = String;

    fn from_str(s: &str) -> Result<Game, String> {
        match s.to_ascii_uppercase().as_str() {
            "EO3" => Ok(Game::Eo3),
            "EOU" => Ok(Game::Eou),
            other => Err(format!("unknown game code {:?} (expected EO3 or EOU)", other)),
        }
    }
}

/// Declared return type of a native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeType {
    Int,
    Bool,
    Void,
    Unknown,
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NativeFunction {
    pub index: u16,
    pub num_params: u8,
    pub has_retval: bool,
    pub return_type: NativeType,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NativeFunction {
    /// Name with the speculative-marker underscore stripped.
    pub fn display_name(&self) -> &str {
        self.name.strip_prefix('_').unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
struct NativeTable {
    native: Vec<NativeFunction>,
}

/// Read-only lookup table of native functions for one game.
#[derive(Debug)]
pub struct NativeRegistry {
    by_index: HashMap<u16, NativeFunction>,
}

impl NativeRegistry {
    /// Parse a registry from TOML. Later entries win on index collisions,
    /// so tables can append corrections at the end.
    pub fn from_toml(toml_str: &str) -> Result<NativeRegistry, String> {
        let table: NativeTable = toml::from_str(toml_str)
            .map_err(|e| format!("Failed to parse native-function table: {}", e))?;
        let mut by_index = HashMap::new();
        for func in table.native {
            by_index.insert(func.index, func);
        }
        Ok(NativeRegistry { by_index })
    }

    /// Load the embedded registry for a game.
    pub fn for_game(game: Game) -> Result<NativeRegistry, String> {
        match game {
            Game::Eo3 => NativeRegistry::from_toml(EO3_NATIVES),
            Game::Eou => NativeRegistry::from_toml(EOU_NATIVES),
        }
    }

    /// An empty registry; every native becomes unknown-arity.
    pub fn empty() -> NativeRegistry {
        NativeRegistry { by_index: HashMap::new() }
    }

    pub fn lookup(&self, index: u16) -> Option<&NativeFunction> {
        self.by_index.get(&index)
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}
