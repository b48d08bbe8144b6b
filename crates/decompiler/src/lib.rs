//! FLW0 Decompiler Library
//!
//! Turns compiled battle-AI scripts (FLW0 containers, `.bf`) back into
//! readable Python-like pseudocode.
//!
//! The pipeline: parse the container (`flw-core`), abstract the
//! instruction stream into basic blocks of operations, lift those blocks
//! into an expression/statement tree by stack accounting, recover
//! structured control flow (if/elif/else, loops, break/continue, user
//! gotos), clean up, optionally optimize, and render.
//!
//! # Usage
//!
//! ```rust,ignore
//! use flwdec::{DecompileOptions, decompile};
//! use flwdec::natives::Game;
//! use flw_core::Alerts;
//!
//! let mut alerts = Alerts::new();
//! let options = DecompileOptions::new(Game::Eo3);
//! let pseudocode = decompile(&bytes, &options, &mut alerts)?;
//! ```

pub mod abst;
pub mod ast;
pub mod cfg;
pub mod cleanup;
pub mod display;
pub mod flow;
pub mod formatter;
pub mod natives;
pub mod operation;
pub mod optimize;
pub mod structure;

pub use abst::Abst;
pub use display::{NativeFormatter, display_decompilation};
pub use flow::abstract_flow;
pub use natives::{Game, NativeRegistry};
pub use optimize::OptimizeOptions;

use flw_core::{Alerts, FlowFile};

/// Everything a decompilation run needs besides the input bytes.
#[derive(Debug, Clone, Copy)]
pub struct DecompileOptions {
    pub game: Game,
    /// Disable the undirected-cycle merge pass; hand-written scripts can
    /// have shapes it mangles
    pub handwritten: bool,
    pub optimize: OptimizeOptions,
}

impl DecompileOptions {
    /// Defaults: no optimization passes, merge pass enabled.
    pub fn new(game: Game) -> DecompileOptions {
        DecompileOptions { game, handwritten: false, optimize: OptimizeOptions::none() }
    }
}

/// Decompile a container image to pseudocode.
pub fn decompile(
    data: &[u8],
    options: &DecompileOptions,
    alerts: &mut Alerts,
) -> Result<String, String> {
    decompile_with_formatter(data, options, None, alerts)
}

/// Decompile with a custom native-call formatter (see
/// [`display::NativeFormatter`]).
pub fn decompile_with_formatter(
    data: &[u8],
    options: &DecompileOptions,
    formatter: Option<&mut NativeFormatter<'_>>,
    alerts: &mut Alerts,
) -> Result<String, String> {
    let natives = NativeRegistry::for_game(options.game)?;
    let flow_file = FlowFile::parse(data, true, alerts).map_err(|e| e.to_string())?;
    let flow = abstract_flow(&flow_file, &natives, alerts)?;
    let mut tree = Abst::build(&flow, options.handwritten, alerts)?;
    tree.optimize(options.optimize, &natives);
    Ok(display_decompilation(&tree, &natives, formatter))
}

/// Decompile straight from a file on disk.
pub fn decompile_file(
    path: &std::path::Path,
    options: &DecompileOptions,
    alerts: &mut Alerts,
) -> Result<String, String> {
    let data = std::fs::read(path)
        .map_err(|e| format!("could not read {}: {}", path.display(), e))?;
    decompile(&data, options, alerts)
}
