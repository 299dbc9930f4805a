//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3       | model            | Model file could not be parsed           |
//! | 4-7     | engine           | One code per `EngineError` variant       |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use cellwork_engine::EngineError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing model file.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Model (3)
// =============================================================================

/// Model file is not valid TOML, or names an unknown builtin.
pub const EXIT_MODEL_PARSE: u8 = 3;

// =============================================================================
// Engine (4-7)
// =============================================================================

/// A requested cell (or one of its dependencies) does not exist.
pub const EXIT_UNKNOWN_CELL: u8 = 4;

/// A binding would close a dependency cycle.
pub const EXIT_CYCLIC: u8 = 5;

/// Arguments do not match the builtin's parameters.
pub const EXIT_BINDING: u8 = 6;

/// A builtin failed while computing a cell.
pub const EXIT_COMPUTATION: u8 = 7;

/// Map an engine error to its exit code.
pub fn engine_exit_code(err: &EngineError) -> u8 {
    match err {
        EngineError::UnknownCell(_) => EXIT_UNKNOWN_CELL,
        EngineError::CyclicDependency(_) => EXIT_CYCLIC,
        EngineError::ArgumentBinding(_) => EXIT_BINDING,
        EngineError::Computation { .. } => EXIT_COMPUTATION,
    }
}
