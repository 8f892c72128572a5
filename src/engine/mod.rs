//! Inference serving engine
//!
//! ```text
//!  samples ─► normalizer ─► dispatcher ─► backend ─► assembler ─► predictions
//!                               ▲
//!  ticker ─► synthetic flows ───┘ ──► assembler ─► multiplexer ─► subscribers
//! ```

pub mod normalizer;
pub mod backend;
pub mod dispatcher;
pub mod assembler;
pub mod multiplexer;
pub mod flows;

pub use normalizer::{FeatureSchema, Normalizer, ValidationError};
pub use backend::{BackendKind, HeuristicBackend, ScoringBackend, SyntheticBackend};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig};
pub use multiplexer::{Multiplexer, MultiplexerConfig};
pub use flows::SyntheticFlowSource;
