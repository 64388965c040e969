use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the exploration pipeline.
///
/// Construction and simulation errors abort the evaluation they occur in;
/// they are never silently recovered from.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A CSDF graph could not be built: rate mismatch on a channel, or an
    /// invalid fused-self-loop request.
    GraphConstruction(String),
    /// The simulated execution violated an invariant: an actor finished with
    /// the wrong phase count, or a buffer under/overflowed during firing.
    SimulationConsistency(String),
    /// Best-buffer selection was attempted on an empty eligible set.
    ReuseSelection(String),
    /// A configuration or input document is missing or malformed.
    Config(String),
    /// Underlying I/O failure.
    Io(String),
}

impl Error {
    /// Attach the name of the orchestration stage that failed.
    pub fn at_stage(self, stage: &str) -> Error {
        match self {
            Error::GraphConstruction(m) => Error::GraphConstruction(stage_msg(stage, &m)),
            Error::SimulationConsistency(m) => Error::SimulationConsistency(stage_msg(stage, &m)),
            Error::ReuseSelection(m) => Error::ReuseSelection(stage_msg(stage, &m)),
            Error::Config(m) => Error::Config(stage_msg(stage, &m)),
            Error::Io(m) => Error::Io(stage_msg(stage, &m)),
        }
    }
}

fn stage_msg(stage: &str, msg: &str) -> String {
    format!("stage '{stage}': {msg}")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::GraphConstruction(m) => write!(f, "graph construction error: {m}"),
            Error::SimulationConsistency(m) => write!(f, "simulation consistency error: {m}"),
            Error::ReuseSelection(m) => write!(f, "reuse selection error: {m}"),
            Error::Config(m) => write!(f, "config error: {m}"),
            Error::Io(m) => write!(f, "io error: {m}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
