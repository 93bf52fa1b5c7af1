//! Shared types used across CLI commands.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Which loop `fuzz`-style commands run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FuzzMode {
    Fuzz,
    FuzzDeflake,
}
