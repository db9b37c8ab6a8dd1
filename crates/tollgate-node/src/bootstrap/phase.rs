use serde::Serialize;
use std::fmt;

/// Observable lifecycle phase of a bootstrap run. Strictly advances; once
/// `Ready` is observed no earlier phase is emitted again in the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapPhase {
    Init,
    Discovering,
    Handshaking,
    Announcing,
    Ready,
    Failed,
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BootstrapPhase::Init => "init",
            BootstrapPhase::Discovering => "discovering",
            BootstrapPhase::Handshaking => "handshaking",
            BootstrapPhase::Announcing => "announcing",
            BootstrapPhase::Ready => "ready",
            BootstrapPhase::Failed => "failed",
        };
        label.fmt(f)
    }
}
