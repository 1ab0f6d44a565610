//! Capability and resource vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named permission a module may exercise from inside its sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read or write files.
    Filesystem,
    /// Open outbound network connections.
    Network,
    /// Spawn host processes.
    Process,
    /// Read environment variables.
    Env,
}

impl Capability {
    /// All capabilities, in a stable order.
    pub const ALL: [Self; 4] = [Self::Filesystem, Self::Network, Self::Process, Self::Env];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Filesystem => "filesystem",
            Self::Network => "network",
            Self::Process => "process",
            Self::Env => "env",
        };
        f.write_str(s)
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "network" | "net" => Ok(Self::Network),
            "process" => Ok(Self::Process),
            "env" => Ok(Self::Env),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

/// A resource tracked by the governor against a per-module ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Memory, in bytes.
    Memory,
    /// Accumulated CPU/wall time spent in module code, in milliseconds.
    CpuTime,
}

impl ResourceType {
    /// All tracked resource types.
    pub const ALL: [Self; 2] = [Self::Memory, Self::CpuTime];

    /// Unit suffix used in log output.
    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            Self::Memory => "bytes",
            Self::CpuTime => "ms",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::CpuTime => f.write_str("cpu_time"),
        }
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "cpu" | "cpu_time" | "cputime" => Ok(Self::CpuTime),
            other => Err(format!("unknown resource type: {other}")),
        }
    }
}
