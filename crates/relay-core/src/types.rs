use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// CpuArchitecture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuArchitecture {
    #[serde(rename = "ARM64")]
    Arm64,
    #[serde(rename = "X86_64")]
    X86_64,
}

// ---------------------------------------------------------------------------
// OperatingSystemFamily
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatingSystemFamily {
    #[serde(rename = "LINUX")]
    Linux,
}

// ---------------------------------------------------------------------------
// RuntimePlatform
// ---------------------------------------------------------------------------

/// Task-definition runtime platform, serialized in CloudFormation shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimePlatform {
    pub operating_system_family: OperatingSystemFamily,
    pub cpu_architecture: CpuArchitecture,
}

impl RuntimePlatform {
    /// Map a docker build platform onto a Fargate runtime platform.
    ///
    /// Only `linux/arm64` and `linux/amd64` are recognized; anything else
    /// leaves the task definition unconstrained.
    pub fn from_build_platform(platform: &str) -> Option<Self> {
        let cpu_architecture = match platform.trim().to_ascii_lowercase().as_str() {
            "linux/arm64" => CpuArchitecture::Arm64,
            "linux/amd64" => CpuArchitecture::X86_64,
            _ => return None,
        };
        Some(Self {
            operating_system_family: OperatingSystemFamily::Linux,
            cpu_architecture,
        })
    }
}

// ---------------------------------------------------------------------------
// LoadBalancerScheme
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancerScheme {
    InternetFacing,
    Internal,
}

impl LoadBalancerScheme {
    pub fn from_public(public: bool) -> Self {
        if public {
            LoadBalancerScheme::InternetFacing
        } else {
            LoadBalancerScheme::Internal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadBalancerScheme::InternetFacing => "internet-facing",
            LoadBalancerScheme::Internal => "internal",
        }
    }
}

impl fmt::Display for LoadBalancerScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
