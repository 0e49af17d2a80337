use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("not initialized: run 'ses-relay init'")]
    NotInitialized,

    #[error("invalid CIDR '{0}': expected a.b.c.d/n with host bits cleared")]
    InvalidCidr(String),

    #[error("cannot carve {count} /{prefix} subnets out of {cidr}")]
    SubnetOverflow {
        cidr: String,
        prefix: u8,
        count: usize,
    },

    #[error("invalid logical id '{0}': must be alphanumeric")]
    InvalidLogicalId(String),

    #[error("duplicate logical id: {0}")]
    DuplicateResource(String),

    #[error("resource '{from}' references unknown resource '{to}'")]
    UnresolvedReference { from: String, to: String },

    #[error("dependency cycle between resources: {0}")]
    DependencyCycle(String),

    #[error("imported VPC '{0}' must list at least one subnet of each kind")]
    MissingSubnets(String),

    #[error("container build context not found: {0}")]
    BuildContextMissing(String),

    #[error("no container runtime found: install docker or podman")]
    NoContainerRuntime,

    #[error("container build failed: {0}")]
    BuildFailed(String),

    #[error("aws CLI not found on PATH: it is needed to reach ECR")]
    AwsCliMissing,

    #[error("image push failed: {0}")]
    PushFailed(String),

    #[error("cannot read build context: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
