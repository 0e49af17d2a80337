//! Amazon ECR: registry addressing and the `aws` CLI calls that look up the
//! caller's account, create the relay repository and fetch a login password.
//!
//! The template names the repository but does not declare it. It has to exist,
//! holding the hashed tag, before the stack is deployed.

use crate::error::{RelayError, Result};
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcrRegistry {
    pub account_id: String,
    pub region: String,
}

impl EcrRegistry {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
        }
    }

    /// Registry host. Matches what `${AWS::URLSuffix}` resolves to when the
    /// stack is deployed in the same region.
    pub fn host(&self) -> String {
        let suffix = if self.region.starts_with("cn-") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };
        format!("{}.dkr.ecr.{}.{suffix}", self.account_id, self.region)
    }

    pub fn image(&self, repository: &str, tag: &str) -> String {
        format!("{}/{repository}:{tag}", self.host())
    }
}

// ---------------------------------------------------------------------------
// aws CLI invocations
// ---------------------------------------------------------------------------

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

pub fn caller_account_args() -> Vec<String> {
    strings(&["sts", "get-caller-identity", "--query", "Account", "--output", "text"])
}

pub fn login_password_args(region: &str) -> Vec<String> {
    strings(&["ecr", "get-login-password", "--region", region])
}

pub fn describe_repository_args(region: &str, repository: &str) -> Vec<String> {
    strings(&[
        "ecr",
        "describe-repositories",
        "--region",
        region,
        "--repository-names",
        repository,
    ])
}

/// Tags stay mutable: re-pushing an unchanged build reuses its content hash.
pub fn create_repository_args(region: &str, repository: &str) -> Vec<String> {
    strings(&[
        "ecr",
        "create-repository",
        "--region",
        region,
        "--repository-name",
        repository,
        "--image-scanning-configuration",
        "scanOnPush=true",
    ])
}

/// Run `aws <args>` and return its trimmed stdout.
fn aws(args: &[String]) -> Result<String> {
    let aws = which::which("aws").map_err(|_| RelayError::AwsCliMissing)?;
    let what = args.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
    tracing::debug!(command = %what, "running aws");

    let output = Command::new(aws)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| RelayError::PushFailed(format!("aws {what}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RelayError::PushFailed(format!(
            "aws {what} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Account id of the credentials the `aws` CLI is using.
pub fn caller_account() -> Result<String> {
    aws(&caller_account_args())
}

pub fn login_password(region: &str) -> Result<String> {
    aws(&login_password_args(region))
}

/// Create the repository unless it exists. Returns true if it was created.
pub fn ensure_repository(region: &str, repository: &str) -> Result<bool> {
    match aws(&describe_repository_args(region, repository)) {
        Ok(_) => Ok(false),
        Err(RelayError::PushFailed(msg)) if msg.contains("RepositoryNotFoundException") => {
            aws(&create_repository_args(region, repository))?;
            tracing::info!(repository, region, "created ECR repository");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
