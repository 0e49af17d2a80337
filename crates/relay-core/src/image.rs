//! The relay's container image: build context, build args, content hash, the
//! container runtime that builds it and the push to ECR.
//!
//! The image tag is a SHA-256 over the build args and every file in the build
//! context, so the template only changes when the image would.

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::paths;
use crate::registry::{self, EcrRegistry};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use walkdir::WalkDir;

/// The available container runtimes, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }
}

/// Detect the first container runtime on `PATH`.
pub fn detect_runtime() -> Option<ContainerRuntime> {
    if which::which("docker").is_ok() {
        return Some(ContainerRuntime::Docker);
    }
    if which::which("podman").is_ok() {
        return Some(ContainerRuntime::Podman);
    }
    None
}

// ---------------------------------------------------------------------------
// ContainerAsset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerAsset {
    pub directory: PathBuf,
    pub build_args: BTreeMap<String, String>,
    pub platform: String,
    pub repository: String,
}

impl ContainerAsset {
    pub fn from_config(config: &RelayConfig, root: &Path) -> Self {
        let mut build_args = BTreeMap::new();
        build_args.insert(
            "POSTFIX_SMTP_PORT".to_string(),
            config.relay.smtp_port.to_string(),
        );
        build_args.insert(
            "BUILD_PLATFORM".to_string(),
            config.task.build_platform.clone(),
        );
        Self {
            directory: paths::resolve(root, &config.image.directory),
            build_args,
            platform: config.task.build_platform.clone(),
            repository: config.image.repository.clone(),
        }
    }

    /// Hex SHA-256 of the build args and the build context contents.
    pub fn asset_hash(&self) -> Result<String> {
        if !self.directory.is_dir() {
            return Err(RelayError::BuildContextMissing(
                self.directory.display().to_string(),
            ));
        }
        let mut hasher = Sha256::new();
        for (key, value) in &self.build_args {
            hasher.update(format!("arg:{key}={value}\n").as_bytes());
        }
        hasher.update(format!("platform:{}\n", self.platform).as_bytes());

        // Symlinks are followed: the runtime sends their targets as context.
        let walker = WalkDir::new(&self.directory)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file = entry.path();
            let rel = file.strip_prefix(&self.directory).unwrap_or(file);
            let rel = rel.to_string_lossy().replace('\\', "/");
            let data = std::fs::read(file)?;
            hasher.update(format!("file:{rel}:{}\n", data.len()).as_bytes());
            hasher.update(&data);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Image URI resolved by CloudFormation at deploy time.
    pub fn image_uri(&self, hash: &str) -> String {
        format!(
            "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/{}:{hash}",
            self.repository
        )
    }

    pub fn local_tag(&self, hash: &str) -> String {
        format!("{}:{hash}", self.repository)
    }

    /// Arguments for `<runtime> build`.
    pub fn build_args_for(&self, hash: &str) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--platform".to_string(),
            self.platform.clone(),
        ];
        for (key, value) in &self.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("-t".to_string());
        args.push(self.local_tag(hash));
        args.push(self.directory.display().to_string());
        args
    }

    pub fn build_command(&self, runtime: ContainerRuntime, hash: &str) -> Command {
        let mut cmd = Command::new(runtime.name());
        cmd.args(self.build_args_for(hash));
        cmd
    }

    /// Build the image locally. Output streams through to the terminal.
    pub fn build(&self, runtime: ContainerRuntime, hash: &str) -> Result<()> {
        tracing::info!(runtime = runtime.name(), tag = %self.local_tag(hash), "building container image");
        let status = self
            .build_command(runtime, hash)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| RelayError::BuildFailed(e.to_string()))?;
        if !status.success() {
            return Err(RelayError::BuildFailed(format!(
                "{} build exited with {status}",
                runtime.name()
            )));
        }
        Ok(())
    }

    pub fn manifest(&self, hash: &str) -> AssetManifest {
        let mut docker_images = BTreeMap::new();
        docker_images.insert(
            hash.to_string(),
            DockerImageAsset {
                source: DockerImageSource {
                    directory: self.directory.display().to_string(),
                    docker_build_args: self.build_args.clone(),
                    platform: self.platform.clone(),
                },
                destination: DockerImageDestination {
                    repository_name: self.repository.clone(),
                    image_tag: hash.to_string(),
                },
            },
        );
        AssetManifest {
            version: ASSET_MANIFEST_VERSION.to_string(),
            docker_images,
        }
    }
}

// ---------------------------------------------------------------------------
// Push to ECR
// ---------------------------------------------------------------------------

/// `<runtime> login` arguments. The password arrives on stdin.
pub fn login_args(registry: &EcrRegistry) -> Vec<String> {
    vec![
        "login".to_string(),
        "--username".to_string(),
        "AWS".to_string(),
        "--password-stdin".to_string(),
        registry.host(),
    ]
}

impl ContainerAsset {
    pub fn remote_tag(&self, registry: &EcrRegistry, hash: &str) -> String {
        registry.image(&self.repository, hash)
    }

    pub fn tag_args(&self, registry: &EcrRegistry, hash: &str) -> Vec<String> {
        vec![
            "tag".to_string(),
            self.local_tag(hash),
            self.remote_tag(registry, hash),
        ]
    }

    pub fn push_args(&self, registry: &EcrRegistry, hash: &str) -> Vec<String> {
        vec!["push".to_string(), self.remote_tag(registry, hash)]
    }

    /// Log in to ECR, tag the local build and push it. Returns the pushed
    /// reference. The local image `<repo>:<hash>` must already exist.
    pub fn push(&self, runtime: ContainerRuntime, registry: &EcrRegistry, hash: &str) -> Result<String> {
        let password = registry::login_password(&registry.region)?;
        login(runtime, registry, &password)?;
        run_runtime(runtime, &self.tag_args(registry, hash))?;
        run_runtime(runtime, &self.push_args(registry, hash))?;
        let remote = self.remote_tag(registry, hash);
        tracing::info!(image = %remote, "pushed container image");
        Ok(remote)
    }
}

fn login(runtime: ContainerRuntime, registry: &EcrRegistry, password: &str) -> Result<()> {
    let mut child = Command::new(runtime.name())
        .args(login_args(registry))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| RelayError::PushFailed(format!("{} login: {e}", runtime.name())))?;
    // Dropped at the end of the block so the runtime sees EOF.
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(password.as_bytes())
            .map_err(|e| RelayError::PushFailed(format!("failed to write password: {e}")))?;
    }
    let status = child
        .wait()
        .map_err(|e| RelayError::PushFailed(e.to_string()))?;
    if !status.success() {
        return Err(RelayError::PushFailed(format!(
            "{} login to {} exited with {status}",
            runtime.name(),
            registry.host()
        )));
    }
    Ok(())
}

fn run_runtime(runtime: ContainerRuntime, args: &[String]) -> Result<()> {
    let status = Command::new(runtime.name())
        .args(args)
        .stdin(Stdio::null())
        .status()
        .map_err(|e| RelayError::PushFailed(e.to_string()))?;
    if !status.success() {
        return Err(RelayError::PushFailed(format!(
            "{} {} exited with {status}",
            runtime.name(),
            args.first().map(String::as_str).unwrap_or_default()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Asset manifest
// ---------------------------------------------------------------------------

pub const ASSET_MANIFEST_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    pub version: String,
    pub docker_images: BTreeMap<String, DockerImageAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DockerImageAsset {
    pub source: DockerImageSource,
    pub destination: DockerImageDestination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerImageSource {
    pub directory: String,
    pub docker_build_args: BTreeMap<String, String>,
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerImageDestination {
    pub repository_name: String,
    pub image_tag: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
