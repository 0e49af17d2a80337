use crate::error::{RelayError, Result};
use crate::network::{carve_subnets, subnet_count, Cidr, COMMON_REGION_AZS};
use crate::paths;
use crate::service::is_valid_fargate_size;
use crate::types::RuntimePlatform;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Changing `name` provisions a brand-new stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
}

fn default_app_name() -> String {
    "SESRELAY".to_string()
}

fn default_app_version() -> String {
    "version 0.1".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

impl AppConfig {
    pub fn stack_description(&self) -> String {
        format!("FargateSESRelay ({})", self.version)
    }
}

// ---------------------------------------------------------------------------
// NetworkConfig
// ---------------------------------------------------------------------------

/// An existing VPC imported by id instead of creating a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExistingVpc {
    pub vpc_id: String,
    #[serde(default)]
    pub public_subnet_ids: Vec<String>,
    #[serde(default)]
    pub private_subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(default = "default_vpc_cidr")]
    pub vpc_cidr: String,
    #[serde(default = "default_max_azs")]
    pub max_azs: usize,
    /// One NAT gateway by default, not one per AZ.
    #[serde(default = "default_nat_gateways")]
    pub nat_gateways: usize,
    #[serde(default = "default_subnet_prefix")]
    pub subnet_prefix: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<ExistingVpc>,
}

fn default_vpc_cidr() -> String {
    "10.21.0.0/16".to_string()
}

fn default_max_azs() -> usize {
    3
}

fn default_nat_gateways() -> usize {
    1
}

fn default_subnet_prefix() -> u8 {
    24
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            vpc_cidr: default_vpc_cidr(),
            max_azs: default_max_azs(),
            nat_gateways: default_nat_gateways(),
            subnet_prefix: default_subnet_prefix(),
            existing: None,
        }
    }
}

// ---------------------------------------------------------------------------
// LoadBalancerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerConfig {
    /// Internet-facing when true. A public relay without client and HELO
    /// restrictions is an open relay.
    #[serde(default)]
    pub public: bool,
    /// Client CIDRs allowed through the load balancer security group. Also
    /// handed to Postfix as `mynetworks`. Unset means the VPC range; see
    /// [`RelayConfig::allowed_clients`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_clients: Option<Vec<String>>,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            public: false,
            allowed_clients: None,
        }
    }
}

// ---------------------------------------------------------------------------
// RelaySettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeloConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for HeloConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySettings {
    /// Container networking port. Postfix itself keeps listening on 25.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_ses_endpoint")]
    pub ses_smtp_endpoint: String,
    #[serde(default)]
    pub helo: HeloConfig,
}

fn default_smtp_port() -> u16 {
    25
}

fn default_ses_endpoint() -> String {
    "email-smtp.us-east-1.amazonaws.com".to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            smtp_port: default_smtp_port(),
            ses_smtp_endpoint: default_ses_endpoint(),
            helo: HeloConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// SecretConfig
// ---------------------------------------------------------------------------

/// Secrets Manager secret holding the SES SMTP credentials as JSON fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    #[serde(default = "default_secret_arn")]
    pub arn: String,
    #[serde(default = "default_username_key")]
    pub username_key: String,
    #[serde(default = "default_password_key")]
    pub password_key: String,
}

fn default_secret_arn() -> String {
    "arn:aws:secretsmanager:us-east-1:123456789123:secret:ses_smtp_secret-ABCDEF".to_string()
}

fn default_username_key() -> String {
    "ses_smtp_username".to_string()
}

fn default_password_key() -> String {
    "ses_smtp_password".to_string()
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            arn: default_secret_arn(),
            username_key: default_username_key(),
            password_key: default_password_key(),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default = "default_task_cpu")]
    pub cpu: u32,
    #[serde(default = "default_task_memory")]
    pub memory_mib: u32,
    #[serde(default = "default_task_count")]
    pub count: u32,
    /// Allows `aws ecs execute-command` into running tasks. Keep off in production.
    #[serde(default)]
    pub enable_exec_command: bool,
    /// `linux/arm64` for Graviton or `linux/amd64` for x86_64.
    #[serde(default = "default_build_platform")]
    pub build_platform: String,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_retention_days: Option<u32>,
}

fn default_task_cpu() -> u32 {
    1024
}

fn default_task_memory() -> u32 {
    2048
}

fn default_task_count() -> u32 {
    1
}

fn default_build_platform() -> String {
    "linux/arm64".to_string()
}

fn default_container_name() -> String {
    "postfix-relay".to_string()
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            cpu: default_task_cpu(),
            memory_mib: default_task_memory(),
            count: default_task_count(),
            enable_exec_command: false,
            build_platform: default_build_platform(),
            container_name: default_container_name(),
            log_retention_days: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AutoscalingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoscalingConfig {
    #[serde(default = "default_min_tasks")]
    pub min_tasks: u32,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: u32,
    #[serde(default = "default_target_cpu")]
    pub target_cpu_percent: u32,
    #[serde(default = "default_cooldown")]
    pub scale_in_cooldown_secs: u32,
    #[serde(default = "default_cooldown")]
    pub scale_out_cooldown_secs: u32,
}

fn default_min_tasks() -> u32 {
    1
}

fn default_max_tasks() -> u32 {
    10
}

fn default_target_cpu() -> u32 {
    50
}

fn default_cooldown() -> u32 {
    60
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            min_tasks: default_min_tasks(),
            max_tasks: default_max_tasks(),
            target_cpu_percent: default_target_cpu(),
            scale_in_cooldown_secs: default_cooldown(),
            scale_out_cooldown_secs: default_cooldown(),
        }
    }
}

// ---------------------------------------------------------------------------
// ImageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    /// Build context, relative to the project root.
    #[serde(default = "default_image_dir")]
    pub directory: PathBuf,
    /// ECR repository the image is pushed to.
    #[serde(default = "default_repository")]
    pub repository: String,
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("container")
}

fn default_repository() -> String {
    "ses-relay".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            directory: default_image_dir(),
            repository: default_repository(),
        }
    }
}

// ---------------------------------------------------------------------------
// RelayConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub secret: SecretConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub autoscaling: AutoscalingConfig,
    #[serde(default)]
    pub image: ImageConfig,
}

/// CloudWatch Logs only accepts these retention periods.
pub const LOG_RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

static SECRET_ARN_RE: OnceLock<Regex> = OnceLock::new();

fn secret_arn_re() -> &'static Regex {
    SECRET_ARN_RE.get_or_init(|| {
        Regex::new(r"^arn:aws[a-z\-]*:secretsmanager:[a-z0-9\-]+:\d{12}:secret:.+$").unwrap()
    })
}

impl RelayConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RelayError::NotInitialized);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: RelayConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Write this config to `<root>/relay.yaml` unless a config is already
    /// there. Returns true if written.
    pub fn write_if_missing(&self, root: &Path) -> Result<bool> {
        let data = serde_yaml::to_string(self)?;
        crate::io::write_if_missing(&paths::config_path(root), data.as_bytes())
    }

    /// Effective client allow-list: the configured CIDRs, else the VPC range.
    pub fn allowed_clients(&self) -> Vec<String> {
        match &self.load_balancer.allowed_clients {
            Some(clients) => clients.clone(),
            None => vec![self.network.vpc_cidr.clone()],
        }
    }

    pub fn runtime_platform(&self) -> Option<RuntimePlatform> {
        RuntimePlatform::from_build_platform(&self.task.build_platform)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Advisory checks. Loading never runs these; the caller decides whether
    /// error-level findings stop a synth.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        self.validate_network(&mut warnings);
        self.validate_clients(&mut warnings);
        self.validate_relay(&mut warnings);
        self.validate_task(&mut warnings);
        self.validate_scaling(&mut warnings);

        if !secret_arn_re().is_match(&self.secret.arn) {
            warnings.push(ConfigWarning::error(format!(
                "secret.arn '{}' is not a complete Secrets Manager secret ARN",
                self.secret.arn
            )));
        }
        if self.secret.username_key.trim().is_empty() || self.secret.password_key.trim().is_empty()
        {
            warnings.push(ConfigWarning::error(
                "secret.username_key and secret.password_key must both be set",
            ));
        }

        warnings
    }

    fn validate_network(&self, warnings: &mut Vec<ConfigWarning>) {
        if let Some(existing) = &self.network.existing {
            if existing.private_subnet_ids.is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "imported VPC '{}' lists no private subnets for the service",
                    existing.vpc_id
                )));
            }
            if self.load_balancer.public && existing.public_subnet_ids.is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "imported VPC '{}' lists no public subnets for an internet-facing load balancer",
                    existing.vpc_id
                )));
            }
            return;
        }

        let vpc = match self.network.vpc_cidr.parse::<Cidr>() {
            Ok(c) => c,
            Err(_) => {
                warnings.push(ConfigWarning::error(format!(
                    "network.vpc_cidr '{}' is not a valid CIDR",
                    self.network.vpc_cidr
                )));
                return;
            }
        };

        if self.network.max_azs == 0 {
            warnings.push(ConfigWarning::error("network.max_azs must be at least 1"));
            return;
        }
        if self.network.nat_gateways == 0 {
            warnings.push(ConfigWarning::error(
                "network.nat_gateways must be at least 1: tasks pull their image through NAT",
            ));
        } else if self.network.nat_gateways > self.network.max_azs {
            warnings.push(ConfigWarning::warning(format!(
                "network.nat_gateways={} exceeds max_azs={}; only {} will be created",
                self.network.nat_gateways, self.network.max_azs, self.network.max_azs
            )));
        }
        if self.network.max_azs > COMMON_REGION_AZS {
            warnings.push(ConfigWarning::warning(format!(
                "network.max_azs={} exceeds the {COMMON_REGION_AZS} zones most regions offer; \
                 deploys fail in regions with fewer",
                self.network.max_azs
            )));
        }
        let fits = subnet_count(self.network.max_azs)
            .map(|count| carve_subnets(&vpc, self.network.subnet_prefix, count).is_ok())
            .unwrap_or(false);
        if !fits {
            warnings.push(ConfigWarning::error(format!(
                "{} cannot hold a public and a private /{} subnet for each of {} zones",
                vpc, self.network.subnet_prefix, self.network.max_azs
            )));
        }
    }

    fn validate_clients(&self, warnings: &mut Vec<ConfigWarning>) {
        let clients = self.allowed_clients();
        if clients.is_empty() {
            warnings.push(ConfigWarning::warning(
                "load_balancer.allowed_clients is empty: no client can reach the relay",
            ));
        }
        for client in &clients {
            match client.parse::<Cidr>() {
                Ok(cidr) if cidr.prefix() == 0 && self.load_balancer.public => {
                    warnings.push(ConfigWarning::warning(format!(
                        "allowed client '{client}' on an internet-facing load balancer \
                         makes this an open public relay"
                    )));
                }
                Ok(_) => {}
                Err(_) => warnings.push(ConfigWarning::error(format!(
                    "allowed client '{client}' is not a valid CIDR"
                ))),
            }
        }
        if self.load_balancer.public && !self.relay.helo.enabled {
            warnings.push(ConfigWarning::warning(
                "internet-facing load balancer without HELO domain restrictions",
            ));
        }
    }

    fn validate_relay(&self, warnings: &mut Vec<ConfigWarning>) {
        match self.relay.smtp_port {
            0 => warnings.push(ConfigWarning::error("relay.smtp_port must not be 0")),
            25 => {}
            port => warnings.push(ConfigWarning::warning(format!(
                "relay.smtp_port={port}: the container's Postfix still listens on 25"
            ))),
        }
        if self.relay.ses_smtp_endpoint.trim().is_empty() {
            warnings.push(ConfigWarning::error("relay.ses_smtp_endpoint is empty"));
        }
        if self.relay.helo.enabled && self.relay.helo.allowed_domains.is_empty() {
            warnings.push(ConfigWarning::warning(
                "HELO restrictions are enabled but relay.helo.allowed_domains is empty",
            ));
        }
    }

    fn validate_task(&self, warnings: &mut Vec<ConfigWarning>) {
        if !is_valid_fargate_size(self.task.cpu, self.task.memory_mib) {
            warnings.push(ConfigWarning::error(format!(
                "task.cpu={} with task.memory_mib={} is not a supported Fargate size",
                self.task.cpu, self.task.memory_mib
            )));
        }
        if self.runtime_platform().is_none() {
            warnings.push(ConfigWarning::warning(format!(
                "task.build_platform '{}' is not linux/arm64 or linux/amd64; \
                 no runtime platform will be set",
                self.task.build_platform
            )));
        }
        if self.task.enable_exec_command {
            warnings.push(ConfigWarning::warning(
                "task.enable_exec_command is on; disable it for production",
            ));
        }
        if let Some(days) = self.task.log_retention_days {
            if !LOG_RETENTION_DAYS.contains(&days) {
                warnings.push(ConfigWarning::error(format!(
                    "task.log_retention_days={days} is not a CloudWatch retention period"
                )));
            }
        }
    }

    fn validate_scaling(&self, warnings: &mut Vec<ConfigWarning>) {
        let scaling = &self.autoscaling;
        if scaling.max_tasks == 0 {
            warnings.push(ConfigWarning::error("autoscaling.max_tasks must be at least 1"));
        }
        if scaling.min_tasks > scaling.max_tasks {
            warnings.push(ConfigWarning::error(format!(
                "autoscaling.min_tasks={} exceeds max_tasks={}",
                scaling.min_tasks, scaling.max_tasks
            )));
        }
        if self.task.count > scaling.max_tasks {
            warnings.push(ConfigWarning::error(format!(
                "task.count={} exceeds autoscaling.max_tasks={}",
                self.task.count, scaling.max_tasks
            )));
        }
        if self.task.count == 0 {
            warnings.push(ConfigWarning::warning("task.count is 0: the relay starts with no tasks"));
        }
        if !(1..=100).contains(&scaling.target_cpu_percent) {
            warnings.push(ConfigWarning::error(format!(
                "autoscaling.target_cpu_percent={} must be between 1 and 100",
                scaling.target_cpu_percent
            )));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn errors(cfg: &RelayConfig) -> Vec<String> {
        cfg.validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect()
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.app.name, "SESRELAY");
        assert_eq!(cfg.app.stack_description(), "FargateSESRelay (version 0.1)");
        assert_eq!(cfg.network.vpc_cidr, "10.21.0.0/16");
        assert!(!cfg.load_balancer.public);
        assert_eq!(cfg.load_balancer.allowed_clients, None);
        assert_eq!(cfg.allowed_clients(), ["10.21.0.0/16"]);
        assert_eq!(cfg.relay.smtp_port, 25);
        assert!(cfg.relay.helo.enabled);
        assert_eq!(cfg.task.cpu, 1024);
        assert_eq!(cfg.task.memory_mib, 2048);
        assert_eq!(cfg.autoscaling.max_tasks, 10);
        assert_eq!(cfg.task.build_platform, "linux/arm64");
    }

    #[test]
    fn partial_yaml_takes_defaults() {
        let yaml = "load_balancer:\n  public: true\ntask:\n  count: 3\n";
        let cfg: RelayConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.load_balancer.public);
        assert_eq!(cfg.allowed_clients(), ["10.21.0.0/16"]);
        assert_eq!(cfg.task.count, 3);
        assert_eq!(cfg.task.cpu, 1024);
        assert_eq!(cfg.secret.username_key, "ses_smtp_username");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "task:\n  cpus: 512\n";
        assert!(serde_yaml::from_str::<RelayConfig>(yaml).is_err());
    }

    #[test]
    fn load_missing_config_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RelayConfig::load(dir.path()),
            Err(RelayError::NotInitialized)
        ));
    }

    #[test]
    fn allowed_clients_follow_the_vpc_range() {
        let cfg: RelayConfig = serde_yaml::from_str("network:\n  vpc_cidr: 10.50.0.0/16\n").unwrap();
        assert_eq!(cfg.allowed_clients(), ["10.50.0.0/16"]);

        let yaml = "network:\n  vpc_cidr: 10.50.0.0/16\nload_balancer:\n  allowed_clients: []\n";
        let cfg: RelayConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.allowed_clients().is_empty());
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("allowed_clients is empty")));
    }

    #[test]
    fn write_if_missing_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = RelayConfig::default();
        cfg.relay.helo.allowed_domains = vec!["example.com".to_string()];
        assert!(cfg.write_if_missing(dir.path()).unwrap());
        assert!(!RelayConfig::default().write_if_missing(dir.path()).unwrap());
        let loaded = RelayConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.relay.helo.allowed_domains, ["example.com"]);
        assert_eq!(loaded.load_balancer.allowed_clients, None);
    }

    #[test]
    fn default_config_has_no_errors() {
        assert!(errors(&RelayConfig::default()).is_empty());
    }

    #[test]
    fn invalid_client_cidr_is_an_error() {
        let mut cfg = RelayConfig::default();
        cfg.load_balancer.allowed_clients =
            Some(vec!["10.21.0.0/16".to_string(), "10.0.0.300/32".to_string()]);
        let errs = errors(&cfg);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("10.0.0.300/32"));
    }

    #[test]
    fn open_public_relay_is_flagged() {
        let mut cfg = RelayConfig::default();
        cfg.load_balancer.public = true;
        cfg.load_balancer.allowed_clients = Some(vec!["0.0.0.0/0".to_string()]);
        cfg.relay.helo.enabled = false;
        let msgs: Vec<String> = cfg.validate().into_iter().map(|w| w.message).collect();
        assert!(msgs.iter().any(|m| m.contains("open public relay")));
        assert!(msgs.iter().any(|m| m.contains("without HELO")));
    }

    #[test]
    fn fargate_size_and_scaling_bounds() {
        let mut cfg = RelayConfig::default();
        cfg.task.cpu = 256;
        cfg.task.memory_mib = 4096;
        cfg.task.count = 12;
        let errs = errors(&cfg);
        assert!(errs.iter().any(|m| m.contains("Fargate size")));
        assert!(errs.iter().any(|m| m.contains("exceeds autoscaling.max_tasks")));
    }

    #[test]
    fn subnet_carving_must_fit() {
        let mut cfg = RelayConfig::default();
        cfg.network.vpc_cidr = "10.0.0.0/23".to_string();
        assert!(errors(&cfg)
            .iter()
            .any(|m| m.contains("cannot hold a public and a private /24 subnet for each of 3 zones")));
    }

    #[test]
    fn huge_zone_count_is_reported_not_fatal() {
        let cfg: RelayConfig =
            serde_yaml::from_str("network:\n  max_azs: 18446744073709551615\n").unwrap();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("cannot hold")));
    }

    #[test]
    fn more_zones_than_most_regions_is_a_warning() {
        let mut cfg = RelayConfig::default();
        cfg.network.max_azs = 4;
        cfg.network.vpc_cidr = "10.21.0.0/16".to_string();
        let warnings = cfg.validate();
        let zone = warnings
            .iter()
            .find(|w| w.message.contains("network.max_azs=4"))
            .unwrap();
        assert_eq!(zone.level, WarnLevel::Warning);
        assert!(errors(&cfg).is_empty());
    }

    #[test]
    fn imported_vpc_needs_private_subnets() {
        let mut cfg = RelayConfig::default();
        cfg.network.existing = Some(ExistingVpc {
            vpc_id: "vpc-123".to_string(),
            public_subnet_ids: vec![],
            private_subnet_ids: vec![],
        });
        assert!(errors(&cfg).iter().any(|m| m.contains("no private subnets")));
    }

    #[test]
    fn malformed_secret_arn_and_retention() {
        let mut cfg = RelayConfig::default();
        cfg.secret.arn = "ses_smtp_secret".to_string();
        cfg.task.log_retention_days = Some(10);
        let errs = errors(&cfg);
        assert!(errs.iter().any(|m| m.contains("secret.arn")));
        assert!(errs.iter().any(|m| m.contains("retention")));
    }

    #[test]
    fn unknown_platform_is_only_a_warning() {
        let mut cfg = RelayConfig::default();
        cfg.task.build_platform = "linux/riscv64".to_string();
        assert!(cfg.runtime_platform().is_none());
        assert!(errors(&cfg).is_empty());
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("no runtime platform")));
    }
}
