//! The stack builder: one pass from configuration to a checked template.
//!
//! Declaration order:
//! network → cluster → image → load balancer → service → autoscaling → outputs.
//! The secret is imported by ARN only, so it contributes `Secrets` entries and
//! an execution-role grant but no resource of its own.

use crate::config::RelayConfig;
use crate::error::Result;
use crate::image::{AssetManifest, ContainerAsset};
use crate::load_balancer::{self, LOAD_BALANCER_ID};
use crate::network;
use crate::paths;
use crate::scaling;
use crate::service::{self, CLUSTER_ID, SERVICE_ID};
use crate::template::{get_att, ref_to, Template};
use std::path::{Path, PathBuf};

/// A synthesized stack: the template and the image asset it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    pub name: String,
    pub template: Template,
    pub assets: AssetManifest,
    pub image_tag: String,
}

impl Stack {
    /// Write `<name>.template.json` and `<name>.assets.json` into `out`.
    pub fn write(&self, out: &Path) -> Result<(PathBuf, PathBuf)> {
        let template_path = paths::template_path(out, &self.name);
        let assets_path = paths::assets_path(out, &self.name);
        let template_json = self.template.to_json()?;
        let assets_json = serde_json::to_string_pretty(&self.assets)?;
        crate::io::atomic_write(&template_path, template_json.as_bytes())?;
        crate::io::atomic_write(&assets_path, assets_json.as_bytes())?;
        tracing::info!(path = %template_path.display(), "wrote template");
        Ok((template_path, assets_path))
    }
}

pub struct StackBuilder<'a> {
    config: &'a RelayConfig,
    root: &'a Path,
    image_tag: Option<String>,
}

impl<'a> StackBuilder<'a> {
    pub fn new(config: &'a RelayConfig, root: &'a Path) -> Self {
        Self {
            config,
            root,
            image_tag: None,
        }
    }

    /// Use a known image tag instead of hashing the build context.
    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = Some(tag.into());
        self
    }

    pub fn build(self) -> Result<Stack> {
        let config = self.config;
        let name = config.app.name.clone();
        let _span = tracing::info_span!("synth", stack = %name).entered();

        let mut template = Template::new(config.app.stack_description());

        let net = network::declare_network(
            &mut template,
            &name,
            &config.network,
            config.load_balancer.public,
        )?;
        let cluster = service::declare_cluster(&mut template)?;

        let asset = ContainerAsset::from_config(config, self.root);
        let image_tag = match self.image_tag {
            Some(tag) => tag,
            None => asset.asset_hash()?,
        };
        let image_uri = asset.image_uri(&image_tag);

        let lb = load_balancer::declare_load_balancer(
            &mut template,
            config.load_balancer.public,
            &config.allowed_clients(),
            &net,
            config.relay.smtp_port,
        )?;
        let svc = service::declare_service(&mut template, config, &cluster, &net, &lb, &image_uri)?;
        scaling::declare_autoscaling(&mut template, &name, &config.autoscaling, &svc)?;

        template.add_output(
            "LoadBalancerDNS",
            "DNS name of the relay's network load balancer",
            get_att(LOAD_BALANCER_ID, "DNSName"),
        )?;
        template.add_output("ClusterName", "ECS cluster", ref_to(CLUSTER_ID))?;
        template.add_output("ServiceName", "Relay service", get_att(SERVICE_ID, "Name"))?;
        template.add_output("VpcId", "VPC hosting the relay", net.vpc_id.clone())?;

        template.check_references()?;
        template.deployment_order()?;

        tracing::info!(
            resources = template.resources.len(),
            image_tag = %image_tag,
            "stack synthesized"
        );
        Ok(Stack {
            name,
            assets: asset.manifest(&image_tag),
            template,
            image_tag,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
