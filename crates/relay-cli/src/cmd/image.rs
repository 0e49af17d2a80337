use super::Context;
use crate::output::print_json;
use anyhow::Context as _;
use clap::Subcommand;
use relay_core::image::{detect_runtime, login_args, ContainerAsset, ContainerRuntime};
use relay_core::registry::{self, EcrRegistry};
use relay_core::RelayError;

#[derive(Subcommand)]
pub enum ImageSubcommand {
    /// Build the relay image locally, tagged with its content hash
    Build {
        /// Print the build command instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Build the image and push it to ECR under its content hash
    Push {
        /// Region to push to; deploy the stack in the same region
        #[arg(long, env = "AWS_REGION")]
        region: Option<String>,

        /// Account id (default: the caller's, via `aws sts get-caller-identity`)
        #[arg(long)]
        account: Option<String>,

        /// Create the ECR repository when it does not exist yet
        #[arg(long)]
        create_repository: bool,

        /// Push an image already built by `image build`
        #[arg(long)]
        no_build: bool,

        /// Print the commands instead of running them
        #[arg(long)]
        dry_run: bool,
    },
}

pub fn run(ctx: &Context, subcmd: ImageSubcommand) -> anyhow::Result<()> {
    match subcmd {
        ImageSubcommand::Build { dry_run } => build(ctx, dry_run),
        ImageSubcommand::Push {
            region,
            account,
            create_repository,
            no_build,
            dry_run,
        } => push(ctx, region, account, create_repository, no_build, dry_run),
    }
}

fn asset_and_hash(ctx: &Context) -> anyhow::Result<(ContainerAsset, String)> {
    let config = ctx.load_config()?;
    let asset = ContainerAsset::from_config(&config, &ctx.root);
    let hash = asset
        .asset_hash()
        .context("failed to hash the container build context")?;
    Ok((asset, hash))
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

fn build(ctx: &Context, dry_run: bool) -> anyhow::Result<()> {
    let (asset, hash) = asset_and_hash(ctx)?;

    if dry_run {
        // Show docker syntax when no runtime is installed; podman takes the same args.
        let runtime = detect_runtime().unwrap_or(ContainerRuntime::Docker);
        let args = asset.build_args_for(&hash);
        if ctx.json {
            return print_json(&serde_json::json!({
                "runtime": runtime.name(),
                "args": args,
                "tag": asset.local_tag(&hash),
            }));
        }
        println!("{} {}", runtime.name(), args.join(" "));
        return Ok(());
    }

    let runtime = detect_runtime().ok_or(RelayError::NoContainerRuntime)?;
    asset.build(runtime, &hash)?;
    if ctx.json {
        print_json(&serde_json::json!({ "tag": asset.local_tag(&hash) }))?;
    } else {
        println!("Built {}", asset.local_tag(&hash));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// push
// ---------------------------------------------------------------------------

fn push(
    ctx: &Context,
    region: Option<String>,
    account: Option<String>,
    create_repository: bool,
    no_build: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let (asset, hash) = asset_and_hash(ctx)?;
    let region = region
        .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
        .filter(|r| !r.trim().is_empty())
        .context("no region: pass --region or set AWS_REGION")?;
    let account = match account {
        Some(account) => account,
        None => registry::caller_account().context("failed to look up the AWS account id")?,
    };
    let ecr = EcrRegistry::new(account, region);

    if dry_run {
        let runtime = detect_runtime().unwrap_or(ContainerRuntime::Docker).name();
        let mut commands = Vec::new();
        if create_repository {
            commands.push(format!(
                "aws {}",
                registry::describe_repository_args(&ecr.region, &asset.repository).join(" ")
            ));
            commands.push(format!(
                "aws {}",
                registry::create_repository_args(&ecr.region, &asset.repository).join(" ")
            ));
        }
        if !no_build {
            commands.push(format!("{runtime} {}", asset.build_args_for(&hash).join(" ")));
        }
        commands.push(format!(
            "aws {} | {runtime} {}",
            registry::login_password_args(&ecr.region).join(" "),
            login_args(&ecr).join(" ")
        ));
        commands.push(format!("{runtime} {}", asset.tag_args(&ecr, &hash).join(" ")));
        commands.push(format!("{runtime} {}", asset.push_args(&ecr, &hash).join(" ")));
        if ctx.json {
            return print_json(&serde_json::json!({
                "image": asset.remote_tag(&ecr, &hash),
                "commands": commands,
            }));
        }
        for command in commands {
            println!("{command}");
        }
        return Ok(());
    }

    let runtime = detect_runtime().ok_or(RelayError::NoContainerRuntime)?;
    if create_repository
        && registry::ensure_repository(&ecr.region, &asset.repository)
            .context("failed to create the ECR repository")?
    {
        println!("Created ECR repository {} in {}", asset.repository, ecr.region);
    }
    if !no_build {
        asset.build(runtime, &hash)?;
    }
    let image = asset.push(runtime, &ecr, &hash)?;

    if ctx.json {
        print_json(&serde_json::json!({ "image": image, "tag": hash }))?;
    } else {
        println!("Pushed {image}");
        println!("Deploy the synthesized template in {}.", ecr.region);
    }
    Ok(())
}
