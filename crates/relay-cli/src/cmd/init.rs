use super::Context;
use anyhow::Context as _;
use relay_core::{config::RelayConfig, paths};

pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let root = &ctx.root;
    println!("Initializing SES relay in: {}", root.display());

    let config = RelayConfig::default();
    let created = config
        .write_if_missing(root)
        .with_context(|| format!("failed to write {}", paths::CONFIG_FILE))?;
    if created {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    let build_context = paths::resolve(root, &config.image.directory);
    if !build_context.is_dir() {
        println!(
            "\nNext: put the relay's Dockerfile in {} and set secret.arn in {}.",
            build_context.display(),
            paths::CONFIG_FILE
        );
    }
    Ok(())
}
