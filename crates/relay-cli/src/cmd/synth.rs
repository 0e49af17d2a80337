use super::Context;
use crate::output::{print_json, print_table};
use anyhow::Context as _;
use relay_core::config::{ConfigWarning, RelayConfig, WarnLevel};
use relay_core::{paths, StackBuilder};
use std::path::PathBuf;

pub fn run(
    ctx: &Context,
    out: Option<PathBuf>,
    skip_validation: bool,
    image_tag: Option<String>,
) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    check(&config, skip_validation)?;

    let mut builder = StackBuilder::new(&config, &ctx.root);
    if let Some(tag) = image_tag {
        builder = builder.with_image_tag(tag);
    }
    let stack = builder.build().context("failed to synthesize stack")?;

    let out_dir = match out {
        Some(dir) => paths::resolve(&ctx.root, &dir),
        None => paths::out_dir(&ctx.root),
    };
    let (template_path, assets_path) = stack
        .write(&out_dir)
        .with_context(|| format!("failed to write {}", out_dir.display()))?;

    if ctx.json {
        return print_json(&serde_json::json!({
            "stack": stack.name,
            "template": template_path,
            "assets": assets_path,
            "image_tag": stack.image_tag,
            "resources": stack.template.resources.len(),
        }));
    }

    let rows = stack
        .template
        .resources
        .iter()
        .map(|(id, r)| vec![id.clone(), r.resource_type.clone()])
        .collect();
    print_table(&["LOGICAL ID", "TYPE"], rows);
    println!();
    println!("Template: {}", template_path.display());
    println!("Assets:   {}", assets_path.display());
    println!(
        "Image:    {}:{} (push with 'ses-relay image push' before deploying)",
        config.image.repository, stack.image_tag
    );
    Ok(())
}

/// Report findings on stderr; error-level findings stop the synth unless skipped.
fn check(config: &RelayConfig, skip_validation: bool) -> anyhow::Result<()> {
    let warnings: Vec<ConfigWarning> = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("{}", w.message),
            WarnLevel::Error => tracing::error!("{}", w.message),
        }
    }
    let errors = warnings
        .iter()
        .filter(|w| w.level == WarnLevel::Error)
        .count();
    if errors > 0 {
        if skip_validation {
            tracing::warn!(errors, "validation errors ignored (--skip-validation)");
        } else {
            anyhow::bail!(
                "config validation found {errors} error(s); run 'ses-relay config validate' \
                 or pass --skip-validation"
            );
        }
    }
    Ok(())
}
