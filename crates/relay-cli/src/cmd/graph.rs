use super::Context;
use crate::output::{print_json, print_table};
use anyhow::Context as _;
use relay_core::StackBuilder;

/// Resources in deployment order with what each waits on.
pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let stack = StackBuilder::new(&config, &ctx.root)
        .build()
        .context("failed to synthesize stack")?;
    let order = stack.template.deployment_order()?;
    let deps = stack.template.dependencies();

    if ctx.json {
        let entries: Vec<serde_json::Value> = order
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "type": stack.template.resources[id].resource_type,
                    "depends_on": deps.get(id).cloned().unwrap_or_default(),
                })
            })
            .collect();
        return print_json(&entries);
    }

    let rows = order
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let waits_on = deps
                .get(id)
                .map(|d| d.iter().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            vec![
                (i + 1).to_string(),
                id.clone(),
                stack.template.resources[id].resource_type.clone(),
                waits_on,
            ]
        })
        .collect();
    print_table(&["#", "LOGICAL ID", "TYPE", "DEPENDS ON"], rows);
    Ok(())
}
