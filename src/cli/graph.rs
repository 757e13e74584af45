use anyhow::Result;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use std::path::Path;

use super::synth;
use crate::template::graph::EdgeKind;
use crate::template::{Template, TemplateError};

/// Print the resources in deployment order along with their dependencies
pub async fn handle_graph(config_dir: Option<&Path>, context_file: &Path) -> Result<()> {
    let (_, template) = synth::build_template(config_dir, context_file).await?;
    println!("{}", dependency_table(&template)?);

    let edges = template.edges();
    let explicit = edges
        .iter()
        .filter(|edge| edge.kind == EdgeKind::Explicit)
        .count();
    println!(
        "{} resources, {} edges ({} explicit)",
        template.len(),
        edges.len(),
        explicit
    );
    Ok(())
}

pub fn dependency_table(template: &Template) -> Result<Table, TemplateError> {
    let order = template.deployment_order()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("LOGICAL ID").add_attribute(Attribute::Bold),
            Cell::new("TYPE").add_attribute(Attribute::Bold),
            Cell::new("DEPENDS ON").add_attribute(Attribute::Bold),
        ]);

    for (position, id) in order.iter().enumerate() {
        let type_name = template
            .get(id)
            .map(|resource| resource.type_name.as_str())
            .unwrap_or_default();

        // Explicit edges are the ones the template could not have inferred
        let deps: Vec<String> = template
            .dependencies(id)
            .into_iter()
            .map(|(target, kind)| match kind {
                EdgeKind::Explicit => format!("{} (DependsOn)", target),
                EdgeKind::Reference => target.to_string(),
            })
            .collect();

        table.add_row(vec![
            Cell::new(position + 1),
            Cell::new(id),
            Cell::new(type_name),
            Cell::new(deps.join("\n")),
        ]);
    }

    Ok(table)
}
