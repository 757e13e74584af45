use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::env::DockerHubCredentials;
use crate::lookup::{self, ContextCache};
use crate::settings::Settings;
use crate::stack;
use crate::template::{Format, Template};

/// Validate the inputs, resolve account and VPC, and assemble the stack
pub async fn build_template(
    config_dir: Option<&Path>,
    context_file: &Path,
) -> Result<(Settings, Template)> {
    // Credentials come first: nothing is looked up or declared without them
    let credentials = DockerHubCredentials::from_env()?;
    let settings = Settings::load(config_dir)?;

    let account = lookup::resolve_account(&settings).await?;
    let mut cache = ContextCache::load(context_file)?;
    let vpc = lookup::resolve_vpc(&settings, &account, &mut cache).await?;
    info!(
        "Deploying into {} ({} public subnets)",
        vpc.vpc_id,
        vpc.public_subnet_ids.len()
    );

    let template = stack::assemble(&credentials, &settings, &vpc)
        .context("Failed to assemble stack")?;
    Ok((settings, template))
}

/// Synthesize the template to a file, or to stdout
pub async fn handle_synth(
    config_dir: Option<&Path>,
    context_file: &Path,
    format: Format,
    output_dir: &Path,
    stdout: bool,
) -> Result<()> {
    let (settings, template) = build_template(config_dir, context_file).await?;
    let rendered = template.render(format)?;

    if stdout {
        print!("{}", rendered);
        return Ok(());
    }

    let path = write_template(output_dir, &settings.stack.name, format, &rendered)?;
    println!(
        "✓ Synthesized {} ({} resources) to {}",
        settings.stack.name,
        template.len(),
        path.display()
    );
    Ok(())
}

pub fn template_path(output_dir: &Path, stack_name: &str, format: Format) -> PathBuf {
    output_dir.join(format!("{}.template.{}", stack_name, format.extension()))
}

fn write_template(
    output_dir: &Path,
    stack_name: &str,
    format: Format,
    rendered: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).with_context(|| {
        format!("Failed to create output directory {}", output_dir.display())
    })?;

    let path = template_path(output_dir, stack_name, format);
    fs::write(&path, rendered)
        .with_context(|| format!("Failed to write template to {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_path() {
        assert_eq!(
            template_path(Path::new("cdk.out"), "NginxPullThroughStack", Format::Yaml),
            PathBuf::from("cdk.out/NginxPullThroughStack.template.yaml")
        );
    }

    #[test]
    fn test_write_template_creates_output_dir() {
        let dir = TempDir::new().unwrap();
        let output_dir = dir.path().join("nested").join("out");

        let path = write_template(&output_dir, "Stack", Format::Json, "{}\n").unwrap();

        assert_eq!(path, output_dir.join("Stack.template.json"));
        assert_eq!(fs::read_to_string(path).unwrap(), "{}\n");
    }
}
