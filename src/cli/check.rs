use anyhow::Result;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use std::path::Path;

use crate::env::DockerHubCredentials;
use crate::settings::{Settings, VpcLookupSettings};

/// Check credentials and settings, reporting every problem before exiting
pub fn handle_check_config(config_dir: Option<&Path>) -> Result<()> {
    println!("Checking stack configuration...");
    let mut failed = false;

    match DockerHubCredentials::from_env() {
        Ok(credentials) => println!("✓ Docker Hub credentials for '{}'", credentials.username),
        Err(e) => {
            eprintln!("✗ {}", e);
            for key in e.missing_keys() {
                eprintln!("  export {}=...", key);
            }
            failed = true;
        }
    }

    match Settings::load(config_dir) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!("{}", settings_table(&settings));
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn describe_lookup(lookup: &VpcLookupSettings) -> String {
    match lookup {
        VpcLookupSettings::DefaultVpc => "default VPC".to_string(),
        VpcLookupSettings::VpcId { vpc_id } => format!("VPC {}", vpc_id),
        VpcLookupSettings::Static {
            vpc_id, subnet_ids, ..
        } => format!("{} with subnets {}", vpc_id, subnet_ids.join(", ")),
    }
}

pub fn settings_table(settings: &Settings) -> Table {
    let account = if settings.stack.account.is_empty() {
        "(from caller credentials)".to_string()
    } else {
        settings.stack.account.clone()
    };

    let rows = [
        ("Stack", settings.stack.name.clone()),
        ("Account", account),
        ("Region", settings.stack.region.clone()),
        (
            "Upstream",
            format!(
                "{} ({})",
                settings.registry.upstream_registry, settings.registry.upstream_registry_url
            ),
        ),
        (
            "Image",
            format!("{}:{}", settings.registry.repository_name(), settings.registry.tag),
        ),
        ("Secret", settings.registry.secret_name.clone()),
        (
            "Task size",
            format!(
                "{} CPU units / {} MiB",
                settings.service.cpu, settings.service.memory_mib
            ),
        ),
        (
            "Ports",
            format!(
                "listener {} -> container {}",
                settings.service.listener_port, settings.service.container_port
            ),
        ),
        ("Network", describe_lookup(&settings.network.lookup)),
    ];

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("SETTING").add_attribute(Attribute::Bold),
            Cell::new("VALUE").add_attribute(Attribute::Bold),
        ]);

    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    table
}
