use anyhow::Result;

use crate::config::{Config, SourceConfig};

/// Static health of a source: manifests must exist on disk, HTTP sources
/// are only checked for a usable URL (no request is made).
pub fn source_health(source: &SourceConfig) -> (&'static str, bool) {
    match source {
        SourceConfig::Manifest(c) => {
            if c.path.is_file() {
                ("OK", true)
            } else {
                ("MISSING (manifest file not found)", false)
            }
        }
        SourceConfig::Html(_) | SourceConfig::Json(_) => match url::Url::parse(&source.location()) {
            Ok(_) => ("OK", true),
            Err(_) => ("INVALID URL", false),
        },
    }
}

pub fn list_sources(config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!(
        "{:<16} {:<9} {:<8} {:<36} LOCATION",
        "SOURCE", "KIND", "HEALTHY", "STATUS"
    );
    for (name, source) in &config.sources {
        let (status, healthy) = source_health(source);
        println!(
            "{:<16} {:<9} {:<8} {:<36} {}",
            name,
            source.kind(),
            healthy,
            status,
            source.location()
        );
    }
    Ok(())
}
