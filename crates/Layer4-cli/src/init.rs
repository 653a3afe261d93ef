//! taskgate init command
//!
//! Writes the default configuration into `./.taskgate/config.json`.

use std::path::Path;
use taskgate_foundation::{JsonStore, TaskgateConfig, CONFIG_FILE};

/// Initialize taskgate configuration in `root`
pub fn init_project(root: &Path, force: bool) -> anyhow::Result<()> {
    let store = JsonStore::project(root);

    if store.exists(CONFIG_FILE) && !force {
        println!("✓ taskgate already initialized in this directory.");
        println!("  Use --force to overwrite {}", store.file_path(CONFIG_FILE).display());
        return Ok(());
    }

    let path = TaskgateConfig::default().save_project(root)?;
    println!("✓ Created {}", path.display());
    println!("  Edit gateway.allowedCommands to choose which programs may run.");
    Ok(())
}
