//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use uuid::Uuid;

/// Load the persisted instance id, generating and saving one on first start.
///
/// The file is written exactly once and never overwritten afterwards; a
/// member keeps its identity across restarts and re-registrations.
pub fn load_or_create(path: &Path) -> Result<String> {
    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("unable to read instance id file {}", path.display()))?;
        let id = raw.trim();
        if id.is_empty() {
            return Err(anyhow!(
                "instance id file {} exists but is empty; refusing to overwrite",
                path.display()
            ));
        }
        return Ok(id.to_owned());
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create directory {}", parent.display()))?;
    }
    fs::write(path, format!("{id}\n"))
        .with_context(|| format!("unable to write instance id file {}", path.display()))?;
    info!(instance_id = %id, path = %path.display(), "generated new instance id");
    Ok(id)
}
