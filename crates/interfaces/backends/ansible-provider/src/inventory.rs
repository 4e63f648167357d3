//! Inventory staging
//!
//! The runner is handed its host list as a file; we render the
//! configured hosts into INI inventory format and stage it in a
//! scratch directory that lives for the duration of one run.

use std::path::{Path, PathBuf};

use gantry_core::{AdapterError, Result};

/// One target host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryHost {
    /// Inventory name of the host
    pub name: String,
    /// Address the runner should connect to
    pub address: String,
}

/// A host list renderable as an INI inventory
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: Vec<InventoryHost>,
}

impl Inventory {
    /// Empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host
    pub fn with_host(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.hosts.push(InventoryHost {
            name: name.into(),
            address: address.into(),
        });
        self
    }

    /// Whether the inventory has no hosts
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Number of hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Render as INI inventory text
    pub fn render(&self) -> String {
        let mut out = String::from("[targets]\n");
        for host in &self.hosts {
            out.push_str(&format!("{} ansible_host={}\n", host.name, host.address));
        }
        out
    }

    /// Write the rendered inventory into `dir` and return its path
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("hosts.ini");
        tokio::fs::write(&path, self.render())
            .await
            .map_err(|e| AdapterError::transient(format!("failed to stage inventory: {e}")))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_ini_format() {
        let inv = Inventory::new()
            .with_host("web1", "10.0.0.5")
            .with_host("db1", "10.0.0.6");

        let text = inv.render();
        assert_eq!(text, "[targets]\nweb1 ansible_host=10.0.0.5\ndb1 ansible_host=10.0.0.6\n");
    }

    #[tokio::test]
    async fn test_write_stages_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let inv = Inventory::new().with_host("web1", "10.0.0.5");

        let path = inv.write_to(dir.path()).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("web1 ansible_host=10.0.0.5"));
    }
}
