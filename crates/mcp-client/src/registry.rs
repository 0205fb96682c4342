//! Server registry: named spawn descriptors, read-only after load.

use std::collections::HashMap;

use aria_domain::config::{McpConfig, McpServerConfig};

pub struct ServerRegistry {
    servers: HashMap<String, McpServerConfig>,
    enabled: Vec<String>,
}

impl ServerRegistry {
    pub fn from_config(config: &McpConfig) -> Self {
        let servers = config
            .servers
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect::<HashMap<_, _>>();

        // Enabled names that point at no descriptor are dropped up front.
        let enabled = config
            .enabled_servers
            .iter()
            .filter(|name| {
                let known = servers.contains_key(*name);
                if !known {
                    tracing::warn!(server = %name, "enabled MCP server has no descriptor, ignoring");
                }
                known
            })
            .cloned()
            .collect();

        Self { servers, enabled }
    }

    pub fn get(&self, name: &str) -> Option<&McpServerConfig> {
        self.servers.get(name)
    }

    /// Names of servers the agent may use, in config order.
    pub fn enabled(&self) -> &[String] {
        &self.enabled
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(names: &[&str], enabled: &[&str]) -> McpConfig {
        McpConfig {
            enabled_servers: enabled.iter().map(|s| s.to_string()).collect(),
            servers: names
                .iter()
                .map(|name| McpServerConfig {
                    name: name.to_string(),
                    command: "true".into(),
                    args: Vec::new(),
                    env: HashMap::new(),
                    timeout_secs: 30,
                })
                .collect(),
        }
    }

    #[test]
    fn lookup_by_name() {
        let registry = ServerRegistry::from_config(&config_with(&["time", "weather"], &["time"]));
        assert!(registry.get("time").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.enabled(), &["time".to_string()]);
    }

    #[test]
    fn unknown_enabled_names_are_dropped() {
        let registry = ServerRegistry::from_config(&config_with(&["time"], &["time", "ghost"]));
        assert_eq!(registry.enabled(), &["time".to_string()]);
    }
}
