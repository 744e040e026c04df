//! Shared types used across craftgrid crates.

use serde::{Deserialize, Serialize};

/// Declared configuration for a game server instance.
///
/// Mirrors the management API's `ServerConfig` document (camelCase on
/// the wire). Missing fields fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub server_name: String,
    pub max_players: u32,
    /// Heap allocation in gigabytes.
    pub memory: u32,
    pub port: u16,
    pub difficulty: String,
    pub game_mode: String,
    pub view_distance: u32,
    pub spawn_protection: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            max_players: 20,
            memory: 2,
            port: 25565,
            difficulty: "normal".to_string(),
            game_mode: "survival".to_string(),
            view_distance: 10,
            spawn_protection: 16,
        }
    }
}

impl ServerConfig {
    /// Defaults with the display name set.
    pub fn named(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            ..Self::default()
        }
    }

    pub fn memory_mb(&self) -> u32 {
        self.memory.saturating_mul(1024)
    }

    /// Render as a `server.properties` file body.
    pub fn to_properties(&self) -> String {
        let lines = [
            format!("server-name={}", self.server_name),
            format!("max-players={}", self.max_players),
            format!("server-port={}", self.port),
            format!("difficulty={}", self.difficulty),
            format!("gamemode={}", self.game_mode),
            format!("view-distance={}", self.view_distance),
            format!("spawn-protection={}", self.spawn_protection),
            "enable-command-block=true".to_string(),
            "spawn-npcs=true".to_string(),
            "spawn-animals=true".to_string(),
            "spawn-monsters=true".to_string(),
            "generate-structures=true".to_string(),
            // Player authentication is handled by the panel.
            "online-mode=false".to_string(),
        ];

        let mut body = lines.join("\n");
        body.push('\n');
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::named("lobby");
        assert_eq!(config.server_name, "lobby");
        assert_eq!(config.max_players, 20);
        assert_eq!(config.memory_mb(), 2048);
        assert_eq!(config.port, 25565);
    }

    #[test]
    fn test_properties_render() {
        let mut config = ServerConfig::named("survival-1");
        config.max_players = 50;
        config.difficulty = "hard".to_string();

        let props = config.to_properties();
        assert!(props.contains("server-name=survival-1\n"));
        assert!(props.contains("max-players=50\n"));
        assert!(props.contains("difficulty=hard\n"));
        assert!(props.contains("server-port=25565\n"));
        assert!(props.ends_with("online-mode=false\n"));
    }

    #[test]
    fn test_deserialize_partial_camel_case() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"serverName":"creative","gameMode":"creative","memory":4}"#)
                .unwrap();
        assert_eq!(config.server_name, "creative");
        assert_eq!(config.game_mode, "creative");
        assert_eq!(config.memory, 4);
        assert_eq!(config.view_distance, 10);
    }
}
