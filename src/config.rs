//! Command line and configuration file.

use crate::{
    codec::compression::CompressionSettings,
    collaborators::{FallbackList, ServerInfo},
    palette::{BlockPalette, ItemPalette, Palette, PaletteRegistry},
    queue::{QueueLimits, TICK_INTERVAL},
    transfer::TransferQueueLimits,
};
use ahash::AHashMap;
use anyhow::{anyhow, bail, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

#[derive(Debug, Parser)]
#[command(version, about = "Bedrock proxy with seamless server transfers")]
pub struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "proxy.toml")]
    pub config: PathBuf,
    /// Overrides the bind address from the configuration file.
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    pub address: SocketAddr,
    /// JSON block palette, relative to the configuration file.
    pub block_palette: PathBuf,
    /// JSON item palette. Servers without one share an empty table.
    #[serde(default)]
    pub item_palette: Option<PathBuf>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 19132))
}

fn default_flush_interval() -> u64 {
    TICK_INTERVAL.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    pub servers: Vec<ServerConfig>,
    /// Where clients go after login. Defaults to the first server.
    #[serde(default)]
    pub initial_server: Option<String>,
    /// Servers tried, in order, when a backend is lost.
    #[serde(default)]
    pub fallback: Vec<String>,
    #[serde(default)]
    pub compression: CompressionSettings,
    #[serde(default)]
    pub queue: QueueLimits,
    #[serde(default)]
    pub transfer_queue: TransferQueueLimits,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

impl ProxyConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs_err::read_to_string(path)?;
        Self::parse(&text).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.servers.is_empty() {
            bail!("no servers configured");
        }
        let mut names = AHashMap::new();
        for server in &self.servers {
            if names.insert(server.name.as_str(), server).is_some() {
                bail!("server {} is configured twice", server.name);
            }
        }
        let unknown = self
            .initial_server
            .iter()
            .chain(&self.fallback)
            .find(|name| !names.contains_key(name.as_str()));
        if let Some(name) = unknown {
            bail!("unknown server {name}");
        }
        if self.flush_interval_ms == 0 {
            bail!("flush interval must be positive");
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Servers with their palettes loaded.
#[derive(Debug, Clone)]
pub struct Servers {
    servers: Vec<ServerInfo>,
    initial: ServerInfo,
    fallback: FallbackList,
}

impl Servers {
    /// Loads every server's palettes. Relative paths are resolved
    /// against `base`.
    pub fn load(config: &ProxyConfig, base: &Path) -> anyhow::Result<Self> {
        let blocks = PaletteRegistry::new();
        let items = PaletteRegistry::new();
        let empty_items: Arc<ItemPalette> = items.intern(Palette::empty());

        let mut servers = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let block_palette: BlockPalette = read_palette(&base.join(&server.block_palette))?;
            let item_palette = match &server.item_palette {
                Some(path) => items.intern(read_palette(&base.join(path))?),
                None => empty_items.clone(),
            };
            let block_palette = blocks.intern(block_palette);
            tracing::info!(
                "Server {} at {} with {} block states",
                server.name,
                server.address,
                block_palette.len()
            );
            servers.push(ServerInfo {
                name: server.name.clone(),
                address: server.address,
                block_palette,
                item_palette,
            });
        }
        tracing::debug!(
            "{} distinct block palettes, {} item palettes",
            blocks.len(),
            items.len()
        );

        let find = |name: &str| {
            servers
                .iter()
                .find(|server| server.name == name)
                .cloned()
                .ok_or_else(|| anyhow!("unknown server {name}"))
        };
        let initial = match &config.initial_server {
            Some(name) => find(name.as_str())?,
            None => servers
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("no servers configured"))?,
        };
        let fallback = FallbackList::new(
            config
                .fallback
                .iter()
                .map(|name| find(name.as_str()))
                .collect::<anyhow::Result<_>>()?,
        );

        Ok(Self {
            servers,
            initial,
            fallback,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ServerInfo> {
        self.servers.iter().find(|server| server.name == name)
    }

    pub fn all(&self) -> &[ServerInfo] {
        &self.servers
    }

    pub fn initial(&self) -> &ServerInfo {
        &self.initial
    }

    pub fn fallback(&self) -> &FallbackList {
        &self.fallback
    }
}

fn read_palette<K>(path: &Path) -> anyhow::Result<Palette<K>>
where
    K: crate::palette::PaletteKind,
    K::Id: for<'de> Deserialize<'de>,
{
    let json = fs_err::read(path)?;
    Palette::from_json(&json).with_context(|| format!("invalid palette {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compression::CompressionAlgorithm;

    const CONFIG: &str = r#"
        fallback = ["lobby"]

        [[servers]]
        name = "lobby"
        address = "127.0.0.1:19133"
        block_palette = "lobby_blocks.json"

        [[servers]]
        name = "survival"
        address = "127.0.0.1:19134"
        block_palette = "survival_blocks.json"
        item_palette = "survival_items.json"

        [compression]
        algorithm = "snappy"

        [queue]
        max_packets = 1024
    "#;

    #[test]
    fn parses_with_defaults() {
        let config = ProxyConfig::parse(CONFIG).unwrap();
        assert_eq!(config.bind, default_bind());
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.compression.algorithm, CompressionAlgorithm::Snappy);
        assert_eq!(config.compression.threshold, 256);
        assert_eq!(config.queue.max_packets, 1024);
        assert_eq!(config.queue.max_batches, 256);
        assert_eq!(config.transfer_queue, TransferQueueLimits::default());
        assert_eq!(config.flush_interval(), TICK_INTERVAL);
    }

    #[test]
    fn rejects_unknown_servers() {
        let config = CONFIG.replace(r#"fallback = ["lobby"]"#, r#"fallback = ["hub"]"#);
        assert!(ProxyConfig::parse(&config).is_err());
        assert!(ProxyConfig::parse("servers = []").is_err());
    }

    #[test]
    fn args_parse() {
        let args = Args::parse_from(["proxy", "--config", "test.toml", "--bind", "0.0.0.0:19140"]);
        assert_eq!(args.config, PathBuf::from("test.toml"));
        assert_eq!(args.bind, Some(SocketAddr::from(([0, 0, 0, 0], 19140))));
    }

    #[test]
    fn loads_and_shares_palettes() {
        let dir = std::env::temp_dir().join(format!("proxy-config-{}", std::process::id()));
        fs_err::create_dir_all(&dir).unwrap();
        let blocks = r#"[{"name": "minecraft:air", "id": 0}, {"name": "minecraft:stone", "id": 1}]"#;
        fs_err::write(dir.join("lobby_blocks.json"), blocks).unwrap();
        fs_err::write(dir.join("survival_blocks.json"), blocks).unwrap();
        fs_err::write(
            dir.join("survival_items.json"),
            r#"[{"name": "minecraft:stick", "id": 280}]"#,
        )
        .unwrap();

        let config = ProxyConfig::parse(CONFIG).unwrap();
        let servers = Servers::load(&config, &dir).unwrap();
        fs_err::remove_dir_all(&dir).unwrap();

        let lobby = servers.get("lobby").unwrap();
        let survival = servers.get("survival").unwrap();
        assert_eq!(servers.initial(), lobby);
        assert!(Arc::ptr_eq(&lobby.block_palette, &survival.block_palette));
        assert_eq!(survival.item_palette.id_of("minecraft:stick"), Some(280));
        assert!(lobby.item_palette.is_empty());
        assert_eq!(servers.all().len(), 2);
    }
}
