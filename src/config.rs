use std::path::Path;

use serde::Deserialize;

use crate::error::{IndexError, IndexResult};

/// 顶层配置（TOML），所有字段都有默认值。
///
/// ```toml
/// [collocation]
/// unicast_multiplier = 50
/// broadcast_multiplier = 200
///
/// [rebuild]
/// chunk_size = 4096
/// expired_threshold = 10000
///
/// [log]
/// filter = "grid_index=debug"
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GridIndexConfig {
    pub collocation: CollocationConfig,
    pub rebuild: RebuildConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CollocationConfig {
    /// 按主键 join：每行一次点对点请求
    pub unicast_multiplier: u32,
    /// 无亲和关系：需要广播
    pub broadcast_multiplier: u32,
}

impl Default for CollocationConfig {
    fn default() -> Self {
        Self {
            unicast_multiplier: 50,
            broadcast_multiplier: 200,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// 每块行数；块之间检查取消标记
    pub chunk_size: usize,
    /// 当前已过期但仍占位的行数达到该值时 `need_rebuild()` 为 true
    pub expired_threshold: usize,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            expired_threshold: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl GridIndexConfig {
    pub fn from_toml(s: &str) -> IndexResult<Self> {
        let cfg: Self = toml::from_str(s).map_err(|e| IndexError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 读配置文件；文件不存在时回退默认值
    pub fn load(path: &Path) -> IndexResult<Self> {
        if !path.exists() {
            tracing::info!("Config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)
            .map_err(|e| IndexError::Config(format!("read {:?}: {}", path, e)))?;
        Self::from_toml(&s)
    }

    fn validate(&self) -> IndexResult<()> {
        let c = &self.collocation;
        if c.unicast_multiplier < 1 || c.broadcast_multiplier < 1 {
            return Err(IndexError::Config(
                "collocation multipliers must be >= 1".to_string(),
            ));
        }
        if self.rebuild.chunk_size == 0 {
            return Err(IndexError::Config("rebuild.chunk_size must be > 0".to_string()));
        }
        Ok(())
    }
}
