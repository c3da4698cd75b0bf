//! 程序配置
//!
//! 加载顺序：默认值 → TOML 配置文件（可选）→ 环境变量覆盖。
//! 引擎的数值参数（重试预算、退避常数、TTL）都只是配置，不是需要精确复刻的行为。

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "BATCH_REGISTER_CONFIG";
/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "batch_register.toml";

/// 程序配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 是否启动无头浏览器（否则连接已打开的浏览器）
    pub headless: bool,
    /// 无头模式下使用的浏览器可执行文件
    pub chrome_executable: Option<String>,
    /// 目标URL
    pub target_url: String,
    /// 登录页 URL 片段，页面落到这里说明会话已失效
    pub login_url_fragment: Option<String>,
    /// 提示横幅的选择器
    pub banner_selectors: Vec<String>,
    /// 批次 TOML 文件存放目录
    pub items_folder: String,
    /// 表单计划文件
    pub form_plan_file: String,
    /// 策略缓存与退避状态的快照文件
    pub snapshot_file: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 引擎参数
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_debug_port: 9222,
            headless: false,
            chrome_executable: None,
            target_url: "http://localhost:8080/#/register".to_string(),
            login_url_fragment: Some("login".to_string()),
            banner_selectors: vec![
                ".el-message".to_string(),
                ".el-notification".to_string(),
                ".alert".to_string(),
                "[role=alert]".to_string(),
            ],
            items_folder: "batches".to_string(),
            form_plan_file: "form_plan.toml".to_string(),
            snapshot_file: "engine_snapshot.json".to_string(),
            output_log_file: "output.txt".to_string(),
            verbose_logging: false,
            engine: EngineConfig::default(),
        }
    }
}

/// 引擎参数
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub backoff: BackoffConfig,
    pub arbiter: ArbiterConfig,
    pub cache: CacheConfig,
    pub session: SessionPolicy,
}

/// 重试参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 瞬时错误的尝试次数上限（含第一次）
    pub retry_budget: u32,
    /// 未知错误的尝试次数上限（含第一次）
    pub unknown_retry_budget: u32,
    /// 单次适配器调用超时
    pub attempt_timeout_ms: u64,
    /// 单个条目累计超时（跨所有重试）
    pub item_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            unknown_retry_budget: 2,
            attempt_timeout_ms: 30_000,
            item_timeout_ms: 180_000,
        }
    }
}

impl RetryConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }
}

/// 退避与可用性探测参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// 休眠时附加的随机抖动上限（相对当前退避的比例）
    pub jitter_ratio: f64,
    /// 两次真实探测的最小间隔
    pub probe_interval_ms: u64,
    /// 单次探测超时
    pub probe_timeout_ms: u64,
    /// 等待目标恢复的最长时间
    pub max_wait_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 10_000,
            multiplier: 1.3,
            max_delay_ms: 120_000,
            jitter_ratio: 0.1,
            probe_interval_ms: 20_000,
            probe_timeout_ms: 10_000,
            max_wait_ms: 600_000,
        }
    }
}

impl BackoffConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// 并发仲裁参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// 同时进行的高风险操作上限（目标系统不支持并发会话，默认 1）
    pub max_concurrent_operations: usize,
    /// 槽位硬时限
    pub slot_timeout_ms: u64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 1,
            slot_timeout_ms: 300_000,
        }
    }
}

impl ArbiterConfig {
    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_timeout_ms)
    }
}

/// 策略缓存参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    /// 闲置多久后策略过期
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 200,
            ttl_ms: 600_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// 会话策略
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// 条目之间的稳定等待
    pub settle_ms: u64,
    /// 会话意外关闭时的重新打开次数
    pub max_reopen_attempts: u32,
    /// 批次结束后是否关闭会话
    pub close_on_finish: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            max_reopen_attempts: 1,
            close_on_finish: true,
        }
    }
}

impl SessionPolicy {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Config {
    /// 完整加载：配置文件（若存在）+ 环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let base = if Path::new(&path).exists() {
            Self::from_toml_file(&path)?
        } else {
            Self::default()
        };
        let config = base.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// 只读取环境变量（其余使用默认值）
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 用环境变量覆盖当前配置
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse("BROWSER_DEBUG_PORT", "u16")? {
            self.browser_debug_port = v;
        }
        if let Some(v) = env_parse("HEADLESS", "bool")? {
            self.headless = v;
        }
        if let Ok(v) = std::env::var("CHROME_EXECUTABLE") {
            self.chrome_executable = Some(v);
        }
        if let Ok(v) = std::env::var("TARGET_URL") {
            self.target_url = v;
        }
        if let Ok(v) = std::env::var("ITEMS_FOLDER") {
            self.items_folder = v;
        }
        if let Ok(v) = std::env::var("FORM_PLAN_FILE") {
            self.form_plan_file = v;
        }
        if let Ok(v) = std::env::var("SNAPSHOT_FILE") {
            self.snapshot_file = v;
        }
        if let Ok(v) = std::env::var("OUTPUT_LOG_FILE") {
            self.output_log_file = v;
        }
        if let Some(v) = env_parse("VERBOSE_LOGGING", "bool")? {
            self.verbose_logging = v;
        }
        if let Some(v) = env_parse("RETRY_BUDGET", "u32")? {
            self.engine.retry.retry_budget = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_OPERATIONS", "usize")? {
            self.engine.arbiter.max_concurrent_operations = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.retry.retry_budget == 0 {
            return Err(ConfigError::Invalid("retry_budget 至少为 1".to_string()));
        }
        if engine.retry.unknown_retry_budget == 0 {
            return Err(ConfigError::Invalid(
                "unknown_retry_budget 至少为 1".to_string(),
            ));
        }
        if engine.arbiter.max_concurrent_operations == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_operations 至少为 1".to_string(),
            ));
        }
        if !engine.backoff.multiplier.is_finite() || engine.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "退避倍数必须是不小于 1 的有限数: {}",
                engine.backoff.multiplier
            )));
        }
        // NaN 不在任何区间内
        if !(0.0..=1.0).contains(&engine.backoff.jitter_ratio) {
            return Err(ConfigError::Invalid(format!(
                "抖动比例必须在 [0, 1] 之间: {}",
                engine.backoff.jitter_ratio
            )));
        }
        if engine.backoff.base_delay_ms > engine.backoff.max_delay_ms {
            return Err(ConfigError::Invalid(
                "base_delay_ms 不能大于 max_delay_ms".to_string(),
            ));
        }
        if engine.cache.capacity == 0 {
            return Err(ConfigError::Invalid("缓存容量至少为 1".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(var_name: &str, expected_type: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
