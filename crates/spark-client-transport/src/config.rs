use std::time::Duration;

use serde::Deserialize;

/// 单次从套接字读取密文的缓冲区大小。
pub const DEFAULT_READ_BUF_SIZE: usize = 4096;

/// 超时扫描的默认周期。
pub const DEFAULT_TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// 永不过期的写入项所使用的超时取值。
pub const WITHOUT_TIMEOUT: Option<Duration> = None;

const DEFAULT_OUTBOUND_LIMIT: usize = 64 * 1024;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POOL_SLOTS: usize = 8;

/// 客户端传输配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 集中描述读缓冲、超时扫描、出站背压阈值与重连策略，使宿主可以从 TOML/JSON 等任意
///   serde 数据源加载，而不是在代码中散布常量。
///
/// ## 契约（What）
/// - 所有字段均有默认值，缺省字段按 [`TransportConfig::default`] 补齐；
/// - 时长字段以毫秒表示，通过同名访问器转换为 [`Duration`]；
/// - `outbound_limit` 是出站密文暂存区的软上限，超过后加密返回 would-block，
///   直到套接字写完成腾出空间。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub read_buf_size: usize,
    pub timeout_check_interval_ms: u64,
    pub outbound_limit: usize,
    pub connect_timeout_ms: u64,
    pub pool_slots: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_buf_size: DEFAULT_READ_BUF_SIZE,
            timeout_check_interval_ms: DEFAULT_TIMEOUT_CHECK_INTERVAL.as_millis() as u64,
            outbound_limit: DEFAULT_OUTBOUND_LIMIT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            pool_slots: DEFAULT_POOL_SLOTS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl TransportConfig {
    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// 重连策略。
///
/// - `delay_ms`：首次重连前的等待；
/// - `exp_backoff`：开启后每次失败等待时间翻倍，上限为 `delay_max_ms`；
/// - `max_retry`：`None` 表示无限重试。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay_ms: u64,
    pub delay_max_ms: u64,
    pub exp_backoff: bool,
    pub max_retry: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 2_000,
            delay_max_ms: 30_000,
            exp_backoff: true,
            max_retry: None,
        }
    }
}

impl ReconnectPolicy {
    /// 第 `attempt` 次（从 1 开始）重连前的等待时长。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.delay_ms.min(self.delay_max_ms);
        if !self.exp_backoff || attempt <= 1 {
            return Duration::from_millis(base);
        }
        let shift = (attempt - 1).min(31);
        let scaled = base.saturating_mul(1u64 << shift);
        Duration::from_millis(scaled.min(self.delay_max_ms))
    }

    /// 是否允许发起第 `attempt` 次重连。
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && self.max_retry.is_none_or(|limit| attempt <= limit)
    }
}
