//! 可用性探测

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// 可用性探测器
#[async_trait]
pub trait Prober: Send + Sync {
    /// 目标当前是否可用
    async fn probe(&self) -> bool;
}

/// 基于 HTTP 的探测器
///
/// 请求完成且状态码不是 5xx 即视为可用（登录页的 302/401 也说明服务活着）。
pub struct HttpProber {
    client: Client,
    url: String,
}

impl HttpProber {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status();
                debug!("可用性探测 {} -> {}", self.url, status);
                !status.is_server_error()
            }
            Err(e) => {
                debug!("可用性探测 {} 失败: {}", self.url, e);
                false
            }
        }
    }
}
