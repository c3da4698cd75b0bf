//! 会话保持
//!
//! 一个批次独占一个会话。条目之间检查会话是否还在，意外关闭时按策略重新打开。

use tracing::{debug, error, info, warn};

use crate::config::SessionPolicy;
use crate::error::AdapterError;
use crate::infrastructure::{SessionHandle, TargetAdapter};

pub struct SessionKeeper<'a> {
    adapter: &'a dyn TargetAdapter,
    policy: &'a SessionPolicy,
    session: Option<SessionHandle>,
}

impl<'a> SessionKeeper<'a> {
    pub fn new(adapter: &'a dyn TargetAdapter, policy: &'a SessionPolicy) -> Self {
        Self {
            adapter,
            policy,
            session: None,
        }
    }

    pub fn current(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub async fn open(&mut self) -> Result<SessionHandle, AdapterError> {
        let session = self.adapter.open_session().await?;
        info!("🔗 {} 已打开", session);
        self.session = Some(session.clone());
        Ok(session)
    }

    /// 确认会话可用，必要时重新打开（最多 `max_reopen_attempts` 次）
    pub async fn ensure_open(&mut self) -> Result<SessionHandle, AdapterError> {
        if let Some(session) = &self.session {
            if self.adapter.is_session_open(session).await {
                return Ok(session.clone());
            }
            warn!("⚠️ {} 意外关闭，尝试重新打开", session);
            self.adapter.close_session(session).await;
            self.session = None;
        }

        let mut last_error = AdapterError::SessionOpen("会话未打开".to_string());
        for attempt in 1..=self.policy.max_reopen_attempts {
            match self.open().await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    debug!("第 {} 次重新打开会话失败: {}", attempt, e);
                    last_error = e;
                }
            }
        }

        error!("❌ 会话无法恢复: {}", last_error);
        Err(last_error)
    }

    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            self.adapter.close_session(&session).await;
            info!("🔌 {} 已关闭", session);
        }
    }
}
