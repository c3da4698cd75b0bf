//! 目标适配器接口 - 基础设施层
//!
//! 编排层只通过这组能力与目标系统交互：开/关会话、定位控件、操作控件、读取提交后的信号。
//! 适配器只报告发生了什么，不做任何重试或分类决定。

use std::fmt;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::models::{StrategySpec, TargetSignal};

/// 会话句柄（不透明）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: u64,
}

impl SessionHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "会话#{}", self.id)
    }
}

/// 控件句柄（不透明）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControlHandle {
    token: String,
}

impl ControlHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// 对控件的操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click,
    Fill(String),
    Select(String),
    /// 列出控件当前提供的选项
    ListOptions,
}

/// 操作结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Done,
    Options(Vec<String>),
}

/// 目标适配器
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// 打开会话，失败返回 [`AdapterError::SessionOpen`]
    async fn open_session(&self) -> Result<SessionHandle, AdapterError>;

    async fn is_session_open(&self, session: &SessionHandle) -> bool;

    /// 按策略定位控件，找不到返回 [`AdapterError::NotFound`]
    async fn locate(
        &self,
        session: &SessionHandle,
        spec: &StrategySpec,
    ) -> Result<ControlHandle, AdapterError>;

    async fn act(
        &self,
        session: &SessionHandle,
        control: &ControlHandle,
        action: &Action,
    ) -> Result<ActionResult, AdapterError>;

    /// 读取提交后的信号（横幅、最后错误、响应状态）
    async fn observe_signal(&self, session: &SessionHandle) -> Result<TargetSignal, AdapterError>;

    async fn close_session(&self, session: &SessionHandle);
}
