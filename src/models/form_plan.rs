//! 表单计划
//!
//! 描述一次注册需要依次操作哪些控件、每个控件有哪些候选定位策略、
//! 以及最后用哪个控件提交。候选策略按"快且具体 → 慢且通用"排列。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::StrategySpec;

/// 控件上的动作
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// 点击
    #[default]
    Click,
    /// 用条目属性填写
    Fill { attribute: String },
    /// 从目标当前提供的选项中选择（交给名称解析器决定）
    Select { attribute: String },
}

impl StepAction {
    /// 该动作依赖的条目属性
    pub fn attribute(&self) -> Option<&str> {
        match self {
            StepAction::Click => None,
            StepAction::Fill { attribute } | StepAction::Select { attribute } => Some(attribute),
        }
    }
}

/// 单个控件步骤
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlStep {
    /// 逻辑控件 ID（策略缓存的键）
    pub control_id: String,
    /// 候选定位策略
    pub strategies: Vec<StrategySpec>,
    #[serde(default)]
    pub action: StepAction,
}

impl ControlStep {
    pub fn new(control_id: impl Into<String>, strategies: Vec<StrategySpec>, action: StepAction) -> Self {
        Self {
            control_id: control_id.into(),
            strategies,
            action,
        }
    }
}

/// 表单计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormPlan {
    #[serde(default)]
    pub steps: Vec<ControlStep>,
    /// 提交控件
    pub submit: ControlStep,
}

impl FormPlan {
    pub fn new(steps: Vec<ControlStep>, submit: ControlStep) -> Self {
        Self { steps, submit }
    }

    /// 校验计划本身是否自洽
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for step in self.steps.iter().chain(std::iter::once(&self.submit)) {
            if step.control_id.trim().is_empty() {
                return Err("控件 ID 不能为空".to_string());
            }
            if !seen.insert(step.control_id.as_str()) {
                return Err(format!("控件 ID 重复: {}", step.control_id));
            }
            if step.strategies.is_empty() {
                return Err(format!("控件 {} 没有任何定位策略", step.control_id));
            }
        }
        if self.submit.action != StepAction::Click {
            return Err("提交控件只能执行点击动作".to_string());
        }
        Ok(())
    }
}
