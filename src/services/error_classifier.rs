//! 错误分类服务 - 业务能力层
//!
//! 把适配器报告的失败信号映射到封闭分类：重复 / 瞬时 / 致命 / 未知。
//!
//! ## 规则表
//!
//! 分类由一张有序规则表驱动，第一条命中的规则生效：
//!
//! 1. 文本命中"已存在/重复" → `Duplicate`
//! 2. 目标不可达（连接重置、网关超时、会话失效） → `Transient`
//! 3. 契约违反（策略用尽、无匹配选项、缺少属性） → `Fatal`
//! 4. 其他 → `Unknown`
//!
//! 分类是纯函数：同样的输入永远得到同样的结果。

use regex::Regex;

use crate::error::FaultKind;
use crate::models::{ErrorCategory, ErrorClassification, FailureSignal};

/// 规则匹配条件
#[derive(Debug, Clone)]
pub enum Matcher {
    /// 横幅 / 错误文本 / 异常文本命中正则
    Text(Regex),
    /// 适配器异常种类
    Fault(FaultKind),
    /// 响应状态码落在闭区间内
    Status { min: u16, max: u16 },
    /// 存在契约违反
    ContractViolation,
}

impl Matcher {
    fn matches(&self, signal: &FailureSignal) -> bool {
        match self {
            Matcher::Text(re) => signal.texts().iter().any(|text| re.is_match(text)),
            Matcher::Fault(kind) => signal.fault.as_ref().is_some_and(|f| f.kind() == *kind),
            Matcher::Status { min, max } => signal
                .response_status
                .is_some_and(|status| (*min..=*max).contains(&status)),
            Matcher::ContractViolation => signal.violation.is_some(),
        }
    }
}

/// 分类规则
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub matcher: Matcher,
    pub category: ErrorCategory,
}

impl ClassificationRule {
    /// 文本规则（大小写不敏感）
    pub fn text(pattern: &str, category: ErrorCategory) -> Result<Self, regex::Error> {
        Ok(Self {
            matcher: Matcher::Text(Regex::new(&format!("(?i){}", pattern))?),
            category,
        })
    }

    pub fn fault(kind: FaultKind, category: ErrorCategory) -> Self {
        Self {
            matcher: Matcher::Fault(kind),
            category,
        }
    }

    pub fn status(min: u16, max: u16, category: ErrorCategory) -> Self {
        Self {
            matcher: Matcher::Status { min, max },
            category,
        }
    }
}

/// 提交结果的解读
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    Failed(ErrorClassification),
}

/// 错误分类器
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl ErrorClassifier {
    /// 使用默认规则表创建
    pub fn new() -> Self {
        // 顺序即优先级
        let text_rules = [
            // 重复
            (r"already\s+exists?", ErrorCategory::Duplicate),
            (r"already\s+(registered|enrolled|assigned)", ErrorCategory::Duplicate),
            (r"duplicate", ErrorCategory::Duplicate),
            (r"已存在", ErrorCategory::Duplicate),
            (r"重复", ErrorCategory::Duplicate),
            (r"已注册", ErrorCategory::Duplicate),
            // 目标不可达
            (r"connection\s+(reset|refused|closed|aborted)", ErrorCategory::Transient),
            (r"gateway\s+time-?out", ErrorCategory::Transient),
            (r"bad\s+gateway", ErrorCategory::Transient),
            (r"service\s+unavailable", ErrorCategory::Transient),
            (r"net::ERR_", ErrorCategory::Transient),
            (r"network\s+error", ErrorCategory::Transient),
            (r"timed?\s*out", ErrorCategory::Transient),
            (r"session\s+(expired|invalid|closed)", ErrorCategory::Transient),
            (r"(execution\s+)?context\s+(was\s+)?(destroyed|invalidated)", ErrorCategory::Transient),
            (r"target\s+closed", ErrorCategory::Transient),
            (r"请求频繁", ErrorCategory::Transient),
            (r"网络(异常|错误)", ErrorCategory::Transient),
            (r"登录(已)?(过期|失效)", ErrorCategory::Transient),
        ];

        let mut rules: Vec<ClassificationRule> = text_rules
            .iter()
            .take_while(|(_, category)| *category == ErrorCategory::Duplicate)
            .filter_map(|(pattern, category)| ClassificationRule::text(pattern, *category).ok())
            .collect();

        rules.extend([
            ClassificationRule::status(409, 409, ErrorCategory::Duplicate),
            ClassificationRule::fault(FaultKind::Timeout, ErrorCategory::Transient),
            ClassificationRule::fault(FaultKind::Disconnected, ErrorCategory::Transient),
            ClassificationRule::fault(FaultKind::SessionInvalidated, ErrorCategory::Transient),
            ClassificationRule::status(429, 429, ErrorCategory::Transient),
            ClassificationRule::status(502, 504, ErrorCategory::Transient),
        ]);

        rules.extend(
            text_rules
                .iter()
                .skip_while(|(_, category)| *category == ErrorCategory::Duplicate)
                .filter_map(|(pattern, category)| {
                    ClassificationRule::text(pattern, *category).ok()
                }),
        );

        rules.push(ClassificationRule {
            matcher: Matcher::ContractViolation,
            category: ErrorCategory::Fatal,
        });

        Self { rules }
    }

    /// 使用自定义规则表创建
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// 在默认规则表前面插入额外规则
    pub fn prepend_rules(mut self, rules: Vec<ClassificationRule>) -> Self {
        let mut merged = rules;
        merged.append(&mut self.rules);
        self.rules = merged;
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// 分类失败信号
    pub fn classify(&self, signal: &FailureSignal) -> ErrorClassification {
        let category = self
            .rules
            .iter()
            .find(|rule| rule.matcher.matches(signal))
            .map(|rule| rule.category)
            .unwrap_or(ErrorCategory::Unknown);

        ErrorClassification::new(category, signal.describe())
    }

    /// 解读提交后的信号
    ///
    /// 重复模式优先于成功判断：有些系统用普通提示告诉你"已存在"。
    pub fn interpret(&self, signal: &FailureSignal) -> Verdict {
        let classification = self.classify(signal);
        if classification.category == ErrorCategory::Duplicate {
            return Verdict::Failed(classification);
        }
        if !signal.indicates_failure() {
            return Verdict::Succeeded;
        }
        Verdict::Failed(classification)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
