//! 注册条目
//!
//! 一个条目代表一次注册：不透明的标签 + 结构化属性（角色、档案等）。
//! 入队后不可变。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 注册条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// 条目标签（例如人名、账号）
    pub label: String,
    /// 结构化属性
    #[serde(flatten)]
    pub attributes: ItemAttributes,
}

/// 条目属性
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAttributes {
    /// 期望的角色
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// 期望的档案
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// 其他属性
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Item {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            attributes: ItemAttributes::default(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.attributes.role = Some(role.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.attributes.profile = Some(profile.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.extra.insert(key.into(), value.into());
        self
    }

    /// 按名称读取属性，`label` 指向条目标签本身
    pub fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "label" => Some(self.label.as_str()),
            _ => self.attributes.get(key),
        }
    }

    /// 校验条目是否合法
    ///
    /// 不合法的条目属于调用方的契约违反，整个批次会被拒绝。
    pub fn validate(&self) -> Result<(), String> {
        if self.label.trim().is_empty() {
            return Err("标签不能为空".to_string());
        }
        if let Some((key, _)) = self
            .attributes
            .extra
            .iter()
            .find(|(key, _)| key.trim().is_empty())
        {
            return Err(format!("属性名不能为空: '{}'", key));
        }
        Ok(())
    }
}

/// 一个待处理的批次（对应一个 TOML 文件）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemBatch {
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(skip_serializing, skip_deserializing)]
    pub file_path: Option<String>,
}

impl ItemAttributes {
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "role" => self.role.as_deref(),
            "profile" => self.profile.as_deref(),
            _ => self.extra.get(key).map(String::as_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_lookup() {
        let item = Item::new("张三")
            .with_role("学生")
            .with_attribute("campus", "北校区");

        assert_eq!(item.attribute("label"), Some("张三"));
        assert_eq!(item.attribute("role"), Some("学生"));
        assert_eq!(item.attribute("campus"), Some("北校区"));
        assert_eq!(item.attribute("profile"), None);
    }

    #[test]
    fn test_validate_rejects_blank_label() {
        assert!(Item::new("   ").validate().is_err());
        assert!(Item::new("李四").validate().is_ok());
    }

    #[test]
    fn test_deserialize_flattened_attributes() {
        let item: Item = toml::from_str(
            r#"
            label = "王五"
            role = "教师"
            campus = "南校区"
            "#,
        )
        .unwrap();

        assert_eq!(item.attributes.role.as_deref(), Some("教师"));
        assert_eq!(item.attribute("campus"), Some("南校区"));
    }
}
