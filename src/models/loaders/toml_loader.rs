use crate::models::{FormPlan, ItemBatch};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载一个批次
pub async fn load_toml_to_item_batch(toml_file_path: &Path) -> Result<ItemBatch> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut batch: ItemBatch = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    // 设置文件路径
    batch.file_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(batch)
}

/// 从文件夹中加载所有批次文件，按文件名排序
pub async fn load_all_batches(folder_path: &str) -> Result<Vec<ItemBatch>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut toml_files = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml_files.push(path);
        }
    }
    toml_files.sort();

    let mut batches = Vec::new();
    for path in toml_files {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_toml_to_item_batch(&path).await {
            Ok(batch) => {
                tracing::info!("成功加载 {} 个条目", batch.items.len());
                batches.push(batch);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(batches)
}

/// 加载表单计划
pub async fn load_form_plan(plan_path: &Path) -> Result<FormPlan> {
    let content = fs::read_to_string(plan_path)
        .await
        .with_context(|| format!("无法读取表单计划: {}", plan_path.display()))?;

    let plan: FormPlan = toml::from_str(&content)
        .with_context(|| format!("无法解析表单计划: {}", plan_path.display()))?;

    plan.validate()
        .map_err(|reason| anyhow::anyhow!("表单计划不合法 ({}): {}", plan_path.display(), reason))?;

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_all_batches_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("01_spring.toml"),
            r#"
            name = "春季注册"

            [[items]]
            label = "张三"
            role = "学生"

            [[items]]
            label = "李四"
            role = "教师"
            "#,
        )
        .unwrap();
        std::fs::write(dir.path().join("02_broken.toml"), "name = ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let batches = load_all_batches(dir.path().to_str().unwrap()).await.unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].name, "春季注册");
        assert_eq!(batches[0].items.len(), 2);
        assert!(batches[0].file_path.is_some());
    }

    #[tokio::test]
    async fn test_missing_folder_is_an_error() {
        assert!(load_all_batches("/definitely/not/here").await.is_err());
    }
}
