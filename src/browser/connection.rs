use anyhow::{Context, Result};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use reqwest::Url;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// 连接到已打开的浏览器（调试端口），复用目标站点的标签页
///
/// 已登录的标签页里带着会话 Cookie，所以优先复用 URL 与目标同源的页面；
/// 找不到再新建空白页，由适配器在打开会话时导航。
pub async fn connect_to_browser_and_page(port: u16, target_url: &str) -> Result<(Browser, Page)> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        e
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let pages = browser.pages().await.context("获取页面列表失败")?;
    debug!("获取到 {} 个页面", pages.len());

    for page in pages.iter() {
        if let Ok(Some(url)) = page.url().await {
            debug!("检查页面: {}", url);
            if same_origin(&url, target_url) {
                info!("✓ 复用已打开的目标页面: {}", url);
                return Ok((browser, page.clone()));
            }
        }
    }

    debug!("未找到目标站点的页面，创建空白页面");
    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建空白页面失败: {}", e);
        e
    })?;
    Ok((browser, page))
}

/// 两个 URL 是否同源（scheme、host、端口都相同）
///
/// `about:blank` 这类不透明源与任何页面都不同源。
fn same_origin(page_url: &str, target_url: &str) -> bool {
    let origin = |url: &str| Url::parse(url).ok().map(|u| u.origin());
    match (origin(page_url), origin(target_url)) {
        (Some(page), Some(target)) => page.is_tuple() && page == target,
        _ => false,
    }
}
