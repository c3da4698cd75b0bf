//! 浏览器连接
//!
//! 两种方式拿到页面：连接已打开的浏览器（调试端口），或启动无头浏览器。

pub mod connection;
pub mod headless;

pub use connection::connect_to_browser_and_page;
pub use headless::launch_headless_browser;

use anyhow::Result;
use chromiumoxide::{Browser, Page};

use crate::config::Config;

/// 按配置打开浏览器
pub async fn open_browser(config: &Config) -> Result<(Browser, Page)> {
    if config.headless {
        launch_headless_browser(config.chrome_executable.as_deref()).await
    } else {
        connect_to_browser_and_page(config.browser_debug_port, &config.target_url).await
    }
}
