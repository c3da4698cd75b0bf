//! 基于 chromiumoxide 的目标适配器 - 基础设施层
//!
//! 所有页面操作都是一段 JS：
//!
//! - 定位：按策略找到元素，打上 `data-reg-handle` 标记，标记值就是控件句柄
//! - 操作：按标记取回元素，点击 / 填写（原生 setter + input/change 事件）/ 选择 / 列出选项
//! - 信号：读取提示横幅，以及打开会话时安装的请求钩子记录的最后状态码和错误

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AdapterError;
use crate::infrastructure::{
    Action, ActionResult, ControlHandle, JsExecutor, SessionHandle, TargetAdapter,
};
use crate::models::{LocatorKind, StrategySpec, TargetSignal};

const HANDLE_ATTRIBUTE: &str = "data-reg-handle";

/// 定位轮询次数与间隔（页面渲染可能稍晚）
const LOCATE_POLLS: u32 = 5;
const LOCATE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 提交后读取信号的轮询次数与间隔
const SIGNAL_POLLS: u32 = 10;
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// chromiumoxide 适配器
pub struct ChromiumAdapter {
    executor: JsExecutor,
    target_url: String,
    login_url_fragment: Option<String>,
    banner_selectors: Vec<String>,
    next_session: AtomicU64,
    next_handle: AtomicU64,
    current_session: Mutex<Option<u64>>,
}

impl ChromiumAdapter {
    pub fn new(executor: JsExecutor, config: &Config) -> Self {
        Self {
            executor,
            target_url: config.target_url.clone(),
            login_url_fragment: config.login_url_fragment.clone(),
            banner_selectors: config.banner_selectors.clone(),
            next_session: AtomicU64::new(0),
            next_handle: AtomicU64::new(0),
            current_session: Mutex::new(None),
        }
    }

    fn current_session(&self) -> Option<u64> {
        *self
            .current_session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_current_session(&self, id: Option<u64>) {
        *self
            .current_session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = id;
    }

    fn check_session(&self, session: &SessionHandle) -> Result<(), AdapterError> {
        if self.current_session() == Some(session.id()) {
            Ok(())
        } else {
            Err(AdapterError::SessionInvalidated(format!(
                "{} 已不是当前会话",
                session
            )))
        }
    }

    async fn page_state(&self) -> Result<PageState, AdapterError> {
        self.executor
            .eval_as("(() => ({ ready: document.readyState, url: location.href }))()")
            .await
    }

    async fn wait_until_loaded(&self) -> Result<PageState, AdapterError> {
        for _ in 0..20 {
            let state = self.page_state().await?;
            if state.ready == "complete" {
                return Ok(state);
            }
            sleep(Duration::from_millis(250)).await;
        }
        Err(AdapterError::Timeout("页面加载未完成".to_string()))
    }

    fn is_login_page(&self, url: &str) -> bool {
        self.login_url_fragment
            .as_deref()
            .is_some_and(|fragment| !fragment.is_empty() && url.contains(fragment))
    }
}

#[derive(Debug, Deserialize)]
struct PageState {
    ready: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ActResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    options: Option<Vec<String>>,
}

#[async_trait]
impl TargetAdapter for ChromiumAdapter {
    async fn open_session(&self) -> Result<SessionHandle, AdapterError> {
        info!("🌐 打开会话: {}", self.target_url);
        self.executor
            .goto(&self.target_url)
            .await
            .map_err(|e| AdapterError::SessionOpen(e.to_string()))?;

        let state = self
            .wait_until_loaded()
            .await
            .map_err(|e| AdapterError::SessionOpen(e.to_string()))?;
        if self.is_login_page(&state.url) {
            return Err(AdapterError::SessionOpen(format!(
                "页面跳转到了登录页: {}",
                state.url
            )));
        }

        self.executor
            .eval(install_hook_script())
            .await
            .map_err(|e| AdapterError::SessionOpen(e.to_string()))?;

        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_current_session(Some(id));
        let session = SessionHandle::new(id);
        debug!("{} 已打开", session);
        Ok(session)
    }

    async fn is_session_open(&self, session: &SessionHandle) -> bool {
        if self.check_session(session).is_err() {
            return false;
        }
        match self.page_state().await {
            Ok(state) => {
                state.ready != "loading"
                    && !state.url.starts_with("about:blank")
                    && !self.is_login_page(&state.url)
            }
            Err(e) => {
                debug!("检查会话状态失败: {}", e);
                false
            }
        }
    }

    async fn locate(
        &self,
        session: &SessionHandle,
        spec: &StrategySpec,
    ) -> Result<ControlHandle, AdapterError> {
        self.check_session(session)?;
        // 页面可能被局部刷新，钩子是幂等的
        self.executor.eval(install_hook_script()).await?;

        let token = format!(
            "h{}",
            self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
        );
        let script = locate_script(spec, &token);

        for poll in 0..LOCATE_POLLS {
            let found: JsonValue = self.executor.eval(script.as_str()).await?;
            if found.as_str() == Some(token.as_str()) {
                debug!("定位成功 {} -> {}", spec, token);
                return Ok(ControlHandle::new(token));
            }
            if poll + 1 < LOCATE_POLLS {
                sleep(LOCATE_POLL_INTERVAL).await;
            }
        }

        Err(AdapterError::NotFound(spec.to_string()))
    }

    async fn act(
        &self,
        session: &SessionHandle,
        control: &ControlHandle,
        action: &Action,
    ) -> Result<ActionResult, AdapterError> {
        self.check_session(session)?;
        let response: ActResponse = self
            .executor
            .eval_as(act_script(control.token(), action))
            .await?;

        if !response.ok {
            let error = response.error.unwrap_or_else(|| "未知错误".to_string());
            return Err(if error == "stale" {
                AdapterError::NotFound(format!("控件 {} 已不在页面上", control.token()))
            } else if error.starts_with("no-option") {
                AdapterError::NotFound(error)
            } else {
                AdapterError::Script(error)
            });
        }

        Ok(match action {
            Action::ListOptions => ActionResult::Options(response.options.unwrap_or_default()),
            _ => ActionResult::Done,
        })
    }

    async fn observe_signal(&self, session: &SessionHandle) -> Result<TargetSignal, AdapterError> {
        self.check_session(session)?;
        let script = observe_script(&self.banner_selectors);

        let mut signal = TargetSignal::ok();
        for poll in 0..SIGNAL_POLLS {
            signal = self.executor.eval_as(script.as_str()).await?;
            if signal.banner.is_some()
                || signal.last_error.is_some()
                || signal.response_status.is_some()
            {
                break;
            }
            if poll + 1 < SIGNAL_POLLS {
                sleep(SIGNAL_POLL_INTERVAL).await;
            }
        }

        // 读过的状态清掉，避免串到下一个条目
        if let Err(e) = self.executor.eval(reset_hook_script()).await {
            warn!("清理请求钩子状态失败: {}", e);
        }
        Ok(signal)
    }

    async fn close_session(&self, session: &SessionHandle) {
        if self.check_session(session).is_err() {
            return;
        }
        self.set_current_session(None);
        if let Err(e) = self.executor.goto("about:blank").await {
            warn!("关闭 {} 失败: {}", session, e);
        } else {
            debug!("{} 已关闭", session);
        }
    }
}

/// 转成 JS 字符串字面量
fn js_str(value: &str) -> String {
    JsonValue::from(value).to_string()
}

fn install_hook_script() -> &'static str {
    r#"
    (() => {
        if (window.__regHookInstalled) return true;
        window.__regHookInstalled = true;
        window.__regLastStatus = null;
        window.__regLastError = null;

        const originalFetch = window.fetch;
        if (originalFetch) {
            window.fetch = async (...args) => {
                try {
                    const response = await originalFetch(...args);
                    window.__regLastStatus = response.status;
                    return response;
                } catch (error) {
                    window.__regLastError = String((error && error.message) || error);
                    throw error;
                }
            };
        }

        const originalSend = XMLHttpRequest.prototype.send;
        XMLHttpRequest.prototype.send = function (...args) {
            this.addEventListener('loadend', () => {
                if (this.status) {
                    window.__regLastStatus = this.status;
                } else {
                    window.__regLastError = 'network error';
                }
            });
            return originalSend.apply(this, args);
        };
        return true;
    })()
    "#
}

fn reset_hook_script() -> &'static str {
    "(() => { window.__regLastStatus = null; window.__regLastError = null; return true; })()"
}

fn locate_script(spec: &StrategySpec, token: &str) -> String {
    let kind = match spec.kind() {
        LocatorKind::Css => "css",
        LocatorKind::XPath => "xpath",
        LocatorKind::Text => "text",
        LocatorKind::Label => "label",
    };

    format!(
        r#"
        (() => {{
            const kind = {kind};
            const value = {value};
            const visible = (el) => !!(el && (el.offsetParent !== null || el.getClientRects().length));
            const textOf = (el) => (el.innerText || el.textContent || '').trim();
            let el = null;
            try {{
                switch (kind) {{
                    case 'css':
                        el = Array.from(document.querySelectorAll(value)).find(visible) || null;
                        break;
                    case 'xpath':
                        el = document.evaluate(value, document, null,
                            XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
                        break;
                    case 'text':
                        el = Array.from(document.querySelectorAll(
                            'button, a, span, li, label, [role=button], [role=option], [role=tab]'))
                            .find((c) => visible(c) && textOf(c) === value) || null;
                        break;
                    case 'label': {{
                        const label = Array.from(document.querySelectorAll('label'))
                            .find((l) => textOf(l).replace(/[:：*\s]+$/, '') === value);
                        if (label) {{
                            el = label.htmlFor ? document.getElementById(label.htmlFor) : null;
                            if (!el) {{
                                const item = label.closest('.el-form-item, .form-group, .form-item') || label.parentElement;
                                el = item && item.querySelector('input, select, textarea, .el-select, [role=combobox]');
                            }}
                        }}
                        break;
                    }}
                }}
            }} catch (e) {{
                return null;
            }}
            if (!visible(el)) return null;
            el.setAttribute('{attr}', {token});
            return {token};
        }})()
        "#,
        kind = js_str(kind),
        value = js_str(spec.value()),
        attr = HANDLE_ATTRIBUTE,
        token = js_str(token),
    )
}

fn act_script(token: &str, action: &Action) -> String {
    let (kind, argument) = match action {
        Action::Click => ("click", ""),
        Action::Fill(text) => ("fill", text.as_str()),
        Action::Select(option) => ("select", option.as_str()),
        Action::ListOptions => ("list", ""),
    };

    format!(
        r#"
        (async () => {{
            const kind = {kind};
            const argument = {argument};
            const el = document.querySelector('[{attr}=' + JSON.stringify({token}) + ']');
            if (!el) return {{ ok: false, error: 'stale' }};

            const pause = (ms) => new Promise((r) => setTimeout(r, ms));
            const visible = (n) => !!(n && (n.offsetParent !== null || n.getClientRects().length));
            const textOf = (n) => (n.innerText || n.textContent || '').trim();
            const optionNodes = () => Array.from(document.querySelectorAll(
                '.el-select-dropdown__item, [role=option], .dropdown-item, .ant-select-item-option'))
                .filter(visible);
            const openDropdown = async () => {{
                if (optionNodes().length === 0) {{
                    el.click();
                    await pause(300);
                }}
            }};

            try {{
                el.scrollIntoView({{ block: 'center' }});
                switch (kind) {{
                    case 'click':
                        el.click();
                        return {{ ok: true }};
                    case 'fill': {{
                        const input = /^(INPUT|TEXTAREA)$/.test(el.tagName) ? el : el.querySelector('input, textarea');
                        if (!input) return {{ ok: false, error: 'not an input' }};
                        const proto = input.tagName === 'TEXTAREA'
                            ? HTMLTextAreaElement.prototype
                            : HTMLInputElement.prototype;
                        Object.getOwnPropertyDescriptor(proto, 'value').set.call(input, argument);
                        input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                        input.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return {{ ok: true }};
                    }}
                    case 'list':
                        if (el.tagName === 'SELECT') {{
                            return {{ ok: true, options: Array.from(el.options).map(textOf) }};
                        }}
                        await openDropdown();
                        return {{ ok: true, options: optionNodes().map(textOf) }};
                    case 'select': {{
                        if (el.tagName === 'SELECT') {{
                            const option = Array.from(el.options).find((o) => textOf(o) === argument);
                            if (!option) return {{ ok: false, error: 'no-option: ' + argument }};
                            el.value = option.value;
                            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                            return {{ ok: true }};
                        }}
                        await openDropdown();
                        const option = optionNodes().find((o) => textOf(o) === argument);
                        if (!option) return {{ ok: false, error: 'no-option: ' + argument }};
                        option.click();
                        return {{ ok: true }};
                    }}
                }}
                return {{ ok: false, error: 'unknown action ' + kind }};
            }} catch (e) {{
                return {{ ok: false, error: String((e && e.message) || e) }};
            }}
        }})()
        "#,
        kind = js_str(kind),
        argument = js_str(argument),
        attr = HANDLE_ATTRIBUTE,
        token = js_str(token),
    )
}

fn observe_script(banner_selectors: &[String]) -> String {
    let selectors = JsonValue::from(banner_selectors.to_vec()).to_string();
    format!(
        r#"
        (() => {{
            const selectors = {selectors};
            const visible = (n) => !!(n && (n.offsetParent !== null || n.getClientRects().length));
            let banner = null;
            for (const selector of selectors) {{
                let nodes = [];
                try {{
                    nodes = Array.from(document.querySelectorAll(selector)).filter(visible);
                }} catch (e) {{
                    continue;
                }}
                const node = nodes[nodes.length - 1];
                const text = node ? (node.innerText || node.textContent || '').trim() : '';
                if (!text) continue;
                const cls = String(node.className || '').toLowerCase();
                let level = 'info';
                if (/success/.test(cls)) level = 'success';
                else if (/warn/.test(cls)) level = 'warning';
                else if (/error|danger|fail/.test(cls)) level = 'error';
                banner = {{ text, level }};
                break;
            }}
            return {{
                banner,
                last_error: window.__regLastError || null,
                response_status: window.__regLastStatus || null,
            }};
        }})()
        "#,
        selectors = selectors,
    )
}
