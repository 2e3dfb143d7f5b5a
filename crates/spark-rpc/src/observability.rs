//! 日志接入。
//!
//! 库内所有组件只通过 `tracing` 宏输出结构化事件；是否以及如何落地由宿主决定。
//! [`install_tracing`] 为不想自行组装 Subscriber 的宿主提供一键入口：
//! `fmt` 输出 + `EnvFilter`（读取 `RUST_LOG`，缺省 `info`）。

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装日志订阅者的失败原因。
#[derive(Debug, Error)]
pub enum TracingInstallError {
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,
    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局 `fmt + EnvFilter` 订阅者。
///
/// 外部已经设置过全局订阅者时返回 [`TracingInstallError::SubscriberAlreadySet`]，不会覆盖。
pub fn install_tracing() -> Result<(), TracingInstallError> {
    if dispatcher::has_been_set() {
        return Err(TracingInstallError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
