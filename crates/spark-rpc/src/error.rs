//! # error 模块说明
//!
//! ## 角色定位（What）
//! - 集中定义调用管线对外暴露的错误语义，所有失败最终以 [`RpcError`] 的形式进入
//!   [`RpcResult`](crate::RpcResult) 的错误槽位，管线不会越过自身边界抛出 panic；
//! - 每个变体映射一个稳定的点分错误码（[`RpcError::code`]），并归入 [`ErrorKind`] 分类，
//!   便于告警规则与重试策略按类别聚合。
//!
//! ## 分类约定（How）
//! - `NoCandidate`：目录在路由后没有任何候选；
//! - `Destroyed`：集群或单个调用器已销毁后仍被调用；
//! - `ClientClosed` / `NoReplySlot`：传输层前置条件不满足；
//! - `DispatchNotFound`：本地服务表中缺失服务、方法或参数签名不匹配；
//! - `BusinessFault`：业务方法 panic 或主动返回的应用错误；
//! - `Registry`：注册中心的注册/注销/订阅失败，直接返回给 `export`/`destroy` 的调用方；
//! - 其余为扩展查找、配置、取消与启动期致命错误。

use std::time::Duration;

use thiserror::Error;

/// 错误所属的大类，与调用管线的错误分类一一对应。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    NoCandidate,
    Destroyed,
    ClientClosed,
    NoReplySlot,
    DispatchNotFound,
    BusinessFault,
    Registry,
    Extension,
    Configuration,
    Cancelled,
    /// 启动期不可恢复错误，宿主进程应据此终止。
    Fatal,
}

/// 调用管线错误域。
///
/// # 契约（What）
/// - 所有变体均为 `Clone + Send + Sync + 'static`，可以按值放入结果信封并跨线程传递；
/// - 变体字段保存人类可读上下文（服务键、地址、方法名），`Display` 输出即为最终诊断文本；
/// - [`RpcError::code`] 返回的错误码在版本间保持稳定，禁止复用已废弃的码值。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RpcError {
    /// 目录在路由后为空。
    ///
    /// 诊断文本必须包含服务键、本机 IP 与目录地址，便于排查注册中心数据与路由规则。
    #[error(
        "failed to invoke the method {method}: no provider available for the service {service_key} \
         from registry {directory} on the consumer {local_ip}; please check whether the provider has been started"
    )]
    NoProvider {
        method: String,
        service_key: String,
        directory: String,
        local_ip: String,
    },

    /// 集群调用器已销毁。
    #[error("cluster invoker for {directory} is destroyed, cannot invoke any more")]
    ClusterDestroyed { directory: String },

    /// 单个调用器已销毁。
    #[error("invoker {url} is destroyed")]
    DestroyedInvoker { url: String },

    #[error("remoting client has closed")]
    ClientClosed,

    #[error("request need @response")]
    NoReply,

    #[error("cannot find service [{service_key}] in {protocol}")]
    ServiceNotFound {
        protocol: String,
        service_key: String,
    },

    #[error("cannot find method [{method}] of service [{service_key}] in {protocol}")]
    MethodNotFound {
        protocol: String,
        service_key: String,
        method: String,
    },

    /// 实参个数或形状与方法声明不符。
    #[error("arguments of method [{method}] mismatch the declared signature: {detail}")]
    ArgumentMismatch { method: String, detail: String },

    /// 业务方法 panic 后被捕获并转换。
    #[error("business fault in method [{method}]: {detail}")]
    BusinessFault { method: String, detail: String },

    /// 注册中心操作失败，`operation` 取值如 `register`、`unregister`、`subscribe`。
    #[error("registry {registry} failed to {operation}: {detail}")]
    Registry {
        registry: String,
        operation: &'static str,
        detail: String,
    },

    #[error("{kind} extension named `{name}` is not registered")]
    ExtensionNotFound { kind: &'static str, name: String },

    #[error("{kind} extension named `{name}` is already registered")]
    DuplicateExtension { kind: &'static str, name: String },

    #[error("method `{method}` is declared twice on service `{service}`")]
    DuplicateMethod { service: String, method: String },

    #[error("invalid url `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("invalid pipeline configuration: {detail}")]
    Configuration { detail: String },

    /// 等待服务导出超时；宿主应将其视为致命错误并终止进程。
    #[error("only {exported} of {expected} services exported after {waited:?}")]
    ExportTimeout {
        expected: usize,
        exported: usize,
        waited: Duration,
    },

    #[error("call cancelled by caller")]
    Cancelled,

    #[error("call deadline exceeded before dispatch")]
    DeadlineExceeded,

    /// 业务方法主动返回的错误。
    #[error("{detail}")]
    Application { detail: String },
}

impl RpcError {
    /// 构造业务错误，供方法实现直接 `?` 传播。
    pub fn application(detail: impl Into<String>) -> Self {
        RpcError::Application {
            detail: detail.into(),
        }
    }

    /// 构造注册中心错误。
    pub fn registry(
        registry: impl Into<String>,
        operation: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        RpcError::Registry {
            registry: registry.into(),
            operation,
            detail: detail.into(),
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        RpcError::ExtensionNotFound {
            kind,
            name: name.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::NoProvider { .. } => "rpc.cluster.no_provider",
            RpcError::ClusterDestroyed { .. } => "rpc.cluster.destroyed",
            RpcError::DestroyedInvoker { .. } => "rpc.invoker.destroyed",
            RpcError::ClientClosed => "rpc.transport.client_closed",
            RpcError::NoReply => "rpc.transport.no_reply",
            RpcError::ServiceNotFound { .. } => "rpc.proxy.service_not_found",
            RpcError::MethodNotFound { .. } => "rpc.proxy.method_not_found",
            RpcError::ArgumentMismatch { .. } => "rpc.proxy.argument_mismatch",
            RpcError::BusinessFault { .. } => "rpc.proxy.business_fault",
            RpcError::Registry { .. } => "rpc.registry.failure",
            RpcError::ExtensionNotFound { .. } => "rpc.extension.not_found",
            RpcError::DuplicateExtension { .. } => "rpc.extension.duplicate",
            RpcError::DuplicateMethod { .. } => "rpc.proxy.duplicate_method",
            RpcError::InvalidUrl { .. } => "rpc.url.invalid",
            RpcError::Configuration { .. } => "rpc.config.invalid",
            RpcError::ExportTimeout { .. } => "rpc.export.timeout",
            RpcError::Cancelled => "rpc.call.cancelled",
            RpcError::DeadlineExceeded => "rpc.call.deadline_exceeded",
            RpcError::Application { .. } => "rpc.application",
        }
    }

    /// 返回错误大类。
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::NoProvider { .. } => ErrorKind::NoCandidate,
            RpcError::ClusterDestroyed { .. } | RpcError::DestroyedInvoker { .. } => {
                ErrorKind::Destroyed
            }
            RpcError::ClientClosed => ErrorKind::ClientClosed,
            RpcError::NoReply => ErrorKind::NoReplySlot,
            RpcError::ServiceNotFound { .. }
            | RpcError::MethodNotFound { .. }
            | RpcError::ArgumentMismatch { .. } => ErrorKind::DispatchNotFound,
            RpcError::BusinessFault { .. } | RpcError::Application { .. } => {
                ErrorKind::BusinessFault
            }
            RpcError::Registry { .. } => ErrorKind::Registry,
            RpcError::ExtensionNotFound { .. }
            | RpcError::DuplicateExtension { .. }
            | RpcError::DuplicateMethod { .. } => ErrorKind::Extension,
            RpcError::InvalidUrl { .. } | RpcError::Configuration { .. } => {
                ErrorKind::Configuration
            }
            RpcError::Cancelled | RpcError::DeadlineExceeded => ErrorKind::Cancelled,
            RpcError::ExportTimeout { .. } => ErrorKind::Fatal,
        }
    }

    /// 是否属于宿主必须终止进程的启动期错误。
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_provider_message_carries_diagnostics() {
        let err = RpcError::NoProvider {
            method: "Echo".into(),
            service_key: "g1/Echo:v1".into(),
            directory: "registry://127.0.0.1:2181".into(),
            local_ip: "10.0.0.8".into(),
        };
        let text = err.to_string();
        assert!(text.contains("g1/Echo:v1"), "诊断文本需包含服务键");
        assert!(text.contains("10.0.0.8"), "诊断文本需包含本机 IP");
        assert!(text.contains("registry://127.0.0.1:2181"), "诊断文本需包含目录地址");
        assert_eq!(err.code(), "rpc.cluster.no_provider");
        assert_eq!(err.kind(), ErrorKind::NoCandidate);
    }

    #[test]
    fn export_timeout_is_the_only_fatal_kind() {
        let fatal = RpcError::ExportTimeout {
            expected: 2,
            exported: 1,
            waited: Duration::from_secs(10),
        };
        assert!(fatal.is_fatal());
        assert!(!RpcError::ClientClosed.is_fatal());
        assert!(!RpcError::application("boom").is_fatal());
    }
}
