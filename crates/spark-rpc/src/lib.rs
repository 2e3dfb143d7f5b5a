//! # spark-rpc
//!
//! ## 定位与职责（Why）
//! - 为多协议 RPC 框架提供协议无关的调用管线：地址描述、调用与结果模型、目录与路由、
//!   负载均衡、集群容错、过滤链、注册中心协作以及提供方/消费方代理；
//! - 具体传输协议与注册中心实现以扩展形式接入，库内只附带进程内协议与内存注册中心。
//!
//! ## 架构嵌入（Where）
//! - 消费方：`ServiceProxy → 集群拦截器 → FailfastClusterInvoker → RegistryDirectory/RouterChain
//!   → LoadBalance → 过滤链 → 协议调用器`；
//! - 提供方：`RegistryProtocol::export → ProtocolFilterWrapper → 协议导出 → 注册中心登记`，
//!   入站调用经 [`proxy::ProxyInvoker`] 分派至业务方法。
//!
//! ## 运行时约束（Trade-offs）
//! - 库内不启动异步运行时；延迟注销优先使用当前 Tokio 运行时，缺失时退化为后台线程；
//! - 所有扩展查找经由显式持有的 [`extension::ExtensionRegistry`]，不存在进程级全局表。

pub mod chain;
pub mod cluster;
pub mod config;
pub mod constant;
pub mod context;
pub mod error;
pub mod extension;
pub mod filter;
pub mod invocation;
pub(crate) mod net;
pub mod observability;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod result;
pub mod url;

pub use config::PipelineConfig;
pub use context::{CallContext, Cancellation, Deadline};
pub use error::{ErrorKind, RpcError};
pub use extension::ExtensionRegistry;
pub use invocation::{AttachmentValue, RpcInvocation};
pub use result::RpcResult;
pub use url::ServiceUrl;
