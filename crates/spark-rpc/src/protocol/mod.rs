//! # protocol 模块
//!
//! ## 契约（What）
//! - [`Invoker`]：绑定唯一地址的可调用句柄，`invoke` 总是返回结果信封，失败写入错误槽位；
//! - [`Exporter`]：提供方“该调用器当前可达”的句柄，`unexport` 负责对称拆除；
//! - [`Protocol`]：单一传输的能力集合，`export`/`refer`/`destroy`；
//! - 可用性与销毁标志单调变化：可用 → 不可用 → 已销毁，销毁幂等。
//!
//! ## 结构（How）
//! - `base`：可复用的标志位、导出表与协议骨架；
//! - `local`：进程内传输（`injvm`），供单进程部署与端到端测试使用；
//! - `barrier`：提供方在开放监听前等待全部服务导出的有界等待。

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    context::CallContext, error::RpcError, invocation::RpcInvocation, result::RpcResult,
    url::ServiceUrl,
};

mod barrier;
mod base;
mod local;

pub use barrier::wait_for_exports;
pub use base::{BaseExporter, BaseInvoker, BaseProtocol, ExporterMap};
pub use local::{LocalInvoker, LocalProtocol, local_key};

/// 绑定到一个地址、具备生命周期的节点。
pub trait Node: Send + Sync {
    fn url(&self) -> Arc<ServiceUrl>;

    fn is_available(&self) -> bool;

    /// 销毁节点；重复调用无副作用。
    fn destroy(&self);

    /// 是否已销毁。不追踪销毁状态的节点恒为 `false`。
    fn is_destroyed(&self) -> bool {
        false
    }
}

/// 可调用句柄。
#[async_trait]
pub trait Invoker: Node {
    async fn invoke(&self, ctx: &CallContext, invocation: &RpcInvocation) -> RpcResult;
}

pub type SharedInvoker = Arc<dyn Invoker>;

/// 调用器身份比较：同一分配即同一调用器。
pub fn same_invoker(left: &SharedInvoker, right: &SharedInvoker) -> bool {
    Arc::ptr_eq(left, right)
}

/// 提供方导出句柄。
pub trait Exporter: Send + Sync {
    fn invoker(&self) -> SharedInvoker;

    fn unexport(&self);
}

pub type SharedExporter = Arc<dyn Exporter>;

/// 单一传输协议。
pub trait Protocol: Send + Sync {
    fn export(&self, invoker: SharedInvoker) -> Result<SharedExporter, RpcError>;

    fn refer(&self, url: Arc<ServiceUrl>) -> Result<SharedInvoker, RpcError>;

    /// 拆除该协议持有的全部导出与引用。
    fn destroy(&self);
}

pub type SharedProtocol = Arc<dyn Protocol>;
