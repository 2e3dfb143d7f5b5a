//! # registry 模块
//!
//! ## 契约（What）
//! - [`Registry`]：服务发现后端的窄接口，注册/注销/订阅/退订；
//! - [`NotifyListener`]：接收增删改事件，`notify_all` 交付全量集合并在处理完毕后调用 `done`；
//! - [`RegistryFactory`]：按注册中心地址构造连接。
//!
//! ## 结构（How）
//! - `memory`：进程内注册中心；
//! - `directory`：由注册事件驱动的目录；
//! - `protocol`：注册协议，在过滤包装协议之上完成导出去重、注册与延迟卸载。

use std::{fmt, sync::Arc};

use crate::{error::RpcError, url::ServiceUrl};

mod directory;
mod memory;
mod protocol;

pub use directory::RegistryDirectory;
pub use memory::{MemoryRegistry, MemoryRegistryFactory};
pub use protocol::{ExporterChangeableWrapper, RegistryProtocol};

/// 注册事件类型。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventType {
    Add,
    Delete,
    Update,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventType::Add => "add",
            EventType::Delete => "delete",
            EventType::Update => "update",
        })
    }
}

/// 单个提供方地址的变化。
#[derive(Clone, Debug)]
pub struct ServiceEvent {
    pub action: EventType,
    pub service: Arc<ServiceUrl>,
}

impl ServiceEvent {
    pub fn new(action: EventType, service: Arc<ServiceUrl>) -> Self {
        Self { action, service }
    }

    /// 事件缓存键。
    pub fn key(&self) -> String {
        self.service.cache_invoker_map_key()
    }
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceEvent{{action: {}, service: {}}}", self.action, self.service)
    }
}

/// 全量通知处理完毕后的回调。
pub type NotifyDone = Box<dyn FnOnce() + Send>;

pub trait NotifyListener: Send + Sync {
    fn notify(&self, event: ServiceEvent);

    fn notify_all(&self, events: Vec<ServiceEvent>, done: NotifyDone);
}

pub type SharedNotifyListener = Arc<dyn NotifyListener>;

pub trait Registry: Send + Sync {
    fn url(&self) -> Arc<ServiceUrl>;

    fn register(&self, url: &Arc<ServiceUrl>) -> Result<(), RpcError>;

    fn unregister(&self, url: &Arc<ServiceUrl>) -> Result<(), RpcError>;

    fn subscribe(&self, url: &Arc<ServiceUrl>, listener: SharedNotifyListener)
    -> Result<(), RpcError>;

    fn unsubscribe(
        &self,
        url: &Arc<ServiceUrl>,
        listener: &SharedNotifyListener,
    ) -> Result<(), RpcError>;

    fn destroy(&self) {}
}

pub type SharedRegistry = Arc<dyn Registry>;

pub trait RegistryFactory: Send + Sync {
    fn get_registry(&self, url: &Arc<ServiceUrl>) -> Result<SharedRegistry, RpcError>;
}

pub type SharedRegistryFactory = Arc<dyn RegistryFactory>;
