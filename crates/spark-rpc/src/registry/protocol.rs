//! # 注册协议
//!
//! ## 契约（What）
//! - 位于应用代码与过滤包装协议之间；
//! - `export`：按注册中心位置解析并缓存连接 → 经过滤包装协议做本地导出（以剔除易变参数后的提供方地址
//!   去重，同一提供方地址至多一次本地导出）→ 向注册中心注册对外地址；
//! - `refer`：解析注册中心 → 构造并订阅注册目录 → 按消费方 `cluster` 参数选择集群策略合并目录；
//! - `destroy`：逐个注销，并在宽限期后异步卸载本地导出，让在途调用排空；
//! - 注册中心失败作为错误返回给 `export` / [`RegistryProtocol::try_destroy`] 的调用方。
//!
//! ## 并发（How）
//! - 注册中心缓存与导出缓存均为 `DashMap`，借助 entry API 实现“先写者胜”的加载或创建。

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use super::{RegistryDirectory, SharedRegistry};
use crate::{
    cluster::router::RouterChain,
    constant::{
        CLUSTER_KEY, EXPORT_VOLATILE_KEYS, REGISTRY_KEY, REGISTRY_PROTOCOL,
        REGISTRY_RESERVED_KEYS, SIMPLIFIED_KEY,
    },
    context::CallContext,
    error::RpcError,
    extension::ExtensionRegistry,
    filter::ProtocolFilterWrapper,
    invocation::RpcInvocation,
    protocol::{Exporter, Invoker, Node, Protocol, SharedExporter, SharedInvoker, SharedProtocol},
    result::RpcResult,
    url::ServiceUrl,
};

type Bounds = DashMap<String, Arc<ExporterChangeableWrapper>>;

/// 注册协议。
pub struct RegistryProtocol {
    extensions: Arc<ExtensionRegistry>,
    filter_protocol: SharedProtocol,
    registries: DashMap<String, SharedRegistry>,
    bounds: Arc<Bounds>,
    referred: Mutex<Vec<SharedInvoker>>,
    unexport_grace: Duration,
}

impl RegistryProtocol {
    pub fn new(extensions: Arc<ExtensionRegistry>) -> Self {
        let filter_protocol: SharedProtocol =
            Arc::new(ProtocolFilterWrapper::new(Arc::clone(&extensions)));
        let unexport_grace = extensions.config().unexport_grace;
        Self {
            extensions,
            filter_protocol,
            registries: DashMap::new(),
            bounds: Arc::new(DashMap::new()),
            referred: Mutex::new(Vec::new()),
            unexport_grace,
        }
    }

    /// 导出缓存中的条目数。
    pub fn exported_count(&self) -> usize {
        self.bounds.len()
    }

    /// 已缓存的注册中心连接数。
    pub fn registry_count(&self) -> usize {
        self.registries.len()
    }

    fn get_registry(&self, registry_url: &Arc<ServiceUrl>) -> Result<SharedRegistry, RpcError> {
        let key = format!("{}://{}", registry_url.protocol(), registry_url.location());
        match self.registries.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let registry = self
                    .extensions
                    .registry_factory(registry_url.protocol())?
                    .get_registry(registry_url)?;
                Ok(Arc::clone(entry.insert(registry).value()))
            }
        }
    }

    fn do_local_export(
        &self,
        origin: SharedInvoker,
        provider_url: Arc<ServiceUrl>,
    ) -> Result<Arc<ExporterChangeableWrapper>, RpcError> {
        let key = provider_cache_key(&provider_url);
        match self.bounds.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let delegate: SharedInvoker = Arc::new(InvokerDelegate {
                    invoker: origin,
                    url: provider_url,
                });
                let exporter = self.filter_protocol.export(delegate)?;
                let wrapper = Arc::new(ExporterChangeableWrapper {
                    exporter,
                    key,
                    bounds: Arc::downgrade(&self.bounds),
                    registration: RwLock::new(None),
                });
                Ok(Arc::clone(entry.insert(wrapper).value()))
            }
        }
    }

    /// 注销全部导出并在宽限期后卸载；返回遇到的第一个注册中心错误。
    pub fn try_destroy(&self) -> Result<(), RpcError> {
        let wrappers: Vec<Arc<ExporterChangeableWrapper>> = self
            .bounds
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut first_error = None;
        for wrapper in wrappers {
            if let Some((registry, url)) = wrapper.registration() {
                match registry.unregister(&url) {
                    Ok(()) => info!(url = %url, "unregistered provider"),
                    Err(err) => {
                        warn!(url = %url, error = %err, "failed to unregister provider");
                        first_error.get_or_insert(err);
                    }
                }
            }
            let grace = self.unexport_grace;
            schedule_after(grace, move || {
                info!(key = %wrapper.key, ?grace, "delayed unexport");
                wrapper.unexport();
            });
        }

        let referred = std::mem::take(&mut *self.referred.lock());
        for invoker in referred {
            invoker.destroy();
        }
        self.registries.clear();
        first_error.map_or(Ok(()), Err)
    }
}

/// 导出缓存键：剔除易变参数后的提供方地址文本。
fn provider_cache_key(provider_url: &ServiceUrl) -> String {
    provider_url
        .clone_except_params(&EXPORT_VOLATILE_KEYS)
        .to_string()
}

/// 解析实际的注册中心协议：`registry://...?registry=memory` 视为 `memory://...`。
fn effective_registry_url(url: &Arc<ServiceUrl>) -> Arc<ServiceUrl> {
    if url.protocol() == REGISTRY_PROTOCOL {
        Arc::new(url.with_protocol(url.get_param_or(REGISTRY_KEY, "")))
    } else {
        Arc::clone(url)
    }
}

/// 计算向注册中心登记的地址。
fn url_to_registry(provider_url: &ServiceUrl, registry_url: &ServiceUrl) -> ServiceUrl {
    if registry_url.get_param_bool(SIMPLIFIED_KEY, true) {
        provider_url.clone_with_params(&REGISTRY_RESERVED_KEYS)
    } else {
        provider_url.clone_retaining(|key| !key.starts_with('.'))
    }
}

/// 延迟执行：在 Tokio 运行时内借用其计时器，否则退回独立线程。
fn schedule_after(delay: Duration, task: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                task();
            });
        }
        Err(_) => {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                task();
            });
        }
    }
}

impl Protocol for RegistryProtocol {
    fn export(&self, invoker: SharedInvoker) -> Result<SharedExporter, RpcError> {
        let registry_url = effective_registry_url(&invoker.url());
        let provider_url = registry_url
            .sub_url()
            .cloned()
            .ok_or_else(|| RpcError::InvalidUrl {
                input: registry_url.to_string(),
                reason: "registry url carries no provider url".into(),
            })?;

        let wrapper = self.do_local_export(invoker, Arc::clone(&provider_url))?;

        if !registry_url.protocol().is_empty() {
            let registry = self.get_registry(&registry_url)?;
            let registered = Arc::new(url_to_registry(&provider_url, &registry_url));
            registry.register(&registered)?;
            info!(registry = %registry_url, url = %registered, "registered provider");
            wrapper.bind_registration(registry, registered);
        }
        let exporter: SharedExporter = wrapper;
        Ok(exporter)
    }

    fn refer(&self, url: Arc<ServiceUrl>) -> Result<SharedInvoker, RpcError> {
        let registry_url = effective_registry_url(&url);
        let consumer_url = registry_url
            .sub_url()
            .cloned()
            .ok_or_else(|| RpcError::InvalidUrl {
                input: registry_url.to_string(),
                reason: "registry url carries no consumer url".into(),
            })?;
        let registry = self.get_registry(&registry_url)?;
        let chain =
            RouterChain::from_factories(&consumer_url, &self.extensions.router_factories())?;
        let directory = RegistryDirectory::new(
            Arc::clone(&registry_url),
            registry,
            Arc::clone(&self.filter_protocol),
            chain,
        )?;
        directory.subscribe()?;

        let cluster_name =
            consumer_url.get_param_or(CLUSTER_KEY, &self.extensions.config().default_cluster);
        let cluster = self.extensions.cluster(&cluster_name)?;
        let invoker = cluster.join(directory, &self.extensions);
        self.referred.lock().push(Arc::clone(&invoker));
        Ok(invoker)
    }

    fn destroy(&self) {
        if let Err(err) = self.try_destroy() {
            warn!(error = %err, "registry protocol destroyed with errors");
        }
    }
}

/// 导出句柄：记录注册信息，卸载时同时摘除导出缓存条目。
pub struct ExporterChangeableWrapper {
    exporter: SharedExporter,
    key: String,
    bounds: Weak<Bounds>,
    registration: RwLock<Option<(SharedRegistry, Arc<ServiceUrl>)>>,
}

impl ExporterChangeableWrapper {
    fn bind_registration(&self, registry: SharedRegistry, url: Arc<ServiceUrl>) {
        *self.registration.write() = Some((registry, url));
    }

    fn registration(&self) -> Option<(SharedRegistry, Arc<ServiceUrl>)> {
        self.registration.read().clone()
    }

    /// 向注册中心登记的地址。
    pub fn registered_url(&self) -> Option<Arc<ServiceUrl>> {
        self.registration().map(|(_, url)| url)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Exporter for ExporterChangeableWrapper {
    fn invoker(&self) -> SharedInvoker {
        self.exporter.invoker()
    }

    fn unexport(&self) {
        self.exporter.unexport();
        if let Some(bounds) = self.bounds.upgrade() {
            bounds.remove(&self.key);
        }
    }
}

/// 以提供方地址替换原调用器的注册中心地址。
struct InvokerDelegate {
    invoker: SharedInvoker,
    url: Arc<ServiceUrl>,
}

impl Node for InvokerDelegate {
    fn url(&self) -> Arc<ServiceUrl> {
        Arc::clone(&self.url)
    }

    fn is_available(&self) -> bool {
        self.invoker.is_available()
    }

    fn destroy(&self) {
        self.invoker.destroy();
    }

    fn is_destroyed(&self) -> bool {
        self.invoker.is_destroyed()
    }
}

#[async_trait]
impl Invoker for InvokerDelegate {
    async fn invoke(&self, ctx: &CallContext, invocation: &RpcInvocation) -> RpcResult {
        self.invoker.invoke(ctx, invocation).await
    }
}
