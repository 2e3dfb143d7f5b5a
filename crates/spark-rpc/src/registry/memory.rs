//! 进程内注册中心。
//!
//! 以服务键为粒度保存提供方地址与订阅者；任何变化都以 `notify_all` 向该服务键的全部订阅者
//! 推送当前全集。通知在释放内部锁之后发出，监听器可以在回调中再次访问注册中心。
//!
//! 同一服务键的发布串行进行：快照与投递都在该键的发布锁内完成，
//! 监听器收到的全集按发生顺序到达，较旧的快照不会覆盖较新的快照。发布锁可重入，
//! 回调内对同一服务键的再次注册不会自锁。

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, info};

use super::{
    EventType, Registry, RegistryFactory, ServiceEvent, SharedNotifyListener, SharedRegistry,
};
use crate::{error::RpcError, url::ServiceUrl};

pub struct MemoryRegistry {
    url: Arc<ServiceUrl>,
    providers: RwLock<BTreeMap<String, Vec<Arc<ServiceUrl>>>>,
    subscribers: RwLock<HashMap<String, Vec<SharedNotifyListener>>>,
    publish_locks: DashMap<String, Arc<ReentrantMutex<()>>>,
}

impl MemoryRegistry {
    pub fn new(url: Arc<ServiceUrl>) -> Self {
        Self {
            url,
            providers: RwLock::new(BTreeMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            publish_locks: DashMap::new(),
        }
    }

    /// 某服务键下已注册的提供方。
    pub fn providers(&self, service_key: &str) -> Vec<Arc<ServiceUrl>> {
        self.providers
            .read()
            .get(service_key)
            .cloned()
            .unwrap_or_default()
    }

    fn publish_lock(&self, service_key: &str) -> Arc<ReentrantMutex<()>> {
        Arc::clone(
            self.publish_locks
                .entry(service_key.to_string())
                .or_default()
                .value(),
        )
    }

    fn publish(&self, service_key: &str) {
        let lock = self.publish_lock(service_key);
        let _serial = lock.lock();
        let providers = self.providers(service_key);
        let listeners = self
            .subscribers
            .read()
            .get(service_key)
            .cloned()
            .unwrap_or_default();
        debug!(
            %service_key,
            providers = providers.len(),
            listeners = listeners.len(),
            "publish providers"
        );
        for listener in listeners {
            let events = providers
                .iter()
                .map(|url| ServiceEvent::new(EventType::Add, Arc::clone(url)))
                .collect();
            listener.notify_all(events, Box::new(|| {}));
        }
    }
}

impl Registry for MemoryRegistry {
    fn url(&self) -> Arc<ServiceUrl> {
        Arc::clone(&self.url)
    }

    fn register(&self, url: &Arc<ServiceUrl>) -> Result<(), RpcError> {
        let service_key = url.service_key();
        {
            let mut providers = self.providers.write();
            let entries = providers.entry(service_key.clone()).or_default();
            if entries
                .iter()
                .any(|existing| ServiceUrl::is_equals(existing, url, &[]))
            {
                return Ok(());
            }
            entries.push(Arc::clone(url));
        }
        info!(url = %url, "registered provider");
        self.publish(&service_key);
        Ok(())
    }

    fn unregister(&self, url: &Arc<ServiceUrl>) -> Result<(), RpcError> {
        let service_key = url.service_key();
        {
            let mut providers = self.providers.write();
            let entries = providers.entry(service_key.clone()).or_default();
            let before = entries.len();
            entries.retain(|existing| !ServiceUrl::is_equals(existing, url, &[]));
            if entries.len() == before {
                return Err(RpcError::registry(
                    self.url.to_string(),
                    "unregister",
                    format!("{url} is not registered"),
                ));
            }
        }
        info!(url = %url, "unregistered provider");
        self.publish(&service_key);
        Ok(())
    }

    fn subscribe(
        &self,
        url: &Arc<ServiceUrl>,
        listener: SharedNotifyListener,
    ) -> Result<(), RpcError> {
        let service_key = url.service_key();
        if service_key.is_empty() {
            return Err(RpcError::registry(
                self.url.to_string(),
                "subscribe",
                format!("{url} carries no service key"),
            ));
        }
        self.subscribers
            .write()
            .entry(service_key.clone())
            .or_default()
            .push(listener);
        self.publish(&service_key);
        Ok(())
    }

    fn unsubscribe(
        &self,
        url: &Arc<ServiceUrl>,
        listener: &SharedNotifyListener,
    ) -> Result<(), RpcError> {
        let service_key = url.service_key();
        if let Some(listeners) = self.subscribers.write().get_mut(&service_key) {
            listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        }
        Ok(())
    }

    fn destroy(&self) {
        self.subscribers.write().clear();
        self.providers.write().clear();
    }
}

/// 按注册中心位置缓存 [`MemoryRegistry`] 实例。
#[derive(Default)]
pub struct MemoryRegistryFactory {
    registries: DashMap<String, SharedRegistry>,
}

impl MemoryRegistryFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryFactory for MemoryRegistryFactory {
    fn get_registry(&self, url: &Arc<ServiceUrl>) -> Result<SharedRegistry, RpcError> {
        let registry = self
            .registries
            .entry(url.location())
            .or_insert_with(|| -> SharedRegistry {
                Arc::new(MemoryRegistry::new(Arc::clone(url)))
            });
        Ok(Arc::clone(registry.value()))
    }
}
