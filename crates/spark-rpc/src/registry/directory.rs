use std::{
    collections::BTreeMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{EventType, NotifyDone, NotifyListener, ServiceEvent, SharedNotifyListener, SharedRegistry};
use crate::{
    cluster::{Directory, router::RouterChain},
    constant::TAG_KEY,
    error::RpcError,
    invocation::RpcInvocation,
    protocol::{Node, SharedInvoker, SharedProtocol},
    url::ServiceUrl,
};

/// 注册事件驱动的目录。
///
/// # 契约（What）
/// - 按事件缓存键缓存已引用的调用器，同一提供方地址只引用一次；
/// - `Add`/`Update` 引用新地址（`Update` 先销毁旧调用器），`Delete` 摘除并销毁；
/// - `notify_all` 视为全量：保留仍存在的调用器，引用新增者，销毁消失者；
/// - 每次变化后以全集调用 [`RouterChain::set_invokers`]，`list` 永远只看到某一代完整集合。
///
/// # 执行（How）
/// - 引用时把消费方独有的参数（如 `reference.filter`，`tag` 除外）合并进提供方地址，再交给过滤包装协议；
/// - 目录自身作为监听器订阅注册中心，`destroy` 时退订以解除互相持有。
pub struct RegistryDirectory {
    url: Arc<ServiceUrl>,
    consumer_url: Arc<ServiceUrl>,
    registry: SharedRegistry,
    protocol: SharedProtocol,
    chain: RouterChain,
    cache: Mutex<BTreeMap<String, SharedInvoker>>,
    destroyed: AtomicBool,
    self_ref: Weak<RegistryDirectory>,
}

impl RegistryDirectory {
    /// `url` 为注册中心地址，其子地址即消费方地址。
    pub fn new(
        url: Arc<ServiceUrl>,
        registry: SharedRegistry,
        protocol: SharedProtocol,
        chain: RouterChain,
    ) -> Result<Arc<Self>, RpcError> {
        let consumer_url = url.sub_url().cloned().ok_or_else(|| RpcError::InvalidUrl {
            input: url.to_string(),
            reason: "registry url carries no consumer url".into(),
        })?;
        Ok(Arc::new_cyclic(|self_ref| Self {
            url,
            consumer_url,
            registry,
            protocol,
            chain,
            cache: Mutex::new(BTreeMap::new()),
            destroyed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        }))
    }

    fn listener(&self) -> Option<SharedNotifyListener> {
        self.self_ref
            .upgrade()
            .map(|directory| -> SharedNotifyListener { directory })
    }

    /// 向注册中心订阅消费方服务键。
    pub fn subscribe(&self) -> Result<(), RpcError> {
        let listener = self.listener().ok_or_else(|| {
            RpcError::registry(self.url.to_string(), "subscribe", "directory already dropped")
        })?;
        self.registry.subscribe(&self.consumer_url, listener)
    }

    pub fn router_chain(&self) -> &RouterChain {
        &self.chain
    }

    /// 当前缓存的调用器数量。
    pub fn cached_invokers(&self) -> usize {
        self.cache.lock().len()
    }

    fn merge_url(&self, provider: &ServiceUrl) -> Arc<ServiceUrl> {
        let merged = provider.clone();
        self.consumer_url.range_params(|key, values| {
            // 标签描述提供方自身，不能由消费方补齐。
            if key != TAG_KEY && merged.get_param(key).is_none() {
                for value in values {
                    merged.add_param(key, value.clone());
                }
            }
            true
        });
        Arc::new(merged)
    }

    fn refer(&self, provider: &ServiceUrl) -> Option<SharedInvoker> {
        match self.protocol.refer(self.merge_url(provider)) {
            Ok(invoker) => Some(invoker),
            Err(err) => {
                warn!(url = %provider, error = %err, "failed to refer provider");
                None
            }
        }
    }

    fn apply(&self, cache: &mut BTreeMap<String, SharedInvoker>, event: &ServiceEvent) {
        let key = event.key();
        match event.action {
            EventType::Add => {
                if cache.contains_key(&key) {
                    return;
                }
                if let Some(invoker) = self.refer(&event.service) {
                    cache.insert(key, invoker);
                }
            }
            EventType::Update => {
                if let Some(stale) = cache.remove(&key) {
                    stale.destroy();
                }
                if let Some(invoker) = self.refer(&event.service) {
                    cache.insert(key, invoker);
                }
            }
            EventType::Delete => {
                if let Some(removed) = cache.remove(&key) {
                    removed.destroy();
                }
            }
        }
    }

    fn publish(&self, cache: &BTreeMap<String, SharedInvoker>) {
        debug!(
            service_key = %self.consumer_url.service_key(),
            count = cache.len(),
            "registry directory refreshed"
        );
        self.chain.set_invokers(cache.values().cloned().collect());
    }
}

impl NotifyListener for RegistryDirectory {
    fn notify(&self, event: ServiceEvent) {
        if self.is_destroyed() {
            return;
        }
        debug!(%event, "registry directory received event");
        let mut cache = self.cache.lock();
        self.apply(&mut cache, &event);
        self.publish(&cache);
    }

    fn notify_all(&self, events: Vec<ServiceEvent>, done: NotifyDone) {
        if self.is_destroyed() {
            done();
            return;
        }
        let mut cache = self.cache.lock();
        let mut previous = std::mem::take(&mut *cache);
        for event in events
            .iter()
            .filter(|event| event.action != EventType::Delete)
        {
            let key = event.key();
            if cache.contains_key(&key) {
                continue;
            }
            if let Some(existing) = previous.remove(&key) {
                cache.insert(key, existing);
            } else if let Some(invoker) = self.refer(&event.service) {
                cache.insert(key, invoker);
            }
        }
        for stale in previous.into_values() {
            stale.destroy();
        }
        self.publish(&cache);
        drop(cache);
        done();
    }
}

impl Node for RegistryDirectory {
    fn url(&self) -> Arc<ServiceUrl> {
        Arc::clone(&self.url)
    }

    fn is_available(&self) -> bool {
        !self.is_destroyed()
            && self
                .chain
                .invokers()
                .iter()
                .any(|invoker| invoker.is_available())
    }

    fn destroy(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(listener) = self.listener() {
            if let Err(err) = self.registry.unsubscribe(&self.consumer_url, &listener) {
                warn!(error = %err, "failed to unsubscribe registry directory");
            }
        }
        let invokers = std::mem::take(&mut *self.cache.lock());
        for invoker in invokers.into_values() {
            invoker.destroy();
        }
        self.chain.set_invokers(Vec::new());
        info!(url = %self.url, "registry directory destroyed");
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Directory for RegistryDirectory {
    fn list(&self, invocation: &RpcInvocation) -> Vec<SharedInvoker> {
        if self.is_destroyed() {
            return Vec::new();
        }
        self.chain.route(&self.consumer_url, invocation)
    }

    fn consumer_url(&self) -> Arc<ServiceUrl> {
        Arc::clone(&self.consumer_url)
    }
}
