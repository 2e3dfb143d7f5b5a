//! # 扩展登记表
//!
//! ## 契约（What）
//! - 以名称登记协议、注册中心工厂、负载均衡、过滤器、路由器工厂、集群策略、代理工厂与集群拦截器；
//! - 同名重复登记返回 [`RpcError::DuplicateExtension`]，查找未知名称返回 [`RpcError::ExtensionNotFound`]；
//! - 登记表随运行时实例构造与销毁，需要查找能力的组件通过 `Arc<ExtensionRegistry>` 显式持有，
//!   同一进程可以并存多个互不干扰的运行时。
//!
//! ## 缺省内容（How）
//! [`ExtensionRegistry::with_defaults`] 预置：`roundrobin` 负载均衡、`failfast` 集群、`default` 代理工厂、
//! `injvm` 进程内协议、`memory` 注册中心工厂、`tag` 路由器工厂。

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    cluster::{
        FailfastCluster, RoundRobinLoadBalance, SharedCluster, SharedClusterInterceptor,
        SharedLoadBalance, UnhealthyInvokers,
        router::{SharedRouterFactory, TagRouterFactory},
    },
    config::PipelineConfig,
    constant::{DEFAULT_CLUSTER, DEFAULT_LOADBALANCE, DEFAULT_PROXY_FACTORY, LOCAL_PROTOCOL},
    error::RpcError,
    filter::SharedFilter,
    protocol::{LocalProtocol, SharedProtocol},
    proxy::{DefaultProxyFactory, ServiceMap, SharedProxyFactory},
    registry::{MemoryRegistryFactory, SharedRegistryFactory},
};

/// 名称 → 实例的有序表。
struct Named<V> {
    kind: &'static str,
    entries: RwLock<BTreeMap<String, V>>,
}

impl<V: Clone> Named<V> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn register(&self, name: impl Into<String>, value: V) -> Result<(), RpcError> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(RpcError::DuplicateExtension {
                kind: self.kind,
                name,
            });
        }
        debug!(kind = self.kind, %name, "extension registered");
        entries.insert(name, value);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<V, RpcError> {
        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::not_found(self.kind, name))
    }

    fn values(&self) -> Vec<V> {
        self.entries.read().values().cloned().collect()
    }

    fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

/// 运行时扩展登记表。
pub struct ExtensionRegistry {
    config: PipelineConfig,
    protocols: Named<SharedProtocol>,
    registry_factories: Named<SharedRegistryFactory>,
    load_balances: Named<SharedLoadBalance>,
    filters: Named<SharedFilter>,
    router_factories: RwLock<Vec<(String, SharedRouterFactory)>>,
    clusters: Named<SharedCluster>,
    proxy_factories: Named<SharedProxyFactory>,
    cluster_interceptors: RwLock<Vec<SharedClusterInterceptor>>,
    services: Arc<ServiceMap>,
    unhealthy: Arc<UnhealthyInvokers>,
}

impl ExtensionRegistry {
    /// 空登记表。
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            protocols: Named::new("protocol"),
            registry_factories: Named::new("registry"),
            load_balances: Named::new("loadbalance"),
            filters: Named::new("filter"),
            router_factories: RwLock::new(Vec::new()),
            clusters: Named::new("cluster"),
            proxy_factories: Named::new("proxy_factory"),
            cluster_interceptors: RwLock::new(Vec::new()),
            services: Arc::new(ServiceMap::new()),
            unhealthy: Arc::new(UnhealthyInvokers::new()),
        }
    }

    /// 预置缺省扩展的登记表。
    pub fn with_defaults(config: PipelineConfig) -> Result<Self, RpcError> {
        config.validate()?;
        let registry = Self::new(config);
        let recycle = registry.config.weight_recycle_period;
        registry.register_load_balance(
            DEFAULT_LOADBALANCE,
            Arc::new(RoundRobinLoadBalance::new(recycle)),
        )?;
        registry.register_cluster(DEFAULT_CLUSTER, Arc::new(FailfastCluster))?;
        registry.register_proxy_factory(
            DEFAULT_PROXY_FACTORY,
            Arc::new(DefaultProxyFactory::new(Arc::clone(&registry.services))),
        )?;
        registry.register_protocol(LOCAL_PROTOCOL, Arc::new(LocalProtocol::new()))?;
        registry.register_registry_factory("memory", Arc::new(MemoryRegistryFactory::new()))?;
        registry.register_router_factory("tag", Arc::new(TagRouterFactory))?;
        Ok(registry)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn services(&self) -> &Arc<ServiceMap> {
        &self.services
    }

    pub fn unhealthy(&self) -> &Arc<UnhealthyInvokers> {
        &self.unhealthy
    }

    pub fn register_protocol(
        &self,
        name: impl Into<String>,
        protocol: SharedProtocol,
    ) -> Result<(), RpcError> {
        self.protocols.register(name, protocol)
    }

    pub fn protocol(&self, name: &str) -> Result<SharedProtocol, RpcError> {
        self.protocols.get(name)
    }

    pub fn register_registry_factory(
        &self,
        name: impl Into<String>,
        factory: SharedRegistryFactory,
    ) -> Result<(), RpcError> {
        self.registry_factories.register(name, factory)
    }

    pub fn registry_factory(&self, name: &str) -> Result<SharedRegistryFactory, RpcError> {
        self.registry_factories.get(name)
    }

    pub fn register_load_balance(
        &self,
        name: impl Into<String>,
        load_balance: SharedLoadBalance,
    ) -> Result<(), RpcError> {
        self.load_balances.register(name, load_balance)
    }

    pub fn load_balance(&self, name: &str) -> Result<SharedLoadBalance, RpcError> {
        self.load_balances.get(name)
    }

    pub fn register_filter(
        &self,
        name: impl Into<String>,
        filter: SharedFilter,
    ) -> Result<(), RpcError> {
        self.filters.register(name, filter)
    }

    pub fn filter(&self, name: &str) -> Result<SharedFilter, RpcError> {
        self.filters.get(name)
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.names()
    }

    /// 路由器工厂按登记顺序保存。
    pub fn register_router_factory(
        &self,
        name: impl Into<String>,
        factory: SharedRouterFactory,
    ) -> Result<(), RpcError> {
        let name = name.into();
        let mut factories = self.router_factories.write();
        if factories.iter().any(|(existing, _)| *existing == name) {
            return Err(RpcError::DuplicateExtension {
                kind: "router",
                name,
            });
        }
        factories.push((name, factory));
        Ok(())
    }

    pub fn router_factories(&self) -> Vec<(String, SharedRouterFactory)> {
        self.router_factories.read().clone()
    }

    pub fn register_cluster(
        &self,
        name: impl Into<String>,
        cluster: SharedCluster,
    ) -> Result<(), RpcError> {
        self.clusters.register(name, cluster)
    }

    pub fn cluster(&self, name: &str) -> Result<SharedCluster, RpcError> {
        self.clusters.get(name)
    }

    pub fn register_proxy_factory(
        &self,
        name: impl Into<String>,
        factory: SharedProxyFactory,
    ) -> Result<(), RpcError> {
        self.proxy_factories.register(name, factory)
    }

    pub fn proxy_factory(&self, name: &str) -> Result<SharedProxyFactory, RpcError> {
        self.proxy_factories.get(name)
    }

    /// 按配置的缺省名称取代理工厂。
    pub fn default_proxy_factory(&self) -> Result<SharedProxyFactory, RpcError> {
        self.proxy_factory(&self.config.default_proxy_factory)
    }

    /// 集群拦截器按登记顺序由外到内执行。
    pub fn add_cluster_interceptor(&self, interceptor: SharedClusterInterceptor) {
        self.cluster_interceptors.write().push(interceptor);
    }

    pub fn cluster_interceptors(&self) -> Vec<SharedClusterInterceptor> {
        self.cluster_interceptors.read().clone()
    }

    /// 销毁全部已登记协议。
    pub fn destroy(&self) {
        for protocol in self.protocols.values() {
            protocol.destroy();
        }
    }
}
