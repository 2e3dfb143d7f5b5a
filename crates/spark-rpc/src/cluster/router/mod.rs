//! # 路由链
//!
//! ## 契约（What）
//! - [`Router`] 是按调用上下文收窄候选列表的纯函数，只缩小、不扩大输入；
//! - [`RouterChain`] 同时持有候选调用器集合与路由器序列，二者打包为一份不可变快照，
//!   通过 `ArcSwap` 整体替换：一次路由过程只会看到同一代的调用器与路由器；
//! - 路由器按优先级升序执行，同优先级保持加入顺序（稳定排序）。
//!
//! ## 执行（How）
//! - `route`：读取快照 → 保留服务键与消费方一致的调用器（无一致时回落到全集）→ 依序交给各路由器；
//! - `set_invokers` / `add_routers`：写路径由互斥锁串行化，构造新快照后原子替换，并通知路由器；
//! - 每次替换递增 `generation`，便于观察刷新进度。

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::{
    error::RpcError, invocation::RpcInvocation, protocol::SharedInvoker, url::ServiceUrl,
};

mod tag;

pub use tag::{TAG_ROUTER_PRIORITY, TagRouter, TagRouterFactory};

/// 候选收窄器。
pub trait Router: Send + Sync {
    /// 收窄候选列表；返回值必须是输入的子序列。
    fn route(
        &self,
        invokers: Vec<SharedInvoker>,
        url: &ServiceUrl,
        invocation: &RpcInvocation,
    ) -> Vec<SharedInvoker>;

    /// 数值越小越先执行。
    fn priority(&self) -> i64;

    /// 路由规则来源地址。
    fn url(&self) -> Option<Arc<ServiceUrl>> {
        None
    }

    /// 候选集合整体替换后的回调，供有状态路由器重算。
    fn notify(&self, _invokers: &[SharedInvoker]) {}
}

pub type SharedRouter = Arc<dyn Router>;

/// 路由器工厂：以消费方地址构造路由器实例。
pub trait RouterFactory: Send + Sync {
    fn new_router(&self, url: &Arc<ServiceUrl>) -> Result<SharedRouter, RpcError>;
}

pub type SharedRouterFactory = Arc<dyn RouterFactory>;

struct ChainSnapshot {
    invokers: Vec<SharedInvoker>,
    routers: Vec<SharedRouter>,
}

/// 路由链。
pub struct RouterChain {
    snapshot: ArcSwap<ChainSnapshot>,
    builtin: Vec<SharedRouter>,
    writer: Mutex<()>,
    generation: AtomicU64,
}

impl RouterChain {
    /// 以内置路由器构造空候选的链。
    pub fn new(builtin: Vec<SharedRouter>) -> Self {
        let routers = sorted(builtin.clone());
        Self {
            snapshot: ArcSwap::from_pointee(ChainSnapshot {
                invokers: Vec::new(),
                routers,
            }),
            builtin,
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// 由工厂列表构造内置路由器。
    pub fn from_factories(
        url: &Arc<ServiceUrl>,
        factories: &[(String, SharedRouterFactory)],
    ) -> Result<Self, RpcError> {
        let builtin = factories
            .iter()
            .map(|(_, factory)| factory.new_router(url))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(builtin))
    }

    /// 对当前快照执行路由。
    pub fn route(&self, url: &ServiceUrl, invocation: &RpcInvocation) -> Vec<SharedInvoker> {
        let snapshot = self.snapshot.load_full();
        let service_key = url.service_key();
        let mut candidates: Vec<SharedInvoker> = snapshot
            .invokers
            .iter()
            .filter(|invoker| invoker.url().service_key() == service_key)
            .cloned()
            .collect();
        if candidates.is_empty() {
            candidates = snapshot.invokers.clone();
        }
        for router in &snapshot.routers {
            candidates = router.route(candidates, url, invocation);
        }
        candidates
    }

    /// 整体替换候选集合并通知每个路由器。
    pub fn set_invokers(&self, invokers: Vec<SharedInvoker>) {
        let _guard = self.writer.lock();
        let routers = self.snapshot.load().routers.clone();
        for router in &routers {
            router.notify(&invokers);
        }
        self.snapshot
            .store(Arc::new(ChainSnapshot { invokers, routers }));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// 以“内置 + 新增”重建路由器序列。
    pub fn add_routers(&self, routers: Vec<SharedRouter>) {
        let _guard = self.writer.lock();
        let invokers = self.snapshot.load().invokers.clone();
        for router in &routers {
            router.notify(&invokers);
        }
        let mut merged = self.builtin.clone();
        merged.extend(routers);
        self.snapshot.store(Arc::new(ChainSnapshot {
            invokers,
            routers: sorted(merged),
        }));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// 当前候选集合（未经路由）。
    pub fn invokers(&self) -> Vec<SharedInvoker> {
        self.snapshot.load().invokers.clone()
    }

    pub fn routers(&self) -> Vec<SharedRouter> {
        self.snapshot.load().routers.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for RouterChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn sorted(mut routers: Vec<SharedRouter>) -> Vec<SharedRouter> {
    routers.sort_by_key(|router| router.priority());
    routers
}
