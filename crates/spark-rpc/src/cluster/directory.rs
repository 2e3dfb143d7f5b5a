//! 目录：某个逻辑服务的在线调用器集合。

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::debug;

use super::router::RouterChain;
use crate::{
    invocation::RpcInvocation,
    protocol::{Node, SharedInvoker},
    url::ServiceUrl,
};

/// 目录契约：`list` 返回经过路由链收窄后的候选。
pub trait Directory: Node {
    fn list(&self, invocation: &RpcInvocation) -> Vec<SharedInvoker>;

    /// 消费方地址：目录地址嵌套的子地址，没有时即目录地址本身。
    fn consumer_url(&self) -> Arc<ServiceUrl> {
        let url = self.url();
        url.sub_url().cloned().unwrap_or(url)
    }
}

pub type SharedDirectory = Arc<dyn Directory>;

/// 固定集合目录。
///
/// 集合保存在路由链快照中，`set_invokers` 原子整体替换；`destroy` 幂等并级联销毁每个调用器恰好一次。
pub struct StaticDirectory {
    url: Arc<ServiceUrl>,
    chain: RouterChain,
    destroyed: AtomicBool,
}

impl StaticDirectory {
    pub fn new(url: Arc<ServiceUrl>, invokers: Vec<SharedInvoker>) -> Self {
        Self::with_router_chain(url, invokers, RouterChain::default())
    }

    pub fn with_router_chain(
        url: Arc<ServiceUrl>,
        invokers: Vec<SharedInvoker>,
        chain: RouterChain,
    ) -> Self {
        chain.set_invokers(invokers);
        Self {
            url,
            chain,
            destroyed: AtomicBool::new(false),
        }
    }

    /// 以首个调用器的地址作为目录地址；集合为空时返回 `None`。
    pub fn from_invokers(invokers: Vec<SharedInvoker>) -> Option<Self> {
        let url = invokers.first()?.url();
        Some(Self::new(url, invokers))
    }

    /// 整体替换集合。目录已销毁时传入的调用器随即销毁，集合保持为空。
    pub fn set_invokers(&self, invokers: Vec<SharedInvoker>) {
        if self.is_destroyed() {
            for invoker in invokers {
                invoker.destroy();
            }
            return;
        }
        debug!(url = %self.url, count = invokers.len(), "static directory refreshed");
        self.chain.set_invokers(invokers);
        // 与 destroy 并发时，替换可能晚于清空落地。
        if self.is_destroyed() {
            self.drain();
        }
    }

    fn drain(&self) {
        for invoker in self.chain.invokers() {
            invoker.destroy();
        }
        self.chain.set_invokers(Vec::new());
    }

    pub fn router_chain(&self) -> &RouterChain {
        &self.chain
    }
}

impl Node for StaticDirectory {
    fn url(&self) -> Arc<ServiceUrl> {
        Arc::clone(&self.url)
    }

    fn is_available(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let invokers = self.chain.invokers();
        !invokers.is_empty() && invokers.iter().all(|invoker| invoker.is_available())
    }

    fn destroy(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.drain();
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Directory for StaticDirectory {
    fn list(&self, invocation: &RpcInvocation) -> Vec<SharedInvoker> {
        if self.is_destroyed() {
            return Vec::new();
        }
        self.chain.route(&self.url, invocation)
    }
}
