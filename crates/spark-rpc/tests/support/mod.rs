//! 集成测试共用的桩实现。
#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use spark_rpc::{
    CallContext, ExtensionRegistry, PipelineConfig, RpcInvocation, RpcResult, ServiceUrl,
    filter::Filter,
    protocol::{Invoker, Node, SharedInvoker},
};

/// 记录调用次数、可切换可用性的桩调用器。
pub struct CountingInvoker {
    url: Arc<ServiceUrl>,
    available: AtomicBool,
    destroyed: AtomicBool,
    calls: AtomicUsize,
    reply: Value,
}

impl CountingInvoker {
    pub fn new(url: ServiceUrl) -> Arc<Self> {
        let reply = Value::String(url.location());
        Arc::new(Self {
            url: Arc::new(url),
            available: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            reply,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Node for CountingInvoker {
    fn url(&self) -> Arc<ServiceUrl> {
        Arc::clone(&self.url)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst) && !self.is_destroyed()
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn is_destroyed(&self) -> bool {
        CountingInvoker::is_destroyed(self)
    }
}

#[async_trait]
impl Invoker for CountingInvoker {
    async fn invoke(&self, _ctx: &CallContext, _invocation: &RpcInvocation) -> RpcResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        RpcResult::from_value(self.reply.clone())
    }
}

/// `Echo` 服务的提供方地址。
pub fn echo_url(port: u16) -> ServiceUrl {
    ServiceUrl::new("injvm", "127.0.0.1", Some(port))
        .with_path("Echo")
        .with_param("interface", "Echo")
}

/// 带权重的 `Echo` 桩调用器。
pub fn weighted(port: u16, weight: i64) -> Arc<CountingInvoker> {
    CountingInvoker::new(echo_url(port).with_param("weight", weight.to_string()))
}

pub fn shared(invoker: &Arc<CountingInvoker>) -> SharedInvoker {
    let shared: SharedInvoker = Arc::clone(invoker) as SharedInvoker;
    shared
}

/// 缺省扩展登记表。
pub fn extensions() -> Arc<ExtensionRegistry> {
    extensions_with(PipelineConfig::default())
}

pub fn extensions_with(config: PipelineConfig) -> Arc<ExtensionRegistry> {
    Arc::new(ExtensionRegistry::with_defaults(config).expect("缺省扩展登记应成功"))
}

/// 把名称写入共享日志后放行的过滤器。
pub struct RecordingFilter {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingFilter {
    pub fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self { name, log })
    }
}

#[async_trait]
impl Filter for RecordingFilter {
    async fn invoke(
        &self,
        ctx: &CallContext,
        next: &SharedInvoker,
        invocation: &RpcInvocation,
    ) -> RpcResult {
        self.log.lock().push(format!("{}:before", self.name));
        next.invoke(ctx, invocation).await
    }

    async fn on_response(
        &self,
        _ctx: &CallContext,
        result: RpcResult,
        _invoker: &SharedInvoker,
        _invocation: &RpcInvocation,
    ) -> RpcResult {
        self.log.lock().push(format!("{}:after", self.name));
        result
    }
}
