//! # proxy 模块
//!
//! - 提供方：[`ProxyFactory::get_invoker`] 把服务登记表中的业务对象包装为本地调用器；
//! - 消费方：[`ServiceProxy`] 以方法名与实参驱动任意调用器，并补齐服务身份附件。

use std::sync::Arc;

use serde_json::Value;

use crate::{
    constant::{GROUP_KEY, INTERFACE_KEY, VERSION_KEY},
    context::CallContext,
    invocation::{PATH_ATTACHMENT, RpcInvocation},
    protocol::SharedInvoker,
    result::RpcResult,
    url::ServiceUrl,
};

mod factory;
mod service;

pub use factory::{DefaultProxyFactory, ProxyInvoker};
pub use service::{
    MethodCall, MethodDescriptor, MethodOutcome, ParamType, ReturnType, ServiceDefinition,
    ServiceMap,
};

pub trait ProxyFactory: Send + Sync {
    fn get_invoker(&self, url: Arc<ServiceUrl>) -> SharedInvoker;
}

pub type SharedProxyFactory = Arc<dyn ProxyFactory>;

/// 消费方代理。
pub struct ServiceProxy {
    invoker: SharedInvoker,
    url: Arc<ServiceUrl>,
}

impl ServiceProxy {
    /// `url` 为消费方地址，用于生成 `path`/`interface`/`group`/`version` 附件。
    pub fn new(invoker: SharedInvoker, url: Arc<ServiceUrl>) -> Self {
        Self { invoker, url }
    }

    pub fn invoker(&self) -> &SharedInvoker {
        &self.invoker
    }

    /// 构造携带服务身份附件的调用。
    pub fn invocation(&self, method: &str, arguments: Vec<Value>) -> RpcInvocation {
        let invocation = RpcInvocation::new(method, arguments)
            .with_attachment(PATH_ATTACHMENT, self.url.path().to_owned())
            .with_attachment(INTERFACE_KEY, self.url.service());
        let group = self.url.group();
        if !group.is_empty() {
            invocation.set_attachment(GROUP_KEY, group);
        }
        let version = self.url.version();
        if !version.is_empty() {
            invocation.set_attachment(VERSION_KEY, version);
        }
        invocation
    }

    pub async fn call(&self, ctx: &CallContext, method: &str, arguments: Vec<Value>) -> RpcResult {
        let invocation = self.invocation(method, arguments);
        self.invoker.invoke(ctx, &invocation).await
    }
}
