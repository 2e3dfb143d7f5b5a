use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use super::{ProxyFactory, service::{MethodCall, ServiceMap}};
use crate::{
    context::CallContext,
    error::RpcError,
    invocation::RpcInvocation,
    protocol::{BaseInvoker, Invoker, Node, SharedInvoker},
    result::RpcResult,
    url::ServiceUrl,
};

/// 缺省代理工厂：从服务登记表分派。
pub struct DefaultProxyFactory {
    services: Arc<ServiceMap>,
}

impl DefaultProxyFactory {
    pub fn new(services: Arc<ServiceMap>) -> Self {
        Self { services }
    }
}

impl ProxyFactory for DefaultProxyFactory {
    fn get_invoker(&self, url: Arc<ServiceUrl>) -> SharedInvoker {
        Arc::new(ProxyInvoker {
            base: BaseInvoker::new(url),
            services: Arc::clone(&self.services),
        })
    }
}

/// 提供方本地调用器。
///
/// # 执行（How）
/// 1. 结果附件复制自请求附件；
/// 2. 目标地址取嵌套的提供方地址（注册中心导出时）或自身地址，按 `(协议, 服务键)` 查服务，再按方法名查方法；
/// 3. 校验实参后调用处理器；处理器 panic 被捕获并转为业务错误结果。
pub struct ProxyInvoker {
    base: BaseInvoker,
    services: Arc<ServiceMap>,
}

impl ProxyInvoker {
    async fn dispatch(
        &self,
        ctx: &CallContext,
        invocation: &RpcInvocation,
    ) -> Result<Option<serde_json::Value>, RpcError> {
        let url = self.base.url();
        if self.base.is_destroyed() {
            return Err(RpcError::DestroyedInvoker {
                url: url.to_string(),
            });
        }
        let target = url.sub_url().cloned().unwrap_or(url);
        let protocol = target.protocol();
        let service_key = target.service_key();
        let method_name = invocation.method_name();

        let service = self
            .services
            .get(protocol, &service_key)
            .ok_or_else(|| RpcError::ServiceNotFound {
                protocol: protocol.to_owned(),
                service_key: service_key.clone(),
            })?;
        let method = service
            .method(method_name)
            .cloned()
            .ok_or_else(|| RpcError::MethodNotFound {
                protocol: protocol.to_owned(),
                service_key: service_key.clone(),
                method: method_name.to_owned(),
            })?;

        let call = MethodCall {
            context: ctx.clone(),
            attachments: invocation.attachments(),
            arguments: method.prepare_arguments(invocation.arguments())?,
        };
        let running = async { method.call(call).await };
        match AssertUnwindSafe(running).catch_unwind().await {
            Ok(outcome) => outcome.map(|reply| method.normalize_reply(reply)),
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                warn!(method = %method_name, %service_key, %detail, "business method panicked");
                Err(RpcError::BusinessFault {
                    method: method_name.to_owned(),
                    detail,
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl Node for ProxyInvoker {
    fn url(&self) -> Arc<ServiceUrl> {
        self.base.url()
    }

    fn is_available(&self) -> bool {
        self.base.is_available()
    }

    fn destroy(&self) {
        self.base.destroy();
    }

    fn is_destroyed(&self) -> bool {
        self.base.is_destroyed()
    }
}

#[async_trait]
impl Invoker for ProxyInvoker {
    async fn invoke(&self, ctx: &CallContext, invocation: &RpcInvocation) -> RpcResult {
        RpcResult::from_outcome(self.dispatch(ctx, invocation).await)
            .with_attachments(invocation.attachments())
    }
}
