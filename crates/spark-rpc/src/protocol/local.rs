//! 进程内传输（`injvm`）。
//!
//! 导出键为 `service_key@host:port`，同一服务的多个提供方地址互不覆盖；
//! 引用端按相同的键在导出表中查找目标调用器，找不到即视为连接已关闭。
//! 同一调用器重复导出返回既有导出器；不同调用器以相同的键导出时，新导出器接管，旧导出器被卸载。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    BaseExporter, BaseInvoker, BaseProtocol, ExporterMap, Invoker, Node, Protocol,
    SharedExporter, SharedInvoker, same_invoker,
};
use crate::{
    context::CallContext, error::RpcError, invocation::RpcInvocation, result::RpcResult,
    url::ServiceUrl,
};

/// 进程内导出键。
pub fn local_key(url: &ServiceUrl) -> String {
    format!("{}@{}", url.service_key(), url.location())
}

#[derive(Default)]
pub struct LocalProtocol {
    base: BaseProtocol,
}

impl LocalProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前导出数量，供导出屏障轮询。
    pub fn exported_count(&self) -> usize {
        self.base.exported_count()
    }
}

impl Protocol for LocalProtocol {
    fn export(&self, invoker: SharedInvoker) -> Result<SharedExporter, RpcError> {
        let key = local_key(&invoker.url());
        if let Some(existing) = self.base.exporter(&key) {
            if same_invoker(&existing.invoker(), &invoker) {
                return Ok(existing);
            }
        }
        debug!(%key, "export local service");
        let exporter: SharedExporter = Arc::new(BaseExporter::new(
            key.clone(),
            invoker,
            Arc::clone(self.base.exporter_map()),
        ));
        // 同键重复导出时新导出器接管，旧导出器随即卸载。
        if let Some(previous) = self.base.set_exporter(key.clone(), Arc::clone(&exporter)) {
            warn!(%key, "local export replaced");
            previous.unexport();
        }
        Ok(exporter)
    }

    fn refer(&self, url: Arc<ServiceUrl>) -> Result<SharedInvoker, RpcError> {
        let invoker: SharedInvoker = Arc::new(LocalInvoker {
            base: BaseInvoker::new(url),
            exporters: Arc::clone(self.base.exporter_map()),
        });
        self.base.add_invoker(Arc::clone(&invoker));
        Ok(invoker)
    }

    fn destroy(&self) {
        self.base.destroy();
    }
}

/// 进程内引用端调用器。
pub struct LocalInvoker {
    base: BaseInvoker,
    exporters: ExporterMap,
}

impl Node for LocalInvoker {
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
impl Invoker for LocalInvoker {
    async fn invoke(&self, ctx: &CallContext, invocation: &RpcInvocation) -> RpcResult {
        if self.base.is_destroyed() {
            return RpcResult::from_error(RpcError::DestroyedInvoker {
                url: self.base.url().to_string(),
            });
        }
        let target = self
            .exporters
            .get(&local_key(&self.base.url()))
            .map(|entry| entry.value().invoker());
        let Some(target) = target else {
            return RpcResult::from_error(RpcError::ClientClosed);
        };

        let result = target.invoke(ctx, invocation).await;
        if let (Some(slot), Some(value)) = (invocation.reply(), result.value()) {
            slot.fill(value.clone());
        }
        result
    }
}
