use std::sync::Arc;

use dashmap::DashMap;

use super::build_invoker_chain;
use crate::{
    constant::{REFERENCE_FILTER_KEY, SERVICE_FILTER_KEY},
    error::RpcError,
    extension::ExtensionRegistry,
    protocol::{Protocol, SharedExporter, SharedInvoker, SharedProtocol},
    url::ServiceUrl,
};

/// 过滤包装协议。
///
/// 按地址的协议标签在首次使用时解析具体传输协议并缓存；
/// `export` 先套提供方过滤链再导出，`refer` 先引用再套消费方过滤链。
pub struct ProtocolFilterWrapper {
    extensions: Arc<ExtensionRegistry>,
    resolved: DashMap<String, SharedProtocol>,
}

impl ProtocolFilterWrapper {
    pub fn new(extensions: Arc<ExtensionRegistry>) -> Self {
        Self {
            extensions,
            resolved: DashMap::new(),
        }
    }

    fn protocol_for(&self, url: &ServiceUrl) -> Result<SharedProtocol, RpcError> {
        if let Some(protocol) = self.resolved.get(url.protocol()) {
            return Ok(Arc::clone(protocol.value()));
        }
        let protocol = self.extensions.protocol(url.protocol())?;
        Ok(Arc::clone(
            self.resolved
                .entry(url.protocol().to_owned())
                .or_insert(protocol)
                .value(),
        ))
    }
}

impl Protocol for ProtocolFilterWrapper {
    fn export(&self, invoker: SharedInvoker) -> Result<SharedExporter, RpcError> {
        let protocol = self.protocol_for(&invoker.url())?;
        let chained = build_invoker_chain(invoker, SERVICE_FILTER_KEY, &self.extensions)?;
        protocol.export(chained)
    }

    fn refer(&self, url: Arc<ServiceUrl>) -> Result<SharedInvoker, RpcError> {
        let protocol = self.protocol_for(&url)?;
        let invoker = protocol.refer(url)?;
        build_invoker_chain(invoker, REFERENCE_FILTER_KEY, &self.extensions)
    }

    fn destroy(&self) {
        let protocols: Vec<SharedProtocol> = self
            .resolved
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.resolved.clear();
        for protocol in protocols {
            protocol.destroy();
        }
    }
}
