//! 调用器、导出器与协议的公共骨架。

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Exporter, SharedExporter, SharedInvoker};
use crate::url::ServiceUrl;

/// 调用器的地址与生命周期标志。
///
/// # 契约（What）
/// - `available` 只会由 `true` 变为 `false`，`destroyed` 只会由 `false` 变为 `true`；
/// - [`BaseInvoker::destroy`] 通过 CAS 保证只有第一次调用生效并返回 `true`，
///   具体调用器据此决定是否释放自身持有的资源（例如关闭连接）。
#[derive(Debug)]
pub struct BaseInvoker {
    url: Arc<ServiceUrl>,
    available: AtomicBool,
    destroyed: AtomicBool,
}

impl BaseInvoker {
    pub fn new(url: Arc<ServiceUrl>) -> Self {
        Self {
            url,
            available: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> Arc<ServiceUrl> {
        Arc::clone(&self.url)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 标记为不可用；不可逆。
    pub fn mark_unavailable(&self) {
        self.available.store(false, Ordering::Release);
    }

    /// 销毁；返回本次调用是否为首次销毁。
    pub fn destroy(&self) -> bool {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.available.store(false, Ordering::Release);
        debug!(url = %self.url, "invoker destroyed");
        true
    }
}

/// 协议内共享的导出表：导出键 → 导出器。
pub type ExporterMap = Arc<DashMap<String, SharedExporter>>;

/// 通用导出器：卸载时销毁调用器并从导出表摘除自身。
///
/// 摘除按身份进行：同键下已换成其他导出器时，旧导出器的卸载不会波及新导出器。
pub struct BaseExporter {
    key: String,
    invoker: SharedInvoker,
    exporters: ExporterMap,
    unexported: AtomicBool,
}

impl BaseExporter {
    pub fn new(key: impl Into<String>, invoker: SharedInvoker, exporters: ExporterMap) -> Self {
        Self {
            key: key.into(),
            invoker,
            exporters,
            unexported: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Exporter for BaseExporter {
    fn invoker(&self) -> SharedInvoker {
        Arc::clone(&self.invoker)
    }

    fn unexport(&self) {
        if self
            .unexported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!(key = %self.key, "unexport service");
        self.invoker.destroy();
        self.exporters.remove_if(&self.key, |_, current| {
            std::ptr::addr_eq(Arc::as_ptr(current), self as *const Self)
        });
    }
}

/// 协议骨架：导出表与已引用调用器列表。
#[derive(Default)]
pub struct BaseProtocol {
    exporters: ExporterMap,
    invokers: Mutex<Vec<SharedInvoker>>,
}

impl BaseProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exporter_map(&self) -> &ExporterMap {
        &self.exporters
    }

    /// 登记导出器，返回同键下被替换的旧导出器。
    pub fn set_exporter(
        &self,
        key: impl Into<String>,
        exporter: SharedExporter,
    ) -> Option<SharedExporter> {
        self.exporters.insert(key.into(), exporter)
    }

    pub fn exporter(&self, key: &str) -> Option<SharedExporter> {
        self.exporters.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn exported_count(&self) -> usize {
        self.exporters.len()
    }

    pub fn add_invoker(&self, invoker: SharedInvoker) {
        self.invokers.lock().push(invoker);
    }

    pub fn invokers(&self) -> Vec<SharedInvoker> {
        self.invokers.lock().clone()
    }

    /// 销毁全部引用并卸载全部导出。
    pub fn destroy(&self) {
        let invokers = std::mem::take(&mut *self.invokers.lock());
        for invoker in invokers {
            invoker.destroy();
        }
        // 卸载会回写导出表，先摘出快照再逐个处理。
        let exporters: Vec<SharedExporter> = self
            .exporters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for exporter in exporters {
            exporter.unexport();
        }
        self.exporters.clear();
    }
}
