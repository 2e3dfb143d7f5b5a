use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    protocol::{Invoker, Node, SharedInvoker},
    url::ServiceUrl,
};

/// 不健康调用器登记表，以 [`ServiceUrl::key`] 为键。
///
/// 选择算法在候选不可用时登记；`recover` 摘除已恢复可用、已销毁或已被释放的条目。
/// 登记表只持有弱引用，不会延长调用器的生命周期。该表随运行时实例存在，
/// 同一进程内的多个运行时互不影响。
#[derive(Default)]
pub struct UnhealthyInvokers {
    entries: DashMap<String, Weak<dyn Invoker>>,
}

impl UnhealthyInvokers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, invoker: &SharedInvoker) {
        let key = invoker.url().key();
        debug!(%key, "invoker marked unhealthy");
        self.entries.insert(key, Arc::downgrade(invoker));
    }

    pub fn is_unhealthy(&self, url: &ServiceUrl) -> bool {
        self.entries.contains_key(&url.key())
    }

    /// 摘除已恢复可用、已销毁或已释放的调用器，返回摘除数量。
    pub fn recover(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, invoker| {
            invoker
                .upgrade()
                .is_some_and(|invoker| !invoker.is_destroyed() && !invoker.is_available())
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
