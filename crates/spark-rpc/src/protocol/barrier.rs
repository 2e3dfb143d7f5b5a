use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::RpcError;

/// 等待导出数量达到 `expected`。
///
/// # 契约（What）
/// - 每隔 `poll` 调用一次 `exported` 读取当前导出数量，达到期望即返回 `Ok(())`；
/// - 超过 `timeout` 仍未达到时返回 [`RpcError::ExportTimeout`]，宿主应据此终止启动流程；
/// - 函数本身不会终止进程。
pub async fn wait_for_exports(
    expected: usize,
    exported: impl Fn() -> usize,
    poll: Duration,
    timeout: Duration,
) -> Result<(), RpcError> {
    let started = Instant::now();
    loop {
        let count = exported();
        if count >= expected {
            debug!(expected, count, "all services exported");
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= timeout {
            warn!(expected, count, ?waited, "services not exported in time");
            return Err(RpcError::ExportTimeout {
                expected,
                exported: count,
                waited,
            });
        }
        sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn returns_once_count_is_reached() {
        let count = Arc::new(AtomicUsize::new(0));
        let writer = Arc::clone(&count);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            writer.store(2, Ordering::Release);
        });
        wait_for_exports(
            2,
            || count.load(Ordering::Acquire),
            Duration::from_millis(5),
            Duration::from_secs(2),
        )
        .await
        .expect("导出完成前不应超时");
    }

    #[tokio::test]
    async fn times_out_with_fatal_error() {
        let err = wait_for_exports(1, || 0, Duration::from_millis(5), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, RpcError::ExportTimeout { expected: 1, exported: 0, .. }));
    }
}
