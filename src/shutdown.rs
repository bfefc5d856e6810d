use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// 控制平面的关闭信号
///
/// 每个组件循环持有一个接收器；信号只广播一次，之后的订阅者立即就绪。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_shutdown() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.sender.subscribe()
    }

    /// 广播关闭信号，只有第一次调用生效并返回 true
    pub fn shutdown(&self, reason: &str) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("忽略重复的关闭请求: {}", reason);
            return false;
        }

        info!(
            subscribers = self.sender.receiver_count(),
            "触发控制平面关闭: {}", reason
        );
        let _ = self.sender.send(());
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
