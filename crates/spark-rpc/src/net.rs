use std::{net::UdpSocket, sync::OnceLock};

static LOCAL_IP: OnceLock<String> = OnceLock::new();

/// 本机对外 IP，仅用于诊断信息。
///
/// 通过未发包的 UDP `connect` 让内核选择出口地址；失败时回落为回环地址。结果在进程内缓存。
pub fn local_ip() -> &'static str {
    LOCAL_IP.get_or_init(|| detect().unwrap_or_else(|| "127.0.0.1".to_owned()))
}

fn detect() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("10.255.255.255:1").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then(|| ip.to_string())
}
