use application::{Gateway, Hub};

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub gateway: Gateway,
    /// 传输层允许的最大帧，超过 hub 限制但未超过这里的帧按协议错误回报
    pub max_frame_bytes: usize,
}

impl AppState {
    pub fn new(gateway: Gateway, max_message_bytes: usize) -> Self {
        Self {
            hub: gateway.hub().clone(),
            gateway,
            max_frame_bytes: max_message_bytes.saturating_mul(4),
        }
    }
}
