// rust_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! `transport` 子模块封装 `tokio-tungstenite` 的细节：连接设备端、发送文本帧、
//! 接收文本帧并跳过控制帧、优雅关闭。它不做重连，也不理解帧的含义，
//! 这些由上层的连接管理器负责。

pub mod transport;
