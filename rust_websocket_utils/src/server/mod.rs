// rust_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! 设备端真正的服务器运行在 ESP32 固件里；这里的 `transport` 只是一个最小化的
//! 监听/握手循环，用来在集成测试和本地调试中模拟设备端 (`/ws`)。

pub mod transport;
