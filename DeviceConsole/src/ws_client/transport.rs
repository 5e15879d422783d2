// DeviceConsole/src/ws_client/transport.rs

//! 连接管理器与具体传输实现之间的接缝。
//!
//! 管理器只通过 `Connector` 建立连接、通过 `FrameTransport` 收发文本帧，
//! 因此既可以接真实的 `tokio-tungstenite` 客户端，也可以在测试中接脚本化的假连接。

use std::time::Duration;

use async_trait::async_trait;
use rust_websocket_utils::client::transport::{connect_client, ClientConnection};
use rust_websocket_utils::WsError;

/// 一条已经打开的文本帧连接。
#[async_trait]
pub trait FrameTransport: Send {
    /// 发送一个文本帧，文本原样上线。
    async fn send_text(&mut self, text: String) -> Result<(), WsError>;

    /// 等待下一个入站文本帧。`None` 表示连接已关闭。
    async fn next_frame(&mut self) -> Option<Result<String, WsError>>;

    /// 发起关闭握手。对已关闭的连接调用是无害的。
    async fn close(&mut self) -> Result<(), WsError>;
}

/// 打开新连接的工厂。
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameTransport>, WsError>;
}

#[async_trait]
impl FrameTransport for ClientConnection {
    async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        ClientConnection::send_text(self, &text).await
    }

    async fn next_frame(&mut self) -> Option<Result<String, WsError>> {
        self.receive_text().await
    }

    async fn close(&mut self) -> Result<(), WsError> {
        ClientConnection::close(self).await
    }
}

/// 基于 `tokio-tungstenite` 的默认连接器。
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameTransport>, WsError> {
        let connection = connect_client(url, self.connect_timeout).await?;
        Ok(Box::new(connection))
    }
}
