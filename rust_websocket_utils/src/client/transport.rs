// rust_websocket_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层核心逻辑。
//!
//! 提供建立与设备端的连接、发送原始文本帧、逐个接收文本帧以及优雅关闭的能力。
//! 入站帧以原始文本交给调用方，结构化解码在 `crate::message` 中完成。

use std::time::Duration;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use log::{debug, error, info, warn};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    tungstenite::Error as TungsteniteError,
    WebSocketStream,
};
use url::Url;

use crate::error::WsError;

/// `ClientWsStream` 类型别名，代表一个可能经过 TLS 加密的 TCP WebSocket 流。
pub type ClientWsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 一个活动的客户端 WebSocket 连接，拆分为发送端与接收端。
pub struct ClientConnection {
    /// 向设备端发送消息的 `Sink`。
    pub ws_sender: SplitSink<ClientWsStream, Message>,
    /// 从设备端接收消息的 `Stream`。
    pub ws_receiver: SplitStream<ClientWsStream>,
}

impl ClientConnection {
    /// 发送一个文本帧。文本按原样上线，不做任何包装。
    pub async fn send_text(&mut self, text: &str) -> Result<(), WsError> {
        debug!("客户端：准备发送文本帧: {}", text);
        self.ws_sender.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// 接收下一个文本帧，参见 [`receive_text`]。
    pub async fn receive_text(&mut self) -> Option<Result<String, WsError>> {
        receive_text(&mut self.ws_receiver).await
    }

    /// 发送 Close 帧并冲刷发送端。对一个已经关闭的连接调用是无害的。
    pub async fn close(&mut self) -> Result<(), WsError> {
        match self.ws_sender.close().await {
            Ok(()) => Ok(()),
            Err(TungsteniteError::ConnectionClosed) | Err(TungsteniteError::AlreadyClosed) => Ok(()),
            Err(e) => Err(WsError::WebSocketProtocolError(e)),
        }
    }
}

/// 解析并校验一个 WebSocket URL，只接受 `ws` 与 `wss` 两种 scheme。
pub fn parse_ws_url(url_str: &str) -> Result<Url, WsError> {
    let parsed = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(WsError::InvalidUrl(format!(
            "WebSocket URL '{}' 的 scheme 必须是 ws 或 wss，实际为 '{}'",
            url_str, other
        ))),
    }
}

/// 异步连接到指定的 WebSocket 端点，握手必须在 `connect_timeout` 内完成。
///
/// # Returns
/// * `Ok(ClientConnection)`: 握手成功。
/// * `Err(WsError::InvalidUrl)`: URL 无法解析。
/// * `Err(WsError::ConnectionTimeout)`: 超时。
/// * `Err(WsError::WebSocketProtocolError)`: TCP 连接或握手失败。
pub async fn connect_client(url_str: &str, connect_timeout: Duration) -> Result<ClientConnection, WsError> {
    info!("客户端：开始尝试连接到 WebSocket 端点，URL: {}", url_str);
    let parsed_url = parse_ws_url(url_str)?;

    match tokio::time::timeout(connect_timeout, connect_async(parsed_url.as_str())).await {
        Ok(Ok((ws_stream, response))) => {
            info!("客户端：已成功连接到 {} (HTTP 状态码: {})", url_str, response.status());
            debug!("客户端：WebSocket 连接响应头: {:?}", response.headers());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Ok(Err(e)) => {
            error!("客户端：连接到 {} 失败，错误: {}", url_str, e);
            Err(WsError::WebSocketProtocolError(e))
        }
        Err(_) => {
            error!("客户端：连接到 {} 超时 ({:?})", url_str, connect_timeout);
            Err(WsError::ConnectionTimeout)
        }
    }
}

/// 从接收流中取出下一个文本帧。
///
/// Ping/Pong 由 `tokio-tungstenite` 自动应答，这里直接跳过。
/// 二进制帧按文本交付（部分固件用二进制帧发送 JSON），不是合法 UTF-8 时做有损转换。
///
/// # Returns
/// * `Some(Ok(text))`: 收到一个文本帧。
/// * `Some(Err(e))`: 传输层错误。调用方应把随后的流结束视为关闭。
/// * `None`: 连接已关闭（Close 帧或流结束）。
pub async fn receive_text(ws_receiver: &mut SplitStream<ClientWsStream>) -> Option<Result<String, WsError>> {
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("客户端：收到原始文本帧: '{}'", text);
                break Some(Ok(text));
            }
            Some(Ok(Message::Binary(bin))) => {
                // 畸形帧不能让连接出错：非法字节替换为 U+FFFD 后按文本交付
                let text = match String::from_utf8(bin) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("客户端：二进制帧不是合法的 UTF-8 ({} 字节)，按有损文本交付", e.as_bytes().len());
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    }
                };
                debug!("客户端：收到二进制帧: '{}'", text);
                break Some(Ok(text));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                // 控制帧，继续等待业务帧
            }
            Some(Ok(Message::Close(close_frame))) => {
                debug!("客户端：收到 Close 控制帧: {:?}", close_frame);
                break None;
            }
            Some(Err(TungsteniteError::ConnectionClosed)) | Some(Err(TungsteniteError::AlreadyClosed)) => {
                debug!("客户端：连接已关闭 (ConnectionClosed/AlreadyClosed)。");
                break None;
            }
            Some(Err(e)) => {
                error!("客户端：从 WebSocket 流接收消息时发生底层错误: {}", e);
                break Some(Err(WsError::WebSocketProtocolError(e)));
            }
            None => {
                debug!("客户端：WebSocket 接收流已结束。");
                break None;
            }
        }
    }
}
