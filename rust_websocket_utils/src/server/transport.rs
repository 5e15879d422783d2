// rust_websocket_utils/src/server/transport.rs

//! 服务端 WebSocket 监听、接受连接和握手逻辑。

use std::future::Future;
use std::net::SocketAddr;

use log::{error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::error::WsError;

/// `WsStream` 是一个类型别名，代表经过 WebSocket 握手后的 TCP 流。
pub type WsStream = WebSocketStream<TcpStream>;

/// 已绑定监听地址、尚未开始接受连接的服务端。
pub struct ServerTransport {
    listener: TcpListener,
}

impl ServerTransport {
    /// 绑定监听地址。传入 `127.0.0.1:0` 时由系统分配端口，实际地址随返回值给出。
    pub async fn bind(addr: &str) -> Result<(Self, SocketAddr), WsError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket 服务端正在监听地址: {}", local_addr);
        Ok((Self { listener }, local_addr))
    }

    /// 接受连接循环。每个连接在独立的 Tokio 任务中完成握手并交给 `on_connect`。
    ///
    /// 单个连接的握手失败只记录日志，不会终止循环。
    pub async fn serve<F, Fut>(self, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(WsStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("与 {} 的 WebSocket 握手成功", peer_addr);
                                on_connect_callback(ws_stream, peer_addr).await;
                            }
                            Err(e) => {
                                error!("与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("接受 TCP 连接失败: {}。服务端将继续运行。", e);
                }
            }
        }
    }
}
