// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务器控制面
//!
//! `Server` 持有路由表与配置，负责监听端口并为每个连接调用分发器：
//! - `start`：绑定端口，成功后在后台运行接收循环，返回实际监听地址（支持端口 0）。
//! - `stop` / `shutdown`：通过 `watch` 通道通知接收循环退出，正在处理的请求不保证完成。
//! - `add_route` / `add_typed_route` / `debug`：注册阶段的链式调用。
//!
//! 每个连接只处理一个请求：读取原始报文，规范化，分发，序列化，写回，关闭。

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{Arc, Mutex},
    time::Instant,
};

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::watch,
    task::JoinHandle,
};

use crate::{
    config::Config,
    dispatcher::Dispatcher,
    exception::Exception,
    logger::{ConsoleLogger, Logger},
    request::{RawRequest, Request},
    response::Response,
    route::{Route, RouteTable},
    schema::SchemaCache,
    typed::TypedRoute,
};

pub struct Server {
    config: Config,
    logger: Arc<dyn Logger>,
    routes: RouteTable,
    debug: bool,
    schemas: Arc<SchemaCache>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
    active_connections: Arc<Mutex<u32>>,
}

impl Server {
    /// 未提供日志器时使用 `ConsoleLogger`
    pub fn new(config: Config, logger: Option<Arc<dyn Logger>>) -> Self {
        let logger = logger.unwrap_or_else(|| Arc::new(ConsoleLogger));
        Self {
            debug: config.debug(),
            config,
            logger,
            routes: RouteTable::new(),
            schemas: Arc::new(SchemaCache::new()),
            local_addr: None,
            shutdown: None,
            accept_task: None,
            active_connections: Arc::new(Mutex::new(0u32)),
        }
    }

    pub fn add_route(&mut self, route: Route) -> &mut Self {
        self.register(route)
    }

    pub fn add_typed_route<B>(&mut self, route: TypedRoute<B>) -> &mut Self
    where
        B: DeserializeOwned + Send + 'static,
    {
        self.register(route)
    }

    fn register(&mut self, route: impl Into<Route>) -> &mut Self {
        if self.is_running() {
            warn!("服务器已在运行，新注册的路由要到下次启动才会生效");
        }
        self.routes.push(route);
        self
    }

    /// 开关调试日志：原始请求、规范化后的请求以及分发结果
    pub fn debug(&mut self, enabled: bool) -> &mut Self {
        self.debug = enabled;
        self
    }

    /// 绑定端口并在后台开始接收连接，返回实际监听的地址。
    ///
    /// 路由表在此刻被快照，之后注册的路由对本次运行不可见。
    pub async fn start(&mut self) -> Result<SocketAddr, Exception> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_running()) {
            warn!("服务器已在{}上运行", addr);
            return Ok(addr);
        }

        let address = match self.config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        let socket = SocketAddrV4::new(address, self.config.port());
        let listener = TcpListener::bind(socket).await.map_err(|e| {
            error!("无法绑定地址：{}，错误：{}", socket, e);
            Exception::BindFailed(format!("{}: {}", socket, e))
        })?;
        let local_addr = listener.local_addr()?;
        info!("服务端将在{}上监听Socket连接", local_addr);

        let dispatcher = Arc::new(
            Dispatcher::new(self.routes.clone(), Arc::clone(&self.logger))
                .with_debug(self.debug)
                .with_error_format(self.config.error_format())
                .with_schema_cache(Arc::clone(&self.schemas)),
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            dispatcher,
            rx,
            Arc::clone(&self.active_connections),
        ));

        self.local_addr = Some(local_addr);
        self.shutdown = Some(tx);
        self.accept_task = Some(task);
        Ok(local_addr)
    }

    /// 通知接收循环退出，不等待。
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            info!("停机指令已发出");
            let _ = tx.send(true);
        }
    }

    /// 通知接收循环退出，并等待监听端口关闭。
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!("接收循环异常退出：{}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> u32 {
        *lock_counter(&self.active_connections)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
    active_connections: Arc<Mutex<u32>>,
) {
    let mut id: u128 = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("接收循环收到停机指令，正在退出...");
                break;
            }
            accepted = listener.accept() => {
                let (mut stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("接受连接时遇到错误：{}", e);
                        continue;
                    }
                };
                debug!("[ID{}]TCP连接已建立：{}", id, addr);

                let dispatcher = Arc::clone(&dispatcher);
                let active_connections = Arc::clone(&active_connections);
                tokio::spawn(async move {
                    let _guard = ConnectionGuard::enter(active_connections);
                    serve_connection(&mut stream, id, &dispatcher).await;
                });
                id += 1;
            }
        }
    }
}

/// 活跃连接计数。连接任务结束时（包括 panic 展开）在 `Drop` 中减一。
struct ConnectionGuard {
    counter: Arc<Mutex<u32>>,
}

impl ConnectionGuard {
    fn enter(counter: Arc<Mutex<u32>>) -> Self {
        *lock_counter(&counter) += 1;
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut count = lock_counter(&self.counter);
        *count = count.saturating_sub(1);
    }
}

fn lock_counter(counter: &Mutex<u32>) -> std::sync::MutexGuard<'_, u32> {
    match counter.lock() {
        Ok(lock) => lock,
        Err(poisoned) => {
            warn!("连接计数锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    }
}

/// 处理单个连接上的一个请求，完成后关闭写端。
///
/// 报文无法读取或无法规范化时，直接回写对应的错误响应，不进入路由。
pub async fn serve_connection<S>(stream: &mut S, id: u128, dispatcher: &Dispatcher)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start_time = Instant::now();
    let logger = dispatcher.logger();

    let raw = match RawRequest::read_from(stream).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("[ID{}]客户端未发送数据即关闭连接", id);
            return;
        }
        Err(e) => {
            warn!("[ID{}]读取HTTP请求失败: {}", id, e);
            let response = Response::from_exception(&e, dispatcher.error_format());
            respond(stream, id, &response).await;
            return;
        }
    };
    if dispatcher.debug() {
        logger.debug(&format!(
            "[ID{}]原始请求: {} {} {}, {}个标头, 请求体{}字节",
            id,
            raw.method,
            raw.target.as_deref().unwrap_or("<none>"),
            raw.version,
            raw.headers.len(),
            raw.body.len()
        ));
    }

    let request = match Request::from_raw(raw, id) {
        Ok(req) => req,
        Err(e) => {
            let response = Response::from_exception(&e, dispatcher.error_format());
            logger.info(&format!(
                "[ID{}] -, -, -, {}, {}",
                id,
                response.status_code(),
                response.information()
            ));
            respond(stream, id, &response).await;
            return;
        }
    };

    let (version, path, method) = (request.version(), request.path().to_string(), request.method());
    let response = dispatcher.dispatch(request, id).await;

    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );
    logger.info(&format!(
        "[ID{}] {}, {}, {}, {}, {}",
        id,
        version,
        path,
        method,
        response.status_code(),
        response.information(),
    ));

    respond(stream, id, &response).await;
}

async fn respond<S>(stream: &mut S, id: u128, response: &Response)
where
    S: AsyncWrite + Unpin,
{
    let serialized = response.serialize();
    if let Err(e) = serialized.write_to(stream).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    if let Err(e) = stream.shutdown().await {
        debug!("[ID{}]关闭连接时遇到错误: {}", id, e);
    }
}
