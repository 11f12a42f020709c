// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 示例服务器
//!
//! 演示如何嵌入 `webrouter`：
//! - 从 `config/log4rs.yaml` 初始化日志，从 `config/development.toml` 读取配置
//! - 按配置的工作线程数构建 Tokio 运行时
//! - 注册每种匹配器各一条示例路由，外加一条类型化路由
//! - 后台管理控制台（`stop` / `status` / `help`）

use std::sync::Arc;

use log::{error, info, warn};
use serde_derive::Deserialize;
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
};

use webrouter::{
    Config, ConsoleLogger, Exception, HttpRequestMethod, Matcher, PathMatcher, Response, Route,
    Schema, Server, TypedRoute,
};

#[derive(Debug, Deserialize)]
struct Greeting {
    name: String,
    times: Option<u64>,
}

fn main() {
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
    }

    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => {
            info!("配置文件已载入");
            config
        }
        Err(e) => {
            warn!("{}，使用默认配置", e);
            Config::new().with_worker_threads(num_cpus::get())
        }
    };

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法构建Tokio运行时：{}", e);
            return;
        }
    };

    runtime.block_on(run(config));
}

async fn run(config: Config) {
    let mut server = Server::new(config, Some(Arc::new(ConsoleLogger)));
    if let Err(e) = register_routes(&mut server) {
        error!("示例路由注册失败：{}", e);
        return;
    }

    let addr = match server.start().await {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    info!("服务器已启动：http://{}", addr);

    console(&mut server).await;
    server.shutdown().await;
    info!("服务器已关闭");
}

fn register_routes(server: &mut Server) -> Result<(), regex::Error> {
    let greeting_schema = Schema::object()
        .property("name", Schema::string().with_keyword("minLength", json!(1)))
        .optional(
            "times",
            Schema::integer()
                .with_keyword("minimum", json!(1))
                .with_keyword("maximum", json!(5)),
        );

    server
        .add_route(
            Route::new(Matcher::exact("GET /"), |_req, _route| async {
                Ok(Response::text(200, "webrouter is running"))
            })
            .named("index"),
        )
        .add_route(
            Route::new(Matcher::pattern(r"^GET /users/\d+$")?, |req, _route| async move {
                let id = req.path().trim_start_matches("/users/").to_string();
                Response::json(200, &json!({ "id": id }))
            })
            .named("user"),
        )
        .add_route(
            Route::new(
                Matcher::predicate(|req, _route| req.path().starts_with("/admin")),
                |req, _route| async move {
                    match req.header("x-admin-token") {
                        Some(_) => Ok(Response::text(200, "welcome")),
                        None => Err(Exception::unauthorized("missing x-admin-token")),
                    }
                },
            )
            .named("admin"),
        )
        .add_route(
            Route::new(
                Matcher::method_path(HttpRequestMethod::Post, PathMatcher::exact("/echo")),
                |req, _route| async move {
                    let body = req.body().unwrap_or_default().to_string();
                    Ok(Response::text(200, body))
                },
            )
            .named("echo"),
        )
        .add_typed_route(
            TypedRoute::<Greeting>::new(
                Matcher::exact("POST /greet"),
                greeting_schema,
                |req, _route| async move {
                    let greeting = req.into_body();
                    let line = format!("hello, {}!", greeting.name);
                    let lines = vec![line; greeting.times.unwrap_or(1) as usize];
                    Response::json(200, &lines)
                },
            )
            .named("greet"),
        );
    Ok(())
}

/// 读取标准输入上的管理指令，收到 `stop` 或 Ctrl-C 时返回
async fn console(server: &mut Server) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    let mut stdin_open = true;
    loop {
        input.clear();
        tokio::select! {
            read = reader.read_line(&mut input), if stdin_open => {
                match read {
                    Ok(0) | Err(_) => {
                        stdin_open = false;
                        continue;
                    }
                    Ok(_) => {}
                }
                match input.trim() {
                    "stop" => {
                        println!("停机指令已激活，服务器即将关闭...");
                        return;
                    }
                    "help" => {
                        println!("== Webrouter Help ==");
                        println!("stop   - 发出停机信号");
                        println!("status - 查看当前服务器运行状态");
                        println!("help   - 显示此帮助信息");
                        println!("====================");
                    }
                    "status" => {
                        println!("== Webrouter 状态 ===");
                        if let Some(addr) = server.local_addr() {
                            println!("监听地址: {}", addr);
                        }
                        println!("已注册路由数: {}", server.routes().len());
                        println!("当前活跃连接数: {}", server.active_connections());
                        println!("====================");
                    }
                    "" => {}
                    cmd => println!("无效的命令：{}", cmd),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("收到中断信号，服务器即将关闭...");
                return;
            }
        }
    }
}
