// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了请求分发生命周期中可能出现的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖协议解析错误、路由处理函数主动抛出的带状态码错误、以及其他通用错误。
//! - **语义映射**：每个变体都对应一个 HTTP 状态码，由分发器（Dispatcher）统一转换为响应。
//! - **用户友好**：通过实现 `std::fmt::Display`，确保错误信息可以被安全地记录到日志或返回给客户端。

use std::fmt;

/// 服务器处理请求过程中发生的异常类型。
///
/// 路由处理函数返回 `Result<Response, Exception>`，可以直接使用 `?` 传播错误。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行或标头格式不符合 HTTP/1.x 报文规范。
    MalformedRequest(String),
    /// 客户端使用了服务器不接受的 HTTP 方法。对应 `405 Method Not Allowed`。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。对应 `505`。
    UnsupportedHttpVersion,
    /// 请求体不合法（JSON 无法解析、Schema 校验失败等）。对应 `400 Bad Request`。
    BadInput(String),
    /// 未认证。对应 `401 Unauthorized`。
    Unauthorized(String),
    /// 已认证但无权限。对应 `403 Forbidden`。
    Forbidden(String),
    /// 资源不存在。对应 `404 Not Found`。
    NotFound(String),
    /// 携带任意状态码与消息的处理函数错误。
    Status { code: u16, message: String },
    /// 其他任何内部错误，对应 `500 Internal Server Error`。
    Internal(String),
    /// 路由注册的 Schema 无法被编译。
    InvalidSchema(String),
    /// 监听端口绑定失败。
    BindFailed(String),
    /// 配置文件无法读取。
    ConfigUnreadable(String),
}

use Exception::*;

impl Exception {
    pub fn bad_input(message: impl Into<String>) -> Self {
        BadInput(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        NotFound(message.into())
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        Internal(message.to_string())
    }

    /// 该异常被转换为响应时使用的状态码。
    pub fn status_code(&self) -> u16 {
        match self {
            RequestIsNotUtf8 | MalformedRequest(_) | BadInput(_) => 400,
            UnSupportedRequestMethod => 405,
            UnsupportedHttpVersion => 505,
            Unauthorized(_) => 401,
            Forbidden(_) => 403,
            NotFound(_) => 404,
            Status { code, .. } => *code,
            Internal(_) | InvalidSchema(_) | BindFailed(_) | ConfigUnreadable(_) => 500,
        }
    }

    /// 返回给客户端的消息文本。
    ///
    /// 通用内部错误若没有消息，则退化为 `Internal Server Error`。
    pub fn message(&self) -> String {
        match self {
            BadInput(m) | Unauthorized(m) | Forbidden(m) | NotFound(m) | MalformedRequest(m) => {
                m.clone()
            }
            Status { message, .. } => message.clone(),
            Internal(m) if m.is_empty() => "Internal Server Error".to_string(),
            Internal(m) => m.clone(),
            _ => self.to_string(),
        }
    }
}

/// 为 `Exception` 实现 `Display` 特性，使其支持字符串格式化输出。
impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest(m) => write!(f, "Malformed request: {}", m),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            BadInput(m) => write!(f, "Bad input (400): {}", m),
            Unauthorized(m) => write!(f, "Unauthorized (401): {}", m),
            Forbidden(m) => write!(f, "Forbidden (403): {}", m),
            NotFound(m) => write!(f, "Not found (404): {}", m),
            Status { code, message } => write!(f, "Handler failed ({}): {}", code, message),
            Internal(m) => write!(f, "Internal error: {}", m),
            InvalidSchema(m) => write!(f, "Invalid schema: {}", m),
            BindFailed(m) => write!(f, "Couldn't bind listener: {}", m),
            ConfigUnreadable(m) => write!(f, "Couldn't read config file: {}", m),
        }
    }
}

impl std::error::Error for Exception {}

impl From<serde_json::Error> for Exception {
    fn from(e: serde_json::Error) -> Self {
        BadInput(e.to_string())
    }
}

impl From<std::io::Error> for Exception {
    fn from(e: std::io::Error) -> Self {
        Internal(e.to_string())
    }
}
