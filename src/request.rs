// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求规范化模块
//!
//! 该模块负责将 TCP 流中读取的原始报文转换为规范化的 `Request` 结构体。它涵盖了：
//! 1. 原始报文的读取：先读完请求头，再按 `content-length` 读完整个请求体。
//! 2. 请求行（Request-Line）的解析（方法、路径、版本）。
//! 3. 标头（Headers）的规范化：名称小写、同名标头保留为序列、丢弃空值。
//! 4. 请求体的缓冲：分发之前总是完整读取，不向处理函数暴露流式数据。

use crate::{exception::Exception, headers::Headers, param::*};
use log::{debug, error};
use tokio::io::{AsyncRead, AsyncReadExt};

/// 请求头部分的最大字节数，超过则视为畸形请求。
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 监听器交付的原始请求报文，尚未经过任何规范化。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRequest {
    /// 请求目标（通常为路径 + 查询字符串），请求行中缺失时为 `None`
    pub target: Option<String>,
    /// 原始方法名，未做大小写处理
    pub method: String,
    /// 原始协议版本字符串
    pub version: String,
    /// 按到达顺序排列的标头行
    pub headers: Vec<(String, String)>,
    /// 已缓冲的完整请求体
    pub body: Vec<u8>,
}

impl RawRequest {
    /// 解析请求行与标头行。`head` 不包含结尾的空行。
    pub fn parse_head(head: &[u8]) -> Result<Self, Exception> {
        let head = std::str::from_utf8(head).map_err(|_| Exception::RequestIsNotUtf8)?;
        let mut lines = head.split(CRLF);

        // 请求行 (e.g., "GET /index.html HTTP/1.1")
        let request_line = lines.next().unwrap_or("");
        let parts: Vec<&str> = request_line.split(' ').filter(|p| !p.is_empty()).collect();
        let (method, target, version) = match parts.len() {
            0 | 1 => {
                return Err(Exception::MalformedRequest(format!(
                    "invalid request line: {:?}",
                    request_line
                )))
            }
            // 缺少请求目标，例如 "GET HTTP/1.1"
            2 if parts[1].to_uppercase().starts_with("HTTP/") => (parts[0], None, parts[1]),
            2 => {
                return Err(Exception::MalformedRequest(format!(
                    "missing HTTP version: {:?}",
                    request_line
                )))
            }
            // 路径中可能包含空格，虽然不规范但通过 join 尝试恢复
            n => (parts[0], Some(parts[1..n - 1].join(" ")), parts[n - 1]),
        };

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                Exception::MalformedRequest(format!("invalid header line: {:?}", line))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Exception::MalformedRequest(format!(
                    "empty header name: {:?}",
                    line
                )));
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }

        Ok(Self {
            target,
            method: method.to_string(),
            version: version.to_string(),
            headers,
            body: Vec::new(),
        })
    }

    /// 从异步流中读取一个完整的请求：请求头 + `content-length` 指定长度的请求体。
    ///
    /// 对端在发送任何字节之前就关闭连接时返回 `Ok(None)`。
    pub async fn read_from<R>(stream: &mut R) -> Result<Option<Self>, Exception>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        let head_end = loop {
            if let Some(pos) = find_head_end(&buffer) {
                break pos;
            }
            if buffer.len() > MAX_HEAD_BYTES {
                return Err(Exception::MalformedRequest(
                    "request head too large".to_string(),
                ));
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                if buffer.is_empty() {
                    return Ok(None);
                }
                return Err(Exception::MalformedRequest(
                    "connection closed before request head completed".to_string(),
                ));
            }
            buffer.extend_from_slice(&chunk[..n]);
        };

        let mut raw = Self::parse_head(&buffer[..head_end])?;
        let mut body = buffer.split_off(head_end + HEAD_TERMINATOR.len());

        if let Some(encoding) = raw.header("transfer-encoding") {
            if encoding.to_lowercase().contains("chunked") {
                return Err(Exception::status(
                    501,
                    "chunked request bodies are not supported",
                ));
            }
        }

        let content_length = raw.content_length()?;
        if body.len() > content_length {
            body.truncate(content_length);
        } else if body.len() < content_length {
            // 缓冲区只随实际到达的字节增长，不按声明的长度预先分配
            let remaining = (content_length - body.len()) as u64;
            let read = (&mut *stream).take(remaining).read_to_end(&mut body).await;
            if read.is_err() || body.len() < content_length {
                return Err(Exception::MalformedRequest(
                    "request body shorter than content-length".to_string(),
                ));
            }
        }
        raw.body = body;
        Ok(Some(raw))
    }

    /// 查找第一个同名标头（大小写不敏感）
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn content_length(&self) -> Result<usize, Exception> {
        match self.header("content-length") {
            Some(v) => v.trim().parse::<usize>().map_err(|_| {
                Exception::MalformedRequest(format!("invalid content-length: {:?}", v))
            }),
            None => Ok(0),
        }
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

/// 规范化后的 HTTP 请求。
///
/// 每个连接构造一次，构造后不可变，只属于创建它的那次分发调用。
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP 请求方法
    method: HttpRequestMethod,
    /// 请求目标（包含查询字符串），缺失时为 `/`
    path: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 规范化后的标头
    headers: Headers,
    /// 完整请求体，没有任何字节时为 `None`
    body: Option<String>,
}

impl Request {
    /// 直接构造一个请求，主要用于测试和嵌入式调用。
    pub fn new(
        method: HttpRequestMethod,
        path: &str,
        headers: Headers,
        body: Option<String>,
    ) -> Self {
        Self {
            method,
            path: path.to_string(),
            version: HttpVersion::V1_1,
            headers,
            body,
        }
    }

    /// 将原始报文规范化为 `Request`。
    ///
    /// # 逻辑步骤
    /// 1. 方法名：转为大写后必须属于 `ALLOWED_METHODS`。
    /// 2. 协议版本：仅接受 HTTP/1.0 与 HTTP/1.1。
    /// 3. 标头：名称小写，同名保留为序列，丢弃空值。
    /// 4. 请求体：没有字节时为 `None`，否则必须是合法 UTF-8。
    ///
    /// # 参数
    /// * `raw` - 监听器读取到的原始报文。
    /// * `id` - 请求 ID，用于在多任务环境下追踪日志。
    pub fn from_raw(raw: RawRequest, id: u128) -> Result<Self, Exception> {
        let method = match raw.method.parse::<HttpRequestMethod>() {
            Ok(m) => m,
            Err(e) => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &raw.method);
                return Err(e);
            }
        };

        let version = match raw.version.parse::<HttpVersion>() {
            Ok(v) => v,
            Err(e) => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &raw.version);
                return Err(e);
            }
        };

        let path = match raw.target {
            Some(t) if !t.is_empty() => t,
            _ => "/".to_string(),
        };

        let headers: Headers = raw.headers.into_iter().collect();

        let body = if raw.body.is_empty() {
            None
        } else {
            match String::from_utf8(raw.body) {
                Ok(text) => Some(text),
                Err(_) => {
                    error!("[ID{}]请求体不是合法的UTF-8文本", id);
                    return Err(Exception::RequestIsNotUtf8);
                }
            }
        };

        debug!("[ID{}]请求规范化完成: {} {}", id, method, path);
        Ok(Self {
            method,
            path,
            version,
            headers,
            body,
        })
    }

    /// 从内存中一条完整的报文（请求头 + 请求体）构建 `Request`。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, body) = match find_head_end(buffer) {
            Some(pos) => (&buffer[..pos], &buffer[pos + HEAD_TERMINATOR.len()..]),
            None => (buffer, &buffer[buffer.len()..]),
        };
        let mut raw = RawRequest::parse_head(head)?;
        raw.body = body.to_vec();
        Self::from_raw(raw, id)
    }

    pub(crate) fn into_parts(self) -> (HttpRequestMethod, String, HttpVersion, Headers, Option<String>) {
        (self.method, self.path, self.version, self.headers, self.body)
    }
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取 HTTP 协议版本
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 获取请求路径（含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取全部标头
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// 获取某个标头的第一个值
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }

    /// 获取请求体文本
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// 由方法与路径以一个空格连接而成的路由键，例如 `GET /users`
    pub fn route_key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}
