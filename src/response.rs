use crate::{exception::Exception, headers::Headers, param::*};

use bytes::Bytes;
use chrono::prelude::*;
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use std::io;

/// 响应体。结构化值序列化为 JSON，字符串按纯文本发送。
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Json(Value),
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_string())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self {
        Body::Json(v)
    }
}

/// 处理函数出错时，错误消息写入响应体的形式。每个服务器只使用其中一种。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFormat {
    /// 响应体即错误消息本身，`text/plain`
    #[default]
    Text,
    /// 响应体为 `{"error": message}`，`application/json`
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: u16,
    headers: Option<Headers>,
    body: Option<Body>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: None,
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self::new(status).with_body(Body::Text(text.into()))
    }

    /// 把任意可序列化的值作为 JSON 响应体
    pub fn json<T: serde::Serialize>(status: u16, value: &T) -> Result<Self, Exception> {
        let value = serde_json::to_value(value).map_err(Exception::internal)?;
        Ok(Self::new(status).with_body(Body::Json(value)))
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .append(name, value);
        self
    }

    /// 分发器在路由未命中时使用的默认响应
    pub fn invalid_route() -> Self {
        Self::new(500)
            .with_header("content-type", TEXT_PLAIN)
            .with_body("invalid route")
    }

    /// 将异常转换为响应：状态码取自异常，消息按 `format` 写入响应体。
    pub fn from_exception(e: &Exception, format: ErrorFormat) -> Self {
        let code = e.status_code();
        let message = e.message();
        let response = match format {
            ErrorFormat::Text => Self::text(code, message),
            ErrorFormat::Json => Self::new(code).with_body(json!({ "error": message })),
        };
        match e {
            Exception::UnSupportedRequestMethod => {
                response.with_header("allow", &allow_header_value())
            }
            _ => response,
        }
    }

    /// 计算最终的标头与响应体字节。
    ///
    /// 顺序：先应用推断出的 `content-type`，再合并调用方设置的标头，
    /// 最后根据最终响应体重新计算 `content-length`。
    pub fn serialize(&self) -> SerializedResponse {
        let (content_type, content) = match &self.body {
            None | Some(Body::Json(Value::Null)) => (None, None),
            Some(Body::Text(s)) => (Some(TEXT_PLAIN), Some(Bytes::from(s.clone()))),
            Some(Body::Json(v @ (Value::Object(_) | Value::Array(_)))) => {
                (Some(APPLICATION_JSON), Some(Bytes::from(v.to_string())))
            }
            Some(Body::Json(Value::String(s))) => (Some(TEXT_PLAIN), Some(Bytes::from(s.clone()))),
            Some(Body::Json(other)) => (Some(TEXT_PLAIN), Some(Bytes::from(other.to_string()))),
        };

        let mut headers = Headers::new();
        if let Some(t) = content_type {
            headers.insert("content-type", t);
        }
        headers.insert("date", format_date(&Utc::now()));
        headers.insert("server", SERVER_NAME);
        if let Some(caller) = &self.headers {
            headers.merge(caller);
        }
        headers.insert("connection", "close");
        let content_length = content.as_ref().map_or(0, Bytes::len);
        headers.insert("content-length", content_length.to_string());

        let mut head = String::new();
        head.push_str(&format!(
            "{} {} {}{}",
            HttpVersion::V1_1,
            self.status,
            reason_phrase(self.status),
            CRLF
        ));
        for (name, value) in &headers {
            for v in value.values() {
                head.push_str(&[name.as_str(), ": ", v, CRLF].concat());
            }
        }
        head.push_str(CRLF);

        SerializedResponse {
            head: head.into_bytes(),
            headers,
            body: content,
        }
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn information(&self) -> &str {
        reason_phrase(self.status)
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }
}

/// 已序列化、等待写出的响应：一次写状态行与标头，最多一次写响应体。
#[derive(Debug, Clone)]
pub struct SerializedResponse {
    head: Vec<u8>,
    headers: Headers,
    body: Option<Bytes>,
}

impl SerializedResponse {
    /// 最终发送的标头
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        [
            self.head.as_slice(),
            match &self.body {
                Some(c) => c,
                None => b"",
            },
        ]
        .concat()
    }

    pub async fn write_to<W>(&self, stream: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&self.head).await?;
        if let Some(body) = &self.body {
            stream.write_all(body).await?;
        }
        stream.flush().await
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}
