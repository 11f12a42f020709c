//! 类型化路由：请求体先经过 Schema 校验、再解码为 `B`，处理函数拿到的是 `TypedRequest<B>`。

use std::{future::Future, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    exception::Exception,
    headers::Headers,
    param::{HttpRequestMethod, HttpVersion},
    response::Response,
    route::{HandlerFuture, Matcher, Route, RouteKind, TypedHandler},
    schema::Schema,
};

/// 标记请求体已通过 Schema 校验。只有分发器能构造。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validated(());

/// 请求体已校验、已解码的请求
#[derive(Debug, Clone)]
pub struct TypedRequest<B> {
    method: HttpRequestMethod,
    path: String,
    version: HttpVersion,
    headers: Headers,
    body: B,
    validated: Validated,
}

impl TypedRequest<Value> {
    pub(crate) fn validated(
        method: HttpRequestMethod,
        path: String,
        version: HttpVersion,
        headers: Headers,
        body: Value,
    ) -> Self {
        Self {
            method,
            path,
            version,
            headers,
            body,
            validated: Validated(()),
        }
    }
}

impl<B> TypedRequest<B> {
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn into_body(self) -> B {
        self.body
    }

    pub fn validation(&self) -> Validated {
        self.validated
    }

    fn try_map_body<C, E>(self, f: impl FnOnce(B) -> Result<C, E>) -> Result<TypedRequest<C>, E> {
        Ok(TypedRequest {
            method: self.method,
            path: self.path,
            version: self.version,
            headers: self.headers,
            body: f(self.body)?,
            validated: self.validated,
        })
    }
}

type BoxedTypedHandler<B> = Arc<dyn Fn(TypedRequest<B>, Arc<Route>) -> HandlerFuture + Send + Sync>;

/// 带请求体 Schema 的路由
pub struct TypedRoute<B> {
    name: Option<String>,
    matcher: Matcher,
    schema: Arc<Schema>,
    handler: BoxedTypedHandler<B>,
}

impl<B> TypedRoute<B>
where
    B: DeserializeOwned + Send + 'static,
{
    /// 传入同一个 `Arc<Schema>` 的多条路由共享一份编译结果
    pub fn new<F, Fut>(matcher: Matcher, schema: impl Into<Arc<Schema>>, handler: F) -> Self
    where
        F: Fn(TypedRequest<B>, Arc<Route>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, Exception>> + Send + 'static,
    {
        let handler: BoxedTypedHandler<B> =
            Arc::new(move |request: TypedRequest<B>, route: Arc<Route>| -> HandlerFuture {
                Box::pin(handler(request, route))
            });
        Self {
            name: None,
            matcher,
            schema: schema.into(),
            handler,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

impl<B> From<TypedRoute<B>> for Route
where
    B: DeserializeOwned + Send + 'static,
{
    fn from(typed: TypedRoute<B>) -> Self {
        let inner = typed.handler;
        let handler: TypedHandler =
            Arc::new(move |request: TypedRequest<Value>, route: Arc<Route>| -> HandlerFuture {
                match request.try_map_body(serde_json::from_value::<B>) {
                    Ok(request) => inner(request, route),
                    Err(e) => Box::pin(std::future::ready(Err(Exception::bad_input(format!(
                        "invalid request body: {}",
                        e
                    ))))),
                }
            });
        Route::from_parts(
            typed.name,
            typed.matcher,
            RouteKind::Typed {
                schema: typed.schema,
                handler,
            },
        )
    }
}
