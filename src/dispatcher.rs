// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求分发器
//!
//! 对每个规范化后的请求：按注册顺序找到第一个匹配的路由，调用其处理函数，
//! 并在唯一的一处把处理函数或校验阶段抛出的错误转换为响应。
//!
//! 处理函数在独立的 tokio 任务中运行，处理函数 panic 只会得到一个 500 响应，
//! 不会影响连接任务本身。

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde_json::Value;

use crate::{
    exception::Exception,
    logger::Logger,
    request::Request,
    response::{ErrorFormat, Response},
    route::{HandlerFuture, Route, RouteKind, RouteTable},
    schema::{Schema, SchemaCache},
    typed::TypedRequest,
};

pub struct Dispatcher {
    routes: RouteTable,
    schemas: Arc<SchemaCache>,
    logger: Arc<dyn Logger>,
    debug: bool,
    error_format: ErrorFormat,
}

impl Dispatcher {
    pub fn new(routes: RouteTable, logger: Arc<dyn Logger>) -> Self {
        Self {
            routes,
            schemas: Arc::new(SchemaCache::new()),
            logger,
            debug: false,
            error_format: ErrorFormat::default(),
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_error_format(mut self, error_format: ErrorFormat) -> Self {
        self.error_format = error_format;
        self
    }

    /// 与其他分发器共享编译缓存
    pub fn with_schema_cache(mut self, schemas: Arc<SchemaCache>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn error_format(&self) -> ErrorFormat {
        self.error_format
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn schemas(&self) -> &Arc<SchemaCache> {
        &self.schemas
    }

    /// 分发一个请求，总是返回一个响应。
    pub async fn dispatch(&self, request: Request, id: u128) -> Response {
        if self.debug {
            self.logger
                .debug(&format!("[ID{}]规范化后的请求: {:?}", id, request));
        }

        let route = match self.routes.find(&request) {
            Some(route) => Arc::clone(route),
            None => {
                if self.debug {
                    self.logger
                        .debug(&format!("[ID{}]没有匹配的路由: {}", id, request.route_key()));
                }
                return Response::invalid_route();
            }
        };
        if self.debug {
            self.logger
                .debug(&format!("[ID{}]命中路由: {}", id, route.label()));
        }

        match self.invoke(request, route, id).await {
            Ok(response) => {
                if self.debug {
                    self.logger.debug(&format!(
                        "[ID{}]处理函数返回 {}",
                        id,
                        response.status_code()
                    ));
                }
                response
            }
            Err(e) => {
                let code = e.status_code();
                if code >= 500 {
                    self.logger
                        .error(&format!("[ID{}]处理请求失败: {}", id, e));
                } else if self.debug {
                    self.logger
                        .debug(&format!("[ID{}]处理请求失败({}): {}", id, code, e));
                }
                Response::from_exception(&e, self.error_format)
            }
        }
    }

    async fn invoke(&self, request: Request, route: Arc<Route>, id: u128) -> Result<Response, Exception> {
        let future = match route.kind() {
            RouteKind::Plain(handler) => {
                let handler = Arc::clone(handler);
                let route = Arc::clone(&route);
                call(move || handler(request, route))?
            }
            RouteKind::Typed { schema, handler } => {
                let (method, path, version, headers, body) = request.into_parts();
                let value = self.validate_body(schema, body.as_deref(), id)?;
                let typed = TypedRequest::validated(method, path, version, headers, value);
                let handler = Arc::clone(handler);
                let route = Arc::clone(&route);
                call(move || handler(typed, route))?
            }
        };

        match tokio::spawn(future).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(Exception::internal(format!(
                "handler of route {} panicked",
                route.label()
            ))),
            Err(e) => Err(Exception::internal(e)),
        }
    }

    /// 类型化路由的请求体校验：必须存在、必须是 JSON、必须满足 Schema。
    fn validate_body(&self, schema: &Arc<Schema>, body: Option<&str>, id: u128) -> Result<Value, Exception> {
        let body = body.ok_or_else(|| Exception::bad_input("missing request body"))?;
        let value: Value = serde_json::from_str(body)
            .map_err(|e| Exception::bad_input(format!("malformed JSON body: {}", e)))?;
        let validator = self.schemas.compile(schema)?;
        if validator.is_valid(&value) {
            return Ok(value);
        }
        if self.debug {
            self.logger.debug(&format!(
                "[ID{}]请求体未通过校验: {}",
                id,
                validator.errors(&value).join("; ")
            ));
        }
        Err(Exception::bad_input("invalid request body"))
    }
}

/// 同步调用处理函数取得 future。处理函数在返回 future 之前 panic 同样按 500 处理。
fn call(f: impl FnOnce() -> HandlerFuture) -> Result<HandlerFuture, Exception> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|_| Exception::internal("handler panicked before returning a future"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        headers::Headers,
        logger::{MockLogger, NullLogger},
        param::HttpRequestMethod,
        response::Body,
        route::Matcher,
        typed::TypedRoute,
    };
    use serde_derive::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(method: HttpRequestMethod, path: &str, body: Option<&str>) -> Request {
        Request::new(method, path, Headers::new(), body.map(str::to_string))
    }

    fn dispatcher(routes: RouteTable) -> Dispatcher {
        Dispatcher::new(routes, Arc::new(NullLogger))
    }

    #[derive(Debug, Deserialize)]
    struct FooBar {
        foo: String,
        #[allow(dead_code)]
        bar: f64,
    }

    fn foo_bar_schema() -> Schema {
        Schema::object()
            .property("foo", Schema::string())
            .property("bar", Schema::number())
    }

    #[tokio::test]
    async fn test_no_routes_is_invalid_route() {
        let d = dispatcher(RouteTable::new());
        for method in [HttpRequestMethod::Get, HttpRequestMethod::Post, HttpRequestMethod::Delete] {
            let response = d.dispatch(request(method, "/anything", None), 0).await;
            assert_eq!(response.status_code(), 500);
            assert_eq!(response.body(), Some(&Body::Text("invalid route".to_string())));
        }
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut routes = RouteTable::new();
        let counter = Arc::clone(&first);
        routes.push(Route::new(Matcher::exact("GET /"), move |_req, _route| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Response::text(200, "first")) }
        }));
        let counter = Arc::clone(&second);
        routes.push(Route::new(Matcher::exact("GET /"), move |_req, _route| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Response::text(200, "second")) }
        }));

        let response = dispatcher(routes)
            .dispatch(request(HttpRequestMethod::Get, "/", None), 1)
            .await;
        assert_eq!(response.body(), Some(&Body::Text("first".to_string())));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_fall_through() {
        let reached = Arc::new(AtomicUsize::new(0));
        let mut routes = RouteTable::new();
        routes.push(Route::new(Matcher::pattern("/").unwrap(), |_req, _route| async {
            Err(Exception::not_found("nothing here"))
        }));
        let counter = Arc::clone(&reached);
        routes.push(Route::new(Matcher::pattern("/").unwrap(), move |_req, _route| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Response::ok()) }
        }));

        let response = dispatcher(routes)
            .dispatch(request(HttpRequestMethod::Get, "/x", None), 2)
            .await;
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.body(), Some(&Body::Text("nothing here".to_string())));
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_body_echo() {
        let mut routes = RouteTable::new();
        routes.push(Route::new(Matcher::exact("POST /echo"), |req, _route| async move {
            Ok(Response::text(200, req.body().unwrap_or_default()))
        }));
        let response = dispatcher(routes)
            .dispatch(
                request(HttpRequestMethod::Post, "/echo", Some(r#"{"hello":"world"}"#)),
                3,
            )
            .await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(
            response.body(),
            Some(&Body::Text(r#"{"hello":"world"}"#.to_string()))
        );
    }

    fn typed_routes() -> RouteTable {
        let mut routes = RouteTable::new();
        routes.push(TypedRoute::<FooBar>::new(
            Matcher::exact("POST /foo"),
            foo_bar_schema(),
            |req, _route| async move { Ok(Response::text(200, req.into_body().foo)) },
        ));
        routes
    }

    #[tokio::test]
    async fn test_typed_route_validation() {
        let d = dispatcher(typed_routes());

        let ok = d
            .dispatch(
                request(HttpRequestMethod::Post, "/foo", Some(r#"{"foo":"str","bar":1}"#)),
                4,
            )
            .await;
        assert_eq!(ok.status_code(), 200);
        assert_eq!(ok.body(), Some(&Body::Text("str".to_string())));

        let empty = d
            .dispatch(request(HttpRequestMethod::Post, "/foo", Some("{}")), 5)
            .await;
        assert_eq!(empty.status_code(), 400);
        assert_eq!(empty.body(), Some(&Body::Text("invalid request body".to_string())));
    }

    #[tokio::test]
    async fn test_typed_route_missing_and_malformed_body() {
        let d = dispatcher(typed_routes());

        let missing = d
            .dispatch(request(HttpRequestMethod::Post, "/foo", None), 6)
            .await;
        assert_eq!(missing.status_code(), 400);
        assert_eq!(missing.body(), Some(&Body::Text("missing request body".to_string())));

        let malformed = d
            .dispatch(request(HttpRequestMethod::Post, "/foo", Some("{not json")), 7)
            .await;
        assert_eq!(malformed.status_code(), 400);
    }

    #[tokio::test]
    async fn test_typed_route_compiles_schema_once() {
        let d = dispatcher(typed_routes());
        for id in 0..3 {
            d.dispatch(
                request(HttpRequestMethod::Post, "/foo", Some(r#"{"foo":"a","bar":2}"#)),
                id,
            )
            .await;
        }
        assert_eq!(d.schemas().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_401() {
        let mut routes = RouteTable::new();
        routes.push(Route::new(Matcher::exact("GET /secret"), |_req, _route| async {
            Err(Exception::unauthorized("whatever the message says"))
        }));
        let response = dispatcher(routes)
            .dispatch(request(HttpRequestMethod::Get, "/secret", None), 8)
            .await;
        assert_eq!(response.status_code(), 401);
    }

    #[tokio::test]
    async fn test_json_error_format() {
        let mut routes = RouteTable::new();
        routes.push(Route::new(Matcher::exact("GET /secret"), |_req, _route| async {
            Err(Exception::unauthorized("no token"))
        }));
        let response = dispatcher(routes)
            .with_error_format(ErrorFormat::Json)
            .dispatch(request(HttpRequestMethod::Get, "/secret", None), 9)
            .await;
        assert_eq!(response.status_code(), 401);
        assert_eq!(response.body(), Some(&Body::Json(json!({"error": "no token"}))));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_500() {
        let mut logger = MockLogger::new();
        logger.expect_error().times(1).return_const(());

        let mut routes = RouteTable::new();
        routes.push(Route::new(Matcher::exact("GET /boom"), |_req, _route| async {
            if true {
                panic!("boom");
            }
            Ok(Response::ok())
        }));
        let response = Dispatcher::new(routes, Arc::new(logger))
            .dispatch(request(HttpRequestMethod::Get, "/boom", None), 10)
            .await;
        assert_eq!(response.status_code(), 500);
    }

    #[tokio::test]
    async fn test_handler_panicking_synchronously_is_500() {
        let mut routes = RouteTable::new();
        routes.push(Route::new(
            Matcher::exact("GET /boom"),
            |_req, _route| -> std::future::Ready<Result<Response, Exception>> {
                panic!("before the future exists")
            },
        ));
        let response = dispatcher(routes)
            .dispatch(request(HttpRequestMethod::Get, "/boom", None), 11)
            .await;
        assert_eq!(response.status_code(), 500);
    }

    #[tokio::test]
    async fn test_debug_logging_does_not_change_outcome() {
        let mut logger = MockLogger::new();
        logger.expect_debug().times(1..).returning(|_| ());

        let mut routes = RouteTable::new();
        routes.push(Route::new(Matcher::exact("GET /"), |_req, _route| async {
            Ok(Response::text(200, "hi"))
        }));
        let d = Dispatcher::new(routes, Arc::new(logger)).with_debug(true);
        assert!(d.debug());
        let response = d.dispatch(request(HttpRequestMethod::Get, "/", None), 12).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body(), Some(&Body::Text("hi".to_string())));
    }

    #[tokio::test]
    async fn test_debug_off_logs_nothing() {
        let mut logger = MockLogger::new();
        logger.expect_debug().never();

        let mut routes = RouteTable::new();
        routes.push(Route::new(Matcher::exact("GET /"), |_req, _route| async {
            Ok(Response::text(200, "hi"))
        }));
        let d = Dispatcher::new(routes, Arc::new(logger)).with_debug(false);
        let response = d.dispatch(request(HttpRequestMethod::Get, "/", None), 13).await;
        assert_eq!(response.status_code(), 200);
        let missed = d.dispatch(request(HttpRequestMethod::Get, "/nowhere", None), 14).await;
        assert_eq!(missed.status_code(), 500);
    }
}
