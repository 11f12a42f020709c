//! # 路由表与路由匹配
//!
//! 路由由匹配器与处理函数组成。路由表按注册顺序保存路由，只能追加不能删除；
//! 分发时按注册顺序逐个匹配，第一个匹配的路由胜出，不会回落到后续路由。
//!
//! 匹配器有四种：
//! - `Exact`：`"<METHOD> <path>"` 字面量完全相等。
//! - `Pattern`：正则在 `"<METHOD> <path>"` 中任意位置命中即可（除非正则自身带锚点）。
//! - `Predicate`：调用方提供的函数，返回值即匹配结果。
//! - `MethodPath`：方法与路径分别检查，两者都必须成立。

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use regex::Regex;
use serde_json::Value;

use crate::{
    exception::Exception, param::HttpRequestMethod, request::Request, response::Response,
    schema::Schema, typed::TypedRequest,
};

/// 处理函数返回的 future
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, Exception>> + Send>>;

/// 普通路由的处理函数，参数为规范化后的请求与命中的路由本身
pub type Handler = Arc<dyn Fn(Request, Arc<Route>) -> HandlerFuture + Send + Sync>;

/// 谓词匹配函数
pub type Predicate = Arc<dyn Fn(&Request, &Route) -> bool + Send + Sync>;

/// 擦除了请求体类型的类型化处理函数，入参的请求体是已通过校验的 JSON 值
pub type TypedHandler = Arc<dyn Fn(TypedRequest<Value>, Arc<Route>) -> HandlerFuture + Send + Sync>;

/// 只检查路径的匹配器，与方法检查组合成 `Matcher::MethodPath`
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    Pattern(Regex),
}

impl PathMatcher {
    pub fn exact(path: &str) -> Self {
        PathMatcher::Exact(path.to_string())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(PathMatcher::Pattern(Regex::new(pattern)?))
    }

    pub fn is_match(&self, path: &str) -> bool {
        match self {
            PathMatcher::Exact(p) => p == path,
            PathMatcher::Pattern(re) => re.is_match(path),
        }
    }
}

#[derive(Clone)]
pub enum Matcher {
    Exact(String),
    Pattern(Regex),
    Predicate(Predicate),
    MethodPath {
        method: HttpRequestMethod,
        path: PathMatcher,
    },
}

impl Matcher {
    /// 例如 `Matcher::exact("GET /users")`
    pub fn exact(route_key: &str) -> Self {
        Matcher::Exact(route_key.to_string())
    }

    /// 例如 `Matcher::pattern(r"^GET /users/\d+$")`
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Matcher::Pattern(Regex::new(pattern)?))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Request, &Route) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(f))
    }

    pub fn method_path(method: HttpRequestMethod, path: PathMatcher) -> Self {
        Matcher::MethodPath { method, path }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Exact(key) => write!(f, "Exact({:?})", key),
            Matcher::Pattern(re) => write!(f, "Pattern({:?})", re.as_str()),
            Matcher::Predicate(_) => write!(f, "Predicate(..)"),
            Matcher::MethodPath { method, path } => {
                write!(f, "MethodPath({}, {:?})", method, path)
            }
        }
    }
}

/// 路由的种类：普通路由或类型化路由，二者互斥。
#[derive(Clone)]
pub enum RouteKind {
    Plain(Handler),
    Typed {
        schema: Arc<Schema>,
        handler: TypedHandler,
    },
}

/// 一条已注册的路由，注册后不可变。
#[derive(Clone)]
pub struct Route {
    name: Option<String>,
    matcher: Matcher,
    kind: RouteKind,
}

impl Route {
    /// 构造普通路由
    pub fn new<F, Fut>(matcher: Matcher, handler: F) -> Self
    where
        F: Fn(Request, Arc<Route>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, Exception>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |request: Request, route: Arc<Route>| -> HandlerFuture {
                Box::pin(handler(request, route))
            });
        Self::from_parts(None, matcher, RouteKind::Plain(handler))
    }

    pub(crate) fn from_parts(name: Option<String>, matcher: Matcher, kind: RouteKind) -> Self {
        Self {
            name,
            matcher,
            kind,
        }
    }

    /// 为路由命名，仅用于日志
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn kind(&self) -> &RouteKind {
        &self.kind
    }

    pub fn is_typed(&self) -> bool {
        matches!(self.kind, RouteKind::Typed { .. })
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        match &self.kind {
            RouteKind::Typed { schema, .. } => Some(schema),
            RouteKind::Plain(_) => None,
        }
    }

    /// 日志中用来指代该路由的文本
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{:?}", self.matcher),
        }
    }

    /// 判断该路由是否适用于请求
    pub fn matches(&self, request: &Request) -> bool {
        match &self.matcher {
            Matcher::Exact(key) => *key == request.route_key(),
            Matcher::Pattern(re) => re.is_match(&request.route_key()),
            Matcher::Predicate(f) => f(request, self),
            Matcher::MethodPath { method, path } => {
                *method == request.method() && path.is_match(request.path())
            }
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("typed", &self.is_typed())
            .finish()
    }
}

pub fn match_route(route: &Route, request: &Request) -> bool {
    route.matches(request)
}

/// 只追加的有序路由表，注册顺序即匹配优先级。
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: impl Into<Route>) -> &mut Self {
        self.routes.push(Arc::new(route.into()));
        self
    }

    /// 按注册顺序查找第一个匹配的路由
    pub fn find(&self, request: &Request) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.matches(request))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Route>> {
        self.routes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use proptest::prelude::*;

    fn request(method: HttpRequestMethod, path: &str) -> Request {
        Request::new(method, path, Headers::new(), None)
    }

    fn route(matcher: Matcher) -> Route {
        Route::new(matcher, |_req, _route| async { Ok(Response::ok()) })
    }

    #[test]
    fn test_exact_matcher() {
        let r = route(Matcher::exact("GET /"));
        assert!(r.matches(&request(HttpRequestMethod::Get, "/")));
        assert!(!r.matches(&request(HttpRequestMethod::Post, "/")));
        assert!(!r.matches(&request(HttpRequestMethod::Get, "/index")));
    }

    #[test]
    fn test_pattern_matcher_is_unanchored() {
        let r = route(Matcher::pattern(r"/users/\d+").unwrap());
        assert!(r.matches(&request(HttpRequestMethod::Get, "/users/42")));
        assert!(r.matches(&request(HttpRequestMethod::Delete, "/api/users/7/posts")));
        assert!(!r.matches(&request(HttpRequestMethod::Get, "/users/me")));
    }

    #[test]
    fn test_pattern_matcher_respects_own_anchors() {
        let r = route(Matcher::pattern(r"^GET /users/\d+$").unwrap());
        assert!(r.matches(&request(HttpRequestMethod::Get, "/users/42")));
        assert!(!r.matches(&request(HttpRequestMethod::Get, "/users/42/posts")));
        assert!(!r.matches(&request(HttpRequestMethod::Put, "/users/42")));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(Matcher::pattern("(").is_err());
        assert!(PathMatcher::pattern("[").is_err());
    }

    #[test]
    fn test_predicate_matcher_sees_request_and_route() {
        let r = route(Matcher::predicate(|req, route| {
            req.header("x-admin").is_some() && route.name() == Some("admin")
        }))
        .named("admin");
        let mut headers = Headers::new();
        headers.append("X-Admin", "1");
        assert!(r.matches(&Request::new(HttpRequestMethod::Get, "/any", headers, None)));
        assert!(!r.matches(&request(HttpRequestMethod::Get, "/any")));
    }

    #[test]
    fn test_method_path_matcher_requires_both() {
        let r = route(Matcher::method_path(
            HttpRequestMethod::Post,
            PathMatcher::exact("/items"),
        ));
        assert!(r.matches(&request(HttpRequestMethod::Post, "/items")));
        assert!(!r.matches(&request(HttpRequestMethod::Get, "/items")));
        assert!(!r.matches(&request(HttpRequestMethod::Post, "/items/1")));

        let r = route(Matcher::method_path(
            HttpRequestMethod::Get,
            PathMatcher::pattern(r"^/items/\d+$").unwrap(),
        ));
        assert!(r.matches(&request(HttpRequestMethod::Get, "/items/3")));
        assert!(!r.matches(&request(HttpRequestMethod::Patch, "/items/3")));
    }

    #[test]
    fn test_matcher_equivalence_for_get_root() {
        let req = request(HttpRequestMethod::Get, "/");
        let exact = route(Matcher::exact("GET /"));
        let pattern = route(Matcher::pattern(r"^GET /$").unwrap());
        let predicate = route(Matcher::predicate(|req, _| {
            req.method() == HttpRequestMethod::Get && req.path() == "/"
        }));
        assert!(match_route(&exact, &req));
        assert!(match_route(&pattern, &req));
        assert!(match_route(&predicate, &req));
    }

    #[test]
    fn test_table_find_returns_first_registered() {
        let mut table = RouteTable::new();
        table
            .push(route(Matcher::exact("GET /a")).named("first"))
            .push(route(Matcher::pattern("/").unwrap()).named("second"));

        let found = table.find(&request(HttpRequestMethod::Get, "/a")).unwrap();
        assert_eq!(found.name(), Some("first"));
        let found = table.find(&request(HttpRequestMethod::Get, "/b")).unwrap();
        assert_eq!(found.name(), Some("second"));
        assert!(RouteTable::new().find(&request(HttpRequestMethod::Get, "/")).is_none());
        assert_eq!(table.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_first_match_is_lowest_index(flags in proptest::collection::vec(any::<bool>(), 1..10)) {
            let mut table = RouteTable::new();
            for (i, hit) in flags.iter().enumerate() {
                let hit = *hit;
                table.push(route(Matcher::predicate(move |_, _| hit)).named(&i.to_string()));
            }
            let found = table.find(&request(HttpRequestMethod::Get, "/"));
            let expected = flags.iter().position(|f| *f);
            prop_assert_eq!(
                found.and_then(|r| r.name().map(str::to_string)),
                expected.map(|i| i.to_string())
            );
        }
    }
}
