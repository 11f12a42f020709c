//! 标头集合：名称统一折叠为小写，同名标头按到达顺序保留为序列。

use std::collections::btree_map::{self, BTreeMap};

/// 单个标头名对应的值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValue {
    /// 第一个值。对于 `Multiple` 即最先到达的那个。
    pub fn first(&self) -> &str {
        match self {
            HeaderValue::Single(v) => v,
            HeaderValue::Multiple(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// 按到达顺序返回全部值
    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderValue::Single(v) => vec![v.as_str()],
            HeaderValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::Single(v) => {
                let first = std::mem::take(v);
                *self = HeaderValue::Multiple(vec![first, value]);
            }
            HeaderValue::Multiple(vs) => vs.push(value),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Single(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Single(v)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(vs: Vec<String>) -> Self {
        HeaderValue::Multiple(vs)
    }
}

/// 名称大小写不敏感的标头集合，按名称排序迭代。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: BTreeMap<String, HeaderValue>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置标头，覆盖同名的已有值。
    pub fn insert(&mut self, name: &str, value: impl Into<HeaderValue>) -> &mut Self {
        self.map.insert(name.to_lowercase(), value.into());
        self
    }

    /// 追加一个值。同名标头已存在时转为序列；空值被丢弃。
    pub fn append(&mut self, name: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            return self;
        }
        match self.map.entry(name.to_lowercase()) {
            btree_map::Entry::Occupied(mut e) => e.get_mut().push(value.to_string()),
            btree_map::Entry::Vacant(e) => {
                e.insert(HeaderValue::Single(value.to_string()));
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.map.get(&name.to_lowercase())
    }

    /// 标头的第一个值
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).map(HeaderValue::first)
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.get(name).map(HeaderValue::values).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.map.remove(&name.to_lowercase())
    }

    /// 以 `other` 中的值覆盖同名标头
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.map.insert(name.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, HeaderValue> {
        self.map.iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a String, &'a HeaderValue);
    type IntoIter = btree_map::Iter<'a, String, HeaderValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value.as_ref());
        }
        headers
    }
}
