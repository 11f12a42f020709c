//! # 请求体 Schema 校验
//!
//! 类型化路由使用的 JSON Schema 子集：
//! `type`、`properties`、`required`、`additionalProperties`、`items`、`enum`、
//! `minimum`、`maximum`、`minLength`、`maxLength`、`pattern`、`minItems`、`maxItems`。
//!
//! Schema 在首次使用时编译，并按 **对象身份**（`Arc` 指针）缓存。结构相同但分别构造的
//! 两个 Schema 会被编译两次、缓存两份。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, warn};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::exception::Exception;

/// 一份 Schema 文档。
///
/// 通过 `Arc<Schema>` 共享；缓存以 `Arc` 的指针作为键。
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    document: Value,
}

impl Schema {
    pub fn from_json(document: Value) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// 接受任意值
    pub fn any() -> Self {
        Self::from_json(json!({}))
    }

    pub fn string() -> Self {
        Self::from_json(json!({ "type": "string" }))
    }

    pub fn number() -> Self {
        Self::from_json(json!({ "type": "number" }))
    }

    pub fn integer() -> Self {
        Self::from_json(json!({ "type": "integer" }))
    }

    pub fn boolean() -> Self {
        Self::from_json(json!({ "type": "boolean" }))
    }

    pub fn array(items: Schema) -> Self {
        Self::from_json(json!({ "type": "array", "items": items.document }))
    }

    pub fn object() -> Self {
        Self::from_json(json!({ "type": "object", "properties": {}, "required": [] }))
    }

    /// 添加一个必需属性
    pub fn property(self, name: &str, schema: Schema) -> Self {
        let mut this = self.optional(name, schema);
        if let Some(Value::Array(required)) = this.keywords().get_mut("required") {
            required.push(Value::String(name.to_string()));
        } else {
            this.keywords().insert("required".to_string(), json!([name]));
        }
        this
    }

    /// 添加一个可选属性
    pub fn optional(mut self, name: &str, schema: Schema) -> Self {
        let keywords = self.keywords();
        match keywords.get_mut("properties") {
            Some(Value::Object(props)) => {
                props.insert(name.to_string(), schema.document);
            }
            _ => {
                let mut props = Map::new();
                props.insert(name.to_string(), schema.document);
                keywords.insert("properties".to_string(), Value::Object(props));
            }
        }
        self
    }

    /// 禁止未声明的属性
    pub fn deny_additional(self) -> Self {
        self.with_keyword("additionalProperties", Value::Bool(false))
    }

    /// 设置任意关键字，例如 `minLength`
    pub fn with_keyword(mut self, keyword: &str, value: Value) -> Self {
        self.keywords().insert(keyword.to_string(), value);
        self
    }

    fn keywords(&mut self) -> &mut Map<String, Value> {
        if !self.document.is_object() {
            self.document = json!({});
        }
        match &mut self.document {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    fn parse(name: &str) -> Result<Self, Exception> {
        Ok(match name {
            "null" => JsonType::Null,
            "boolean" => JsonType::Boolean,
            "integer" => JsonType::Integer,
            "number" => JsonType::Number,
            "string" => JsonType::String,
            "array" => JsonType::Array,
            "object" => JsonType::Object,
            other => {
                return Err(Exception::InvalidSchema(format!("unknown type {:?}", other)))
            }
        })
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            JsonType::Null => value.is_null(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map_or(false, |f| f.fract() == 0.0)
            }
            JsonType::Number => value.is_number(),
            JsonType::String => value.is_string(),
            JsonType::Array => value.is_array(),
            JsonType::Object => value.is_object(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }
}

/// 编译后的校验器。
#[derive(Debug)]
pub struct Validator {
    types: Option<Vec<JsonType>>,
    properties: Vec<(String, Validator)>,
    required: Vec<String>,
    additional_properties: bool,
    items: Option<Box<Validator>>,
    enumeration: Option<Vec<Value>>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
    min_items: Option<usize>,
    max_items: Option<usize>,
}

/// 编译一份 Schema，不经过缓存。
pub fn compile(schema: &Schema) -> Result<Validator, Exception> {
    Validator::from_document(schema.document(), "#")
}

/// 校验一个值。该函数不会失败，返回 `false` 时由调用方决定如何报错。
pub fn validate(value: &Value, validator: &Validator) -> bool {
    validator.is_valid(value)
}

fn as_usize(doc: &Value, keyword: &str, at: &str) -> Result<Option<usize>, Exception> {
    match doc.get(keyword) {
        None => Ok(None),
        Some(v) => v.as_u64().map(|n| Some(n as usize)).ok_or_else(|| {
            Exception::InvalidSchema(format!("{}/{} must be a non-negative integer", at, keyword))
        }),
    }
}

fn as_f64(doc: &Value, keyword: &str, at: &str) -> Result<Option<f64>, Exception> {
    match doc.get(keyword) {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            Exception::InvalidSchema(format!("{}/{} must be a number", at, keyword))
        }),
    }
}

impl Validator {
    fn from_document(doc: &Value, at: &str) -> Result<Self, Exception> {
        let empty = Value::Object(Map::new());
        let doc = match doc {
            Value::Object(_) => doc,
            // `true` 等价于空 Schema
            Value::Bool(true) => &empty,
            _ => {
                return Err(Exception::InvalidSchema(format!(
                    "{} must be an object",
                    at
                )))
            }
        };

        let types = match doc.get("type") {
            None => None,
            Some(Value::String(name)) => Some(vec![JsonType::parse(name)?]),
            Some(Value::Array(names)) => Some(
                names
                    .iter()
                    .map(|n| match n.as_str() {
                        Some(name) => JsonType::parse(name),
                        None => Err(Exception::InvalidSchema(format!(
                            "{}/type entries must be strings",
                            at
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(_) => {
                return Err(Exception::InvalidSchema(format!(
                    "{}/type must be a string or an array",
                    at
                )))
            }
        };

        let mut properties = Vec::new();
        if let Some(props) = doc.get("properties") {
            let props = props.as_object().ok_or_else(|| {
                Exception::InvalidSchema(format!("{}/properties must be an object", at))
            })?;
            for (name, sub) in props {
                let sub_at = format!("{}/properties/{}", at, name);
                properties.push((name.clone(), Validator::from_document(sub, &sub_at)?));
            }
        }

        let required = match doc.get("required") {
            None => Vec::new(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str().map(str::to_string).ok_or_else(|| {
                        Exception::InvalidSchema(format!("{}/required entries must be strings", at))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(Exception::InvalidSchema(format!(
                    "{}/required must be an array",
                    at
                )))
            }
        };

        let additional_properties = match doc.get("additionalProperties") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(Exception::InvalidSchema(format!(
                    "{}/additionalProperties must be a boolean",
                    at
                )))
            }
        };

        let items = match doc.get("items") {
            None => None,
            Some(sub) => Some(Box::new(Validator::from_document(
                sub,
                &format!("{}/items", at),
            )?)),
        };

        let enumeration = match doc.get("enum") {
            None => None,
            Some(Value::Array(values)) => Some(values.clone()),
            Some(_) => {
                return Err(Exception::InvalidSchema(format!(
                    "{}/enum must be an array",
                    at
                )))
            }
        };

        let pattern = match doc.get("pattern") {
            None => None,
            Some(Value::String(p)) => Some(Regex::new(p).map_err(|e| {
                Exception::InvalidSchema(format!("{}/pattern: {}", at, e))
            })?),
            Some(_) => {
                return Err(Exception::InvalidSchema(format!(
                    "{}/pattern must be a string",
                    at
                )))
            }
        };

        Ok(Self {
            types,
            properties,
            required,
            additional_properties,
            items,
            enumeration,
            minimum: as_f64(doc, "minimum", at)?,
            maximum: as_f64(doc, "maximum", at)?,
            min_length: as_usize(doc, "minLength", at)?,
            max_length: as_usize(doc, "maxLength", at)?,
            pattern,
            min_items: as_usize(doc, "minItems", at)?,
            max_items: as_usize(doc, "maxItems", at)?,
        })
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.errors(value).is_empty()
    }

    /// 列出所有违反约束之处，路径以 `$` 表示根。
    pub fn errors(&self, value: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        self.collect(value, "$", &mut errors);
        errors
    }

    fn collect(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t.accepts(value)) {
                let names: Vec<&str> = types.iter().map(JsonType::as_str).collect();
                errors.push(format!("{}: expected {}", path, names.join(" or ")));
                return;
            }
        }

        if let Some(allowed) = &self.enumeration {
            if !allowed.contains(value) {
                errors.push(format!("{}: value not in enum", path));
            }
        }

        match value {
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    if self.minimum.map_or(false, |min| f < min) {
                        errors.push(format!("{}: below minimum", path));
                    }
                    if self.maximum.map_or(false, |max| f > max) {
                        errors.push(format!("{}: above maximum", path));
                    }
                }
            }
            Value::String(s) => {
                let len = s.chars().count();
                if self.min_length.map_or(false, |min| len < min) {
                    errors.push(format!("{}: shorter than minLength", path));
                }
                if self.max_length.map_or(false, |max| len > max) {
                    errors.push(format!("{}: longer than maxLength", path));
                }
                if let Some(re) = &self.pattern {
                    if !re.is_match(s) {
                        errors.push(format!("{}: does not match pattern", path));
                    }
                }
            }
            Value::Array(values) => {
                if self.min_items.map_or(false, |min| values.len() < min) {
                    errors.push(format!("{}: fewer than minItems", path));
                }
                if self.max_items.map_or(false, |max| values.len() > max) {
                    errors.push(format!("{}: more than maxItems", path));
                }
                if let Some(items) = &self.items {
                    for (i, item) in values.iter().enumerate() {
                        items.collect(item, &format!("{}[{}]", path, i), errors);
                    }
                }
            }
            Value::Object(map) => {
                for name in &self.required {
                    if !map.contains_key(name) {
                        errors.push(format!("{}.{}: missing required property", path, name));
                    }
                }
                for (name, sub) in &self.properties {
                    if let Some(v) = map.get(name) {
                        sub.collect(v, &format!("{}.{}", path, name), errors);
                    }
                }
                if !self.additional_properties {
                    for name in map.keys() {
                        if !self.properties.iter().any(|(p, _)| p == name) {
                            errors.push(format!("{}.{}: additional property not allowed", path, name));
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// 按 Schema 身份缓存的编译结果。
///
/// 条目从不淘汰，数量上限是注册过的不同 Schema 的个数。缓存同时持有 `Arc<Schema>`，
/// 保证作为键的指针在缓存存活期间不会被复用。
#[derive(Debug, Default)]
pub struct SchemaCache {
    compiled: Mutex<HashMap<usize, (Arc<Schema>, Arc<Validator>)>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<usize, (Arc<Schema>, Arc<Validator>)>> {
        match self.compiled.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("Schema缓存锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    /// 取得 Schema 对应的校验器，首次使用时编译。
    ///
    /// 两个请求同时首次使用同一个 Schema 时可能各自编译一次，先写入者胜出，返回值一致。
    pub fn compile(&self, schema: &Arc<Schema>) -> Result<Arc<Validator>, Exception> {
        let key = Arc::as_ptr(schema) as usize;
        if let Some((_, validator)) = self.lock().get(&key) {
            return Ok(Arc::clone(validator));
        }

        debug!("编译Schema: {}", schema.document());
        let validator = Arc::new(compile(schema)?);
        let mut cache = self.lock();
        let entry = cache
            .entry(key)
            .or_insert_with(|| (Arc::clone(schema), validator));
        Ok(Arc::clone(&entry.1))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo_bar() -> Schema {
        Schema::object()
            .property("foo", Schema::string())
            .property("bar", Schema::number())
    }

    #[test]
    fn test_foo_bar_schema() {
        let validator = compile(&foo_bar()).unwrap();
        assert!(validate(&json!({"foo": "str", "bar": 1}), &validator));
        assert!(!validate(&json!({}), &validator));
        assert!(!validate(&json!({"foo": 1, "bar": 1}), &validator));
        assert!(!validate(&json!("not an object"), &validator));
    }

    #[test]
    fn test_optional_and_additional() {
        let schema = Schema::object()
            .property("id", Schema::integer())
            .optional("note", Schema::string())
            .deny_additional();
        let validator = compile(&schema).unwrap();
        assert!(validator.is_valid(&json!({"id": 3})));
        assert!(validator.is_valid(&json!({"id": 3, "note": "hi"})));
        assert!(!validator.is_valid(&json!({"id": 3.5})));
        assert_eq!(
            validator.errors(&json!({"id": 3, "extra": true})),
            vec!["$.extra: additional property not allowed".to_string()]
        );
    }

    #[test]
    fn test_array_items_and_bounds() {
        let schema = Schema::array(Schema::string().with_keyword("minLength", json!(2)))
            .with_keyword("maxItems", json!(2));
        let validator = compile(&schema).unwrap();
        assert!(validator.is_valid(&json!(["ab", "cd"])));
        assert_eq!(
            validator.errors(&json!(["ab", "c"])),
            vec!["$[1]: shorter than minLength".to_string()]
        );
        assert!(!validator.is_valid(&json!(["ab", "cd", "ef"])));
    }

    #[test]
    fn test_enum_pattern_and_range() {
        let schema = Schema::from_json(json!({
            "type": "object",
            "properties": {
                "color": { "enum": ["red", "green"] },
                "code": { "type": "string", "pattern": "^[A-Z]{3}$" },
                "age": { "type": ["integer", "null"], "minimum": 0, "maximum": 150 }
            }
        }));
        let validator = compile(&schema).unwrap();
        assert!(validator.is_valid(&json!({"color": "red", "code": "ABC", "age": null})));
        assert!(!validator.is_valid(&json!({"color": "blue"})));
        assert!(!validator.is_valid(&json!({"code": "abc"})));
        assert!(!validator.is_valid(&json!({"age": 200})));
    }

    #[test]
    fn test_invalid_schemas_rejected() {
        for doc in [
            json!({"type": "decimal"}),
            json!({"type": "string", "pattern": "("}),
            json!({"required": "foo"}),
            json!(42),
        ] {
            assert!(matches!(
                compile(&Schema::from_json(doc)),
                Err(Exception::InvalidSchema(_))
            ));
        }
    }

    #[test]
    fn test_cache_returns_same_instance_for_same_identity() {
        let cache = SchemaCache::new();
        let schema = Arc::new(foo_bar());

        let first = cache.compile(&schema).unwrap();
        let second = cache.compile(&Arc::clone(&schema)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_is_identity_keyed_not_structural() {
        let cache = SchemaCache::new();
        let a = Arc::new(foo_bar());
        let b = Arc::new(foo_bar());
        assert_eq!(a, b);

        let va = cache.compile(&a).unwrap();
        let vb = cache.compile(&b).unwrap();

        assert!(!Arc::ptr_eq(&va, &vb));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_does_not_store_failed_compilation() {
        let cache = SchemaCache::new();
        let bad = Arc::new(Schema::from_json(json!({"type": 1})));
        assert!(cache.compile(&bad).is_err());
        assert!(cache.is_empty());
    }
}
