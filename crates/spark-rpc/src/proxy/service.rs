//! # 服务登记表
//!
//! ## 契约（What）
//! - [`ServiceMap`] 以 `(协议, 服务键)` 为键登记 [`ServiceDefinition`]；
//! - [`MethodDescriptor`] 是类型化可调用包装：名称、声明的参数类型、返回类型、原始实参标记与异步处理器；
//! - 登记期校验：方法名非空、方法名不重复、原始实参方法不得声明参数；
//! - 调用期只做廉价的实参个数与形状检查。
//!
//! ## 返回约定（How）
//! - 返回类型为 [`ReturnType::Unit`] 时结果总是“无返回”；
//! - 处理器返回 JSON `null` 且返回类型不是 [`ReturnType::Optional`] 时，同样视为“无返回”。

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    sync::Arc,
};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{context::CallContext, error::RpcError, invocation::Attachments};

/// 参数类型描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamType {
    Any,
    Bool,
    Integer,
    Float,
    String,
    List,
    /// 结构体或映射，允许 `null` 表示零值。
    Object(&'static str),
    /// 由反序列化决定是否接受的具体 Rust 类型。
    Typed(&'static str),
}

impl ParamType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::Any | ParamType::Typed(_) => true,
            ParamType::Bool => value.is_boolean(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::List => value.is_array(),
            ParamType::Object(_) => value.is_object() || value.is_null(),
        }
    }
}

/// 返回类型描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnType {
    Unit,
    Value(ParamType),
    /// 可空返回：`null` 作为有效值保留。
    Optional(ParamType),
}

/// 方法调用时交给处理器的输入。
#[derive(Clone, Debug)]
pub struct MethodCall {
    pub context: CallContext,
    pub attachments: Attachments,
    pub arguments: Vec<Value>,
}

impl MethodCall {
    /// 将第 `index` 个实参反序列化为具体类型。
    pub fn argument<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self.arguments.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| RpcError::ArgumentMismatch {
            method: String::new(),
            detail: format!("argument #{index}: {err}"),
        })
    }
}

pub type MethodOutcome = Result<Option<Value>, RpcError>;

type MethodHandler = Arc<dyn Fn(MethodCall) -> BoxFuture<'static, MethodOutcome> + Send + Sync>;

/// 方法描述。
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    params: Vec<ParamType>,
    returns: ReturnType,
    raw_arguments: bool,
    handler: MethodHandler,
}

impl MethodDescriptor {
    /// 以声明的参数与返回类型构造。
    pub fn new<F, Fut>(
        name: impl Into<String>,
        params: Vec<ParamType>,
        returns: ReturnType,
        handler: F,
    ) -> Self
    where
        F: Fn(MethodCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodOutcome> + Send + 'static,
    {
        Self {
            name: name.into(),
            params,
            returns,
            raw_arguments: false,
            handler: Arc::new(move |call| Box::pin(handler(call))),
        }
    }

    /// 原始实参方法：不声明参数，全部实参作为一个 JSON 数组交给第一个位置。
    pub fn raw<F, Fut>(name: impl Into<String>, returns: ReturnType, handler: F) -> Self
    where
        F: Fn(MethodCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodOutcome> + Send + 'static,
    {
        let mut descriptor = Self::new(name, Vec::new(), returns, handler);
        descriptor.raw_arguments = true;
        descriptor
    }

    /// 单参数类型化方法：实参反序列化为 `Req`，返回值序列化自 `Resp`。
    pub fn unary<Req, Resp, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
    {
        let name = name.into();
        let method = name.clone();
        let handler = Arc::new(handler);
        Self::new(
            name,
            vec![ParamType::Typed(std::any::type_name::<Req>())],
            ReturnType::Value(ParamType::Typed(std::any::type_name::<Resp>())),
            move |call: MethodCall| {
                let handler = Arc::clone(&handler);
                let method = method.clone();
                async move {
                    let request: Req = call.argument(0).map_err(|err| match err {
                        RpcError::ArgumentMismatch { detail, .. } => {
                            RpcError::ArgumentMismatch { method, detail }
                        }
                        other => other,
                    })?;
                    let response = handler(call.context, request).await?;
                    serde_json::to_value(response).map(Some).map_err(|err| {
                        RpcError::application(format!("failed to encode reply: {err}"))
                    })
                }
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    pub fn returns(&self) -> &ReturnType {
        &self.returns
    }

    pub fn is_raw_arguments(&self) -> bool {
        self.raw_arguments
    }

    fn validate(&self, service: &str) -> Result<(), RpcError> {
        if self.name.is_empty() {
            return Err(RpcError::Configuration {
                detail: format!("service `{service}` declares a method without a name"),
            });
        }
        if self.raw_arguments && !self.params.is_empty() {
            return Err(RpcError::Configuration {
                detail: format!(
                    "raw-arguments method `{}` of service `{service}` must not declare parameters",
                    self.name
                ),
            });
        }
        Ok(())
    }

    /// 调用期实参检查并整理为处理器输入。
    pub fn prepare_arguments(&self, arguments: &[Value]) -> Result<Vec<Value>, RpcError> {
        if self.raw_arguments {
            return Ok(vec![Value::Array(arguments.to_vec())]);
        }
        if arguments.len() != self.params.len() {
            return Err(RpcError::ArgumentMismatch {
                method: self.name.clone(),
                detail: format!(
                    "expected {} arguments, got {}",
                    self.params.len(),
                    arguments.len()
                ),
            });
        }
        if let Some((index, (expected, _))) = self
            .params
            .iter()
            .zip(arguments)
            .enumerate()
            .find(|(_, (expected, actual))| !expected.accepts(actual))
        {
            return Err(RpcError::ArgumentMismatch {
                method: self.name.clone(),
                detail: format!("argument #{index} does not match {expected:?}"),
            });
        }
        Ok(arguments.to_vec())
    }

    pub(crate) fn call(&self, call: MethodCall) -> BoxFuture<'static, MethodOutcome> {
        (self.handler)(call)
    }

    /// 按返回类型规整处理器输出。
    pub fn normalize_reply(&self, reply: Option<Value>) -> Option<Value> {
        match (&self.returns, reply) {
            (ReturnType::Unit, _) => None,
            (ReturnType::Optional(_), reply) => reply,
            (ReturnType::Value(_), Some(Value::Null)) => None,
            (ReturnType::Value(_), reply) => reply,
        }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("raw_arguments", &self.raw_arguments)
            .finish_non_exhaustive()
    }
}

/// 一个业务服务及其方法表。
#[derive(Clone, Debug)]
pub struct ServiceDefinition {
    name: String,
    methods: BTreeMap<String, MethodDescriptor>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    /// 登记方法并做登记期校验。
    pub fn with_method(mut self, method: MethodDescriptor) -> Result<Self, RpcError> {
        method.validate(&self.name)?;
        if self.methods.contains_key(method.name()) {
            return Err(RpcError::DuplicateMethod {
                service: self.name.clone(),
                method: method.name().to_owned(),
            });
        }
        self.methods.insert(method.name().to_owned(), method);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// 服务登记表。
#[derive(Default)]
pub struct ServiceMap {
    services: RwLock<HashMap<(String, String), Arc<ServiceDefinition>>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        protocol: impl Into<String>,
        service_key: impl Into<String>,
        definition: ServiceDefinition,
    ) -> Result<Arc<ServiceDefinition>, RpcError> {
        let key = (protocol.into(), service_key.into());
        let mut services = self.services.write();
        if services.contains_key(&key) {
            return Err(RpcError::DuplicateExtension {
                kind: "service",
                name: format!("{}:{}", key.0, key.1),
            });
        }
        let definition = Arc::new(definition);
        services.insert(key, Arc::clone(&definition));
        Ok(definition)
    }

    pub fn unregister(&self, protocol: &str, service_key: &str) -> Option<Arc<ServiceDefinition>> {
        self.services
            .write()
            .remove(&(protocol.to_owned(), service_key.to_owned()))
    }

    pub fn get(&self, protocol: &str, service_key: &str) -> Option<Arc<ServiceDefinition>> {
        self.services
            .read()
            .get(&(protocol.to_owned(), service_key.to_owned()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> MethodDescriptor {
        MethodDescriptor::new(
            "Echo",
            vec![ParamType::String],
            ReturnType::Value(ParamType::String),
            |call: MethodCall| async move { Ok(call.arguments.into_iter().next()) },
        )
    }

    #[test]
    fn duplicate_method_is_rejected_at_registration() {
        let err = ServiceDefinition::new("Echo")
            .with_method(echo())
            .and_then(|def| def.with_method(echo()))
            .unwrap_err();
        assert_eq!(err.code(), "rpc.proxy.duplicate_method");
    }

    #[test]
    fn raw_method_declaring_params_is_rejected() {
        let mut raw = MethodDescriptor::raw("Raw", ReturnType::Unit, |_call: MethodCall| async {
            Ok(None)
        });
        raw.params.push(ParamType::Any);
        let err = ServiceDefinition::new("Svc").with_method(raw).unwrap_err();
        assert!(matches!(err, RpcError::Configuration { .. }));
    }

    #[test]
    fn prepare_arguments_checks_arity_and_shape() {
        let method = echo();
        assert!(method.prepare_arguments(&[json!("hi")]).is_ok());
        assert!(matches!(
            method.prepare_arguments(&[]),
            Err(RpcError::ArgumentMismatch { .. })
        ));
        assert!(matches!(
            method.prepare_arguments(&[json!(1)]),
            Err(RpcError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn raw_arguments_are_passed_as_one_value() {
        let raw = MethodDescriptor::raw("Raw", ReturnType::Unit, |_call: MethodCall| async {
            Ok(None)
        });
        let prepared = raw
            .prepare_arguments(&[json!(1), json!("two")])
            .expect("原始实参不做形状检查");
        assert_eq!(prepared, vec![json!([1, "two"])]);
    }

    #[test]
    fn null_reply_is_no_result_unless_optional() {
        let method = echo();
        assert_eq!(method.normalize_reply(Some(Value::Null)), None);
        let optional = MethodDescriptor::new(
            "Find",
            Vec::new(),
            ReturnType::Optional(ParamType::Object("User")),
            |_call: MethodCall| async { Ok(Some(Value::Null)) },
        );
        assert_eq!(optional.normalize_reply(Some(Value::Null)), Some(Value::Null));
    }
}
