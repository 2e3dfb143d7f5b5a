//! 调用信封。
//!
//! # 契约（What）
//! - 携带方法名、实际方法名（泛化调用时不同）、参数类型名、参数值、原始实参与可选的回复槽；
//! - 附件（attachments）随请求经传输层可见，取值为字符串或字符串列表，支持并发读写；
//! - 属性（attributes）仅在进程内可见，取值为任意 `Send + Sync` 对象；
//! - 两张表都在首次写入时才分配；
//! - 可选地回指正在执行它的调用器。

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::{
    constant::{GROUP_KEY, INTERFACE_KEY, VERSION_KEY},
    error::RpcError,
    protocol::SharedInvoker,
    url::service_key,
};

/// 附件中记录服务路径的键。
pub const PATH_ATTACHMENT: &str = "path";

/// 附件取值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttachmentValue {
    Str(String),
    List(Vec<String>),
}

impl AttachmentValue {
    /// 标量视图：列表取第一个元素。
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttachmentValue::Str(value) => Some(value),
            AttachmentValue::List(values) => values.first().map(String::as_str),
        }
    }
}

impl From<&str> for AttachmentValue {
    fn from(value: &str) -> Self {
        AttachmentValue::Str(value.to_owned())
    }
}

impl From<String> for AttachmentValue {
    fn from(value: String) -> Self {
        AttachmentValue::Str(value)
    }
}

impl From<Vec<String>> for AttachmentValue {
    fn from(values: Vec<String>) -> Self {
        AttachmentValue::List(values)
    }
}

pub type Attachments = HashMap<String, AttachmentValue>;

type Attribute = Arc<dyn Any + Send + Sync>;

/// 回复槽：传输层把解码后的返回值写入此处，调用方在拿到结果后读取。
#[derive(Clone, Debug, Default)]
pub struct ReplySlot {
    inner: Arc<Mutex<Option<Value>>>,
}

impl ReplySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&self, value: Value) {
        *self.inner.lock() = Some(value);
    }

    pub fn get(&self) -> Option<Value> {
        self.inner.lock().clone()
    }

    pub fn take(&self) -> Option<Value> {
        self.inner.lock().take()
    }
}

/// 一次 RPC 调用。
pub struct RpcInvocation {
    method_name: String,
    actual_method_name: String,
    parameter_type_names: Vec<String>,
    parameter_values: Vec<Value>,
    arguments: Vec<Value>,
    reply: Option<ReplySlot>,
    attachments: RwLock<Option<Attachments>>,
    attributes: RwLock<Option<HashMap<String, Attribute>>>,
    invoker: RwLock<Option<SharedInvoker>>,
}

impl RpcInvocation {
    /// 以方法名与实参构造调用，参数值默认与实参一致。
    pub fn new(method_name: impl Into<String>, arguments: Vec<Value>) -> Self {
        let method_name = method_name.into();
        Self {
            actual_method_name: method_name.clone(),
            method_name,
            parameter_type_names: Vec::new(),
            parameter_values: arguments.clone(),
            arguments,
            reply: None,
            attachments: RwLock::new(None),
            attributes: RwLock::new(None),
            invoker: RwLock::new(None),
        }
    }

    pub fn with_actual_method_name(mut self, name: impl Into<String>) -> Self {
        self.actual_method_name = name.into();
        self
    }

    pub fn with_parameter_type_names(mut self, names: Vec<String>) -> Self {
        self.parameter_type_names = names;
        self
    }

    pub fn with_parameter_values(mut self, values: Vec<Value>) -> Self {
        self.parameter_values = values;
        self
    }

    pub fn with_reply(mut self, reply: ReplySlot) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn with_attachment(self, key: impl Into<String>, value: impl Into<AttachmentValue>) -> Self {
        self.set_attachment(key, value);
        self
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn actual_method_name(&self) -> &str {
        &self.actual_method_name
    }

    pub fn parameter_type_names(&self) -> &[String] {
        &self.parameter_type_names
    }

    pub fn parameter_values(&self) -> &[Value] {
        &self.parameter_values
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn reply(&self) -> Option<&ReplySlot> {
        self.reply.as_ref()
    }

    /// 传输层要求回复槽时使用；缺失即 [`RpcError::NoReply`]。
    pub fn require_reply(&self) -> Result<&ReplySlot, RpcError> {
        self.reply.as_ref().ok_or(RpcError::NoReply)
    }

    pub fn set_attachment(&self, key: impl Into<String>, value: impl Into<AttachmentValue>) {
        self.attachments
            .write()
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
    }

    pub fn attachment(&self, key: &str) -> Option<AttachmentValue> {
        self.attachments
            .read()
            .as_ref()
            .and_then(|map| map.get(key).cloned())
    }

    /// 附件的标量视图。
    pub fn attachment_str(&self, key: &str) -> Option<String> {
        self.attachment(key)
            .and_then(|value| value.as_str().map(str::to_owned))
    }

    /// 附件快照；从未写入时为空表。
    pub fn attachments(&self) -> Attachments {
        self.attachments.read().clone().unwrap_or_default()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Attribute) {
        self.attributes
            .write()
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<Attribute> {
        self.attributes
            .read()
            .as_ref()
            .and_then(|map| map.get(key).cloned())
    }

    /// 按具体类型读取属性。
    pub fn attribute_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.attribute(key)
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn set_invoker(&self, invoker: SharedInvoker) {
        *self.invoker.write() = Some(invoker);
    }

    pub fn invoker(&self) -> Option<SharedInvoker> {
        self.invoker.read().clone()
    }

    /// 由附件推导服务键：`interface` 附件优先，否则取 `path` 附件。
    pub fn service_key(&self) -> String {
        let interface = self
            .attachment_str(INTERFACE_KEY)
            .filter(|value| !value.is_empty())
            .or_else(|| self.attachment_str(PATH_ATTACHMENT))
            .unwrap_or_default();
        service_key(
            interface.trim_start_matches('/'),
            &self.attachment_str(GROUP_KEY).unwrap_or_default(),
            &self.attachment_str(VERSION_KEY).unwrap_or_default(),
        )
    }
}

impl fmt::Debug for RpcInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcInvocation")
            .field("method_name", &self.method_name)
            .field("actual_method_name", &self.actual_method_name)
            .field("arguments", &self.arguments)
            .field("attachments", &self.attachments())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attachment_and_attribute_maps_are_lazy() {
        let invocation = RpcInvocation::new("Echo", vec![json!("hi")]);
        assert!(invocation.attachments.read().is_none());
        assert!(invocation.attributes.read().is_none());

        invocation.set_attachment("group", "g1");
        invocation.set_attribute("retries", Arc::new(2_u32));
        assert_eq!(invocation.attachment_str("group").as_deref(), Some("g1"));
        assert_eq!(invocation.attribute_as::<u32>("retries").as_deref(), Some(&2));
        assert!(invocation.attribute_as::<String>("retries").is_none());
    }

    #[test]
    fn service_key_is_derived_from_attachments() {
        let invocation = RpcInvocation::new("Echo", Vec::new())
            .with_attachment(PATH_ATTACHMENT, "/Echo")
            .with_attachment(GROUP_KEY, "g1")
            .with_attachment(VERSION_KEY, "v1");
        assert_eq!(invocation.service_key(), "g1/Echo:v1");
    }

    #[test]
    fn missing_reply_slot_reports_no_reply() {
        let invocation = RpcInvocation::new("Echo", Vec::new());
        assert_eq!(invocation.require_reply().unwrap_err(), RpcError::NoReply);
        let slot = ReplySlot::new();
        let invocation = invocation.with_reply(slot.clone());
        invocation.require_reply().expect("已设置回复槽").fill(json!(1));
        assert_eq!(slot.take(), Some(json!(1)));
    }
}
