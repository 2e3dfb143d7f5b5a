//! 结果信封。
//!
//! 结果恰好持有“值”或“错误”之一，外加独立于请求附件的结果附件。
//! 值本身可以缺省（`Ok(None)`），表示方法没有返回内容。调用方必须先检查 [`RpcResult::error`]
//! 再读取值。

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    error::RpcError,
    invocation::{AttachmentValue, Attachments},
};

#[derive(Clone, Debug)]
pub struct RpcResult {
    outcome: Result<Option<Value>, RpcError>,
    attachments: Attachments,
}

impl RpcResult {
    pub fn from_value(value: Value) -> Self {
        Self::from_outcome(Ok(Some(value)))
    }

    /// 无返回内容的成功结果。
    pub fn empty() -> Self {
        Self::from_outcome(Ok(None))
    }

    pub fn from_error(error: RpcError) -> Self {
        Self::from_outcome(Err(error))
    }

    pub fn from_outcome(outcome: Result<Option<Value>, RpcError>) -> Self {
        Self {
            outcome,
            attachments: Attachments::new(),
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.outcome.as_ref().err()
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok().and_then(Option::as_ref)
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn set_error(&mut self, error: RpcError) {
        self.outcome = Err(error);
    }

    pub fn set_value(&mut self, value: Option<Value>) {
        self.outcome = Ok(value);
    }

    pub fn outcome(&self) -> &Result<Option<Value>, RpcError> {
        &self.outcome
    }

    pub fn into_outcome(self) -> Result<Option<Value>, RpcError> {
        self.outcome
    }

    /// 将值反序列化为具体类型；缺省值按 JSON `null` 处理。
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        match &self.outcome {
            Err(err) => Err(err.clone()),
            Ok(value) => serde_json::from_value(value.clone().unwrap_or(Value::Null)).map_err(
                |err| RpcError::application(format!("failed to decode result: {err}")),
            ),
        }
    }

    pub fn with_attachments(mut self, attachments: Attachments) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<AttachmentValue>) {
        self.attachments.insert(key.into(), value.into());
    }

    pub fn attachment(&self, key: &str) -> Option<&AttachmentValue> {
        self.attachments.get(key)
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }
}

impl From<Result<Option<Value>, RpcError>> for RpcResult {
    fn from(outcome: Result<Option<Value>, RpcError>) -> Self {
        Self::from_outcome(outcome)
    }
}

impl From<RpcError> for RpcResult {
    fn from(error: RpcError) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_and_value_are_exclusive() {
        let mut result = RpcResult::from_value(json!("pong"));
        assert!(result.error().is_none());
        result.set_error(RpcError::ClientClosed);
        assert!(result.value().is_none(), "写入错误后不应再暴露值");
        assert_eq!(result.error(), Some(&RpcError::ClientClosed));
    }

    #[test]
    fn decode_propagates_the_stored_error() {
        let result = RpcResult::from_error(RpcError::NoReply);
        assert_eq!(result.decode::<String>().unwrap_err(), RpcError::NoReply);
        let ok = RpcResult::from_value(json!(7));
        assert_eq!(ok.decode::<u32>().expect("数字可解码"), 7);
    }
}
