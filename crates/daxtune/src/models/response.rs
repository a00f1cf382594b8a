use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::time::now_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseWarning {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub status: ResponseStatus,
    pub operation: String,
    pub generated_at_utc: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ResponseWarning>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ToolResponse {
    #[must_use]
    pub fn success(operation: impl Into<String>) -> Self {
        Self::base(operation, ResponseStatus::Success)
    }

    #[must_use]
    pub fn error(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut response = Self::base(operation, ResponseStatus::Error);
        response.error = Some(message.into());
        response.error_code = Some(code.into());
        response
    }

    fn base(operation: impl Into<String>, status: ResponseStatus) -> Self {
        Self {
            status,
            operation: operation.into(),
            generated_at_utc: now_utc(),
            error: None,
            error_code: None,
            warnings: Vec::new(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    #[must_use]
    pub fn with_warning(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.warnings.push(ResponseWarning {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = ResponseWarning>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    #[must_use]
    pub fn with_error_details(self, details: Value) -> Self {
        self.with_field("details", details)
    }

    #[must_use]
    pub fn to_json_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(encoded) => encoded,
            Err(_) => format!(
                r#"{{"status":"error","operation":"{}","error":"response serialization failure"}}"#,
                self.operation
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolResponseFailure {
    response: ToolResponse,
}

impl ToolResponseFailure {
    #[must_use]
    pub fn new(response: ToolResponse) -> Self {
        Self { response }
    }

    #[must_use]
    pub fn response(&self) -> &ToolResponse {
        &self.response
    }
}

impl Display for ToolResponseFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.response.to_json_line())
    }
}

impl std::error::Error for ToolResponseFailure {}
