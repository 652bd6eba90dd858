//! FlexVolume driver responses
//!
//! Every call prints exactly one JSON object on stdout and exits with a code
//! the kubelet interprets alongside the `status` field.

use crate::error::{Error, ErrorAction};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Call completed
pub const EXIT_SUCCESS: i32 = 0;
/// The engine failed, the call may be retried
pub const EXIT_FAILURE: i32 = 1;
/// The call itself was malformed or unknown
pub const EXIT_BAD_CALL: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
    #[serde(rename = "Not supported")]
    NotSupported,
}

/// Optional driver features announced by `init`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub attach: bool,
}

/// JSON document printed for a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl Response {
    fn with_status(status: Status, message: String) -> Self {
        Self {
            status,
            message,
            device: None,
            attached: None,
            volume_name: None,
            capabilities: None,
        }
    }

    pub fn success() -> Self {
        Self::with_status(Status::Success, String::new())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::with_status(Status::Failure, message.into())
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::with_status(Status::NotSupported, message.into())
    }

    pub fn device(device: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            ..Self::success()
        }
    }

    pub fn attached(attached: bool) -> Self {
        Self {
            attached: Some(attached),
            ..Self::success()
        }
    }

    pub fn volume_name(name: impl Into<String>) -> Self {
        Self {
            volume_name: Some(name.into()),
            ..Self::success()
        }
    }

    pub fn capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities: Some(capabilities),
            ..Self::success()
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"Failure","message":"unable to encode response"}"#.to_string()
        })
    }
}

/// Response together with the process exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub exit_code: i32,
}

impl Reply {
    pub fn ok(response: Response) -> Self {
        Self {
            response,
            exit_code: EXIT_SUCCESS,
        }
    }

    /// Malformed call
    pub fn bad_call(response: Response) -> Self {
        Self {
            response,
            exit_code: EXIT_BAD_CALL,
        }
    }

    /// Failure of `verb`, exit code chosen by the error's classification
    pub fn from_error(verb: &str, err: &Error) -> Self {
        error!("{} failed: {}", verb, err);

        let exit_code = match err.action() {
            ErrorAction::RejectCall => EXIT_BAD_CALL,
            ErrorAction::RetryCall | ErrorAction::Abort => EXIT_FAILURE,
        };
        Self {
            response: Response::failure(format!("{}: {}", verb, err)),
            exit_code,
        }
    }
}
