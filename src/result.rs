//! Response envelope for outer surfaces

use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceResult<T> {
    pub entity: Option<T>,
    pub status: Status,
    pub message: String,
}

impl<T> ServiceResult<T> {
    pub fn ok(entity: T, message: impl Into<String>) -> Self {
        ServiceResult { entity: Some(entity), status: Status::Success, message: message.into() }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ServiceResult { entity: None, status: Status::Error, message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Wrap an operation outcome; `what` names the successful action.
    pub fn from_result(r: Result<T>, what: &str) -> Self {
        match r {
            Ok(entity) => Self::ok(entity, what),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GrantError;

    #[test]
    fn test_envelope_shape() {
        let ok = ServiceResult::from_result(Ok(7u32), "counted");
        assert!(ok.is_success());
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["status"], "SUCCESS");
        assert_eq!(v["entity"], 7);

        let bad: ServiceResult<u32> = ServiceResult::from_result(Err(GrantError::not_found("group", "g1")), "x");
        let v = serde_json::to_value(&bad).unwrap();
        assert_eq!(v["status"], "ERROR");
        assert!(v["entity"].is_null());
        assert_eq!(v["message"], "group g1 does not exist");
    }
}
