//! Algorithm execution results.

use serde::{Deserialize, Serialize};

use crate::iov::Iov;

/// What a single `Algorithm::execute` call returned.
///
/// The integer values match the original calibration framework's codes so
/// external algorithm processes can report their result as an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Ok,
    Iterate,
    NotEnoughData,
    Failure,
    Undefined,
}

impl ResultCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ResultCode::Ok,
            1 => ResultCode::Iterate,
            2 => ResultCode::NotEnoughData,
            3 => ResultCode::Failure,
            _ => ResultCode::Undefined,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::Iterate => 1,
            ResultCode::NotEnoughData => 2,
            ResultCode::Failure => 3,
            ResultCode::Undefined => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::Iterate => "Iterate",
            ResultCode::NotEnoughData => "NotEnoughData",
            ResultCode::Failure => "Failure",
            ResultCode::Undefined => "Undefined",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An execution result tagged with the IoV it was produced over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IovResult {
    pub iov: Iov,
    pub code: ResultCode,
}

impl IovResult {
    pub fn new(iov: Iov, code: ResultCode) -> Self {
        Self { iov, code }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in [
            ResultCode::Ok,
            ResultCode::Iterate,
            ResultCode::NotEnoughData,
            ResultCode::Failure,
            ResultCode::Undefined,
        ] {
            assert_eq!(ResultCode::from_code(code.code()), code);
        }
    }

    #[test]
    fn test_unknown_code_is_undefined() {
        assert_eq!(ResultCode::from_code(42), ResultCode::Undefined);
        assert_eq!(ResultCode::from_code(-1), ResultCode::Undefined);
    }
}
