//! Wire envelope for requests exchanged between sites.

use crate::error::{OtError, OtResult};
use crate::request::Request;
use serde::{Deserialize, Serialize};

/// Current wire protocol version
pub const WIRE_VERSION: u32 = 1;

/// A request as sent over the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Protocol version of the sender
    pub version: u32,
    pub request: Request,
}

impl WireRequest {
    pub fn new(request: Request) -> Self {
        Self {
            version: WIRE_VERSION,
            request,
        }
    }

    /// Encode a request to wire format
    pub fn encode(request: &Request) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireRequest::new(request.clone()))
    }

    /// Decode and check a request from wire format.
    ///
    /// Unknown versions and structurally invalid operations are rejected as
    /// [`OtError::Malformed`].
    pub fn decode(data: &[u8]) -> OtResult<Request> {
        let wire: WireRequest =
            serde_json::from_slice(data).map_err(|e| OtError::Malformed(e.to_string()))?;

        if wire.version != WIRE_VERSION {
            return Err(OtError::Malformed(format!(
                "unsupported wire version {}",
                wire.version
            )));
        }
        wire.request.operation.validate()?;

        Ok(wire.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::state_vector::StateVector;
    use crate::user::UserId;

    #[test]
    fn test_wire_encode_decode() {
        let request = Request::new(
            UserId(1),
            "1:2;3:1".parse::<StateVector>().unwrap(),
            Operation::compound(vec![Operation::remove(0, "ab"), Operation::insert(1, "c")]),
        );

        let data = WireRequest::encode(&request).unwrap();
        let decoded = WireRequest::decode(&data).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_wire_rejects_garbage() {
        assert!(matches!(
            WireRequest::decode(b"{not json"),
            Err(OtError::Malformed(_))
        ));
        assert!(matches!(
            WireRequest::decode(br#"{"version":1,"request":{"user":1,"origin":{},"operation":{"type":"rotate"}}}"#),
            Err(OtError::Malformed(_))
        ));
    }

    #[test]
    fn test_wire_rejects_unknown_version() {
        let wire = br#"{"version":7,"request":{"user":1,"origin":{},"operation":{"type":"no_op"}}}"#;
        let err = WireRequest::decode(wire).unwrap_err();
        assert_eq!(err, OtError::Malformed("unsupported wire version 7".into()));
    }

    #[test]
    fn test_wire_rejects_inconsistent_delete() {
        let wire = br#"{"version":1,"request":{"user":1,"origin":{"2":4},
            "operation":{"type":"delete","position":0,"length":1,"text":"ab"}}}"#;
        assert!(matches!(
            WireRequest::decode(wire),
            Err(OtError::Malformed(_))
        ));
    }
}
