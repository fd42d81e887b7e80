//! Wire types for the Arbiter authorization RPC.
//!
//! # Purpose
//! Exposes the protobuf messages and the tonic client/server bindings of
//! `arbiter.auth.v1.AuthService`, the RPC protocol adapters use to identify
//! things and check channel access.
//!
//! # Notes
//! The bindings in `auth.v1.rs` are generated from `proto/auth.proto` with
//! `tonic-build` and checked in, so building this crate does not require
//! `protoc`. Regenerate them whenever the proto changes.
//!
//! # Examples
//! ```rust
//! use arbiter_wire::auth::v1::AuthorizeReq;
//!
//! let req = AuthorizeReq {
//!     channel_id: "c1".into(),
//!     thing_key: "secret".into(),
//!     permission: "publish".into(),
//!     ..Default::default()
//! };
//! assert!(req.thing_id.is_empty());
//! ```

pub mod auth {
    pub mod v1 {
        include!("auth.v1.rs");
    }
}

/// Fully qualified gRPC service name.
pub const AUTH_SERVICE_NAME: &str = "arbiter.auth.v1.AuthService";

#[cfg(test)]
mod tests {
    use super::auth::v1::*;
    use prost::Message;

    #[test]
    fn authorize_request_keeps_field_tags() {
        let req = AuthorizeReq {
            channel_id: "chan".into(),
            thing_id: String::new(),
            thing_key: "key".into(),
            permission: "subscribe".into(),
        };
        let bytes = req.encode_to_vec();
        // Field 1 (channel_id) is length-delimited: tag byte 0x0a.
        assert_eq!(bytes[0], 0x0a);
        let decoded = AuthorizeReq::decode(bytes.as_slice()).expect("decode");
        assert_eq!(decoded, req);
    }

    #[test]
    fn empty_response_decodes_to_defaults() {
        let decoded = RetrieveEntitiesRes::decode(&[][..]).expect("decode");
        assert_eq!(decoded.total, 0);
        assert!(decoded.entities.is_empty());
    }

    #[test]
    fn service_name_matches_generated_paths() {
        assert_eq!(
            auth_service_server::SERVICE_NAME,
            super::AUTH_SERVICE_NAME
        );
    }
}
