//! Core types for the fleet lifecycle orchestration engine.
//!
//! Defines the domain types shared by the executor and gateway: VM identity
//! and records, hypervisor sessions and task handles, and the versioned
//! resource model every lifecycle operation writes through.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod id;
pub mod resource;
pub mod session;
pub mod task;
pub mod vm;

pub use error::CoreError;
pub use id::{ContentHash, OperationId, VmId, VmName};
pub use resource::{
    validate_segment, Attributes, CacheScope, ResourceKind, ResourceVersion, VersionHandle,
};
pub use session::{AuthSession, SessionSource, AUTH_SESSION_TTL};
pub use task::{TaskHandle, TaskOutcome, TASK_EXIT_OK};
pub use vm::{VmRecord, VmStatus};

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};

    use super::*;

    #[test]
    fn task_handle_parse_extracts_node() {
        let upid = "UPID:pve1:0000A1B2:00C3D4E5:65F00000:qmstart:101:root@pam:";
        let handle = match TaskHandle::parse(upid) {
            Ok(h) => h,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(handle.node, "pve1");
        assert_eq!(handle.upid, upid, "upid must be kept verbatim");
    }

    #[test]
    fn task_handle_parse_rejects_malformed() {
        assert!(TaskHandle::parse("").is_err());
        assert!(TaskHandle::parse("TASK:pve1:1").is_err());
        assert!(TaskHandle::parse("UPID::0001").is_err());
        assert!(TaskHandle::parse("UPID").is_err());
    }

    #[test]
    fn task_outcome_success_requires_exact_ok() {
        assert!(TaskOutcome::from_exit_status("OK", 1).success);
        assert!(!TaskOutcome::from_exit_status("ok", 1).success);
        assert!(!TaskOutcome::from_exit_status("OK ", 1).success);
        assert!(!TaskOutcome::from_exit_status("command 'qm start' failed", 3).success);
    }

    #[test]
    fn session_freshness_is_bounded_by_ttl() {
        let now = Utc::now();
        let young = AuthSession::obtained_at("t", "c", "root@pam", now - TimeDelta::minutes(30));
        let old = AuthSession::obtained_at("t", "c", "root@pam", now - TimeDelta::hours(3));
        assert!(young.is_fresh(AUTH_SESSION_TTL, now));
        assert!(!old.is_fresh(AUTH_SESSION_TTL, now));
    }

    #[test]
    fn session_from_the_future_has_zero_age() {
        let now = Utc::now();
        let skewed = AuthSession::obtained_at("t", "c", "p", now + TimeDelta::minutes(5));
        assert_eq!(skewed.age(now), Duration::ZERO);
    }

    #[test]
    fn session_debug_redacts_secrets() {
        let session = AuthSession::new("PVE:secret-ticket", "csrf-secret", "root@pam");
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret-ticket"), "ticket leaked: {debug}");
        assert!(!debug.contains("csrf-secret"), "csrf token leaked: {debug}");
        assert!(debug.contains("root@pam"));
    }

    #[test]
    fn vm_status_maps_hypervisor_strings() {
        assert_eq!(VmStatus::from_hypervisor("running"), VmStatus::Running);
        assert_eq!(VmStatus::from_hypervisor("stopped"), VmStatus::Stopped);
        assert_eq!(VmStatus::from_hypervisor("paused"), VmStatus::Unknown);
    }

    #[test]
    fn vm_record_serializes_camel_case_with_null_ip() {
        let record = VmRecord::new(VmId::new(101), VmName::new("alpha"), VmStatus::Stopped);
        let json = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => panic!("serialization failed: {e}"),
        };
        assert_eq!(json["vmid"], 101);
        assert_eq!(json["name"], "alpha");
        assert_eq!(json["status"], "stopped");
        assert!(json["ip"].is_null(), "missing ip must serialize as null");
        assert!(json.get("observedAt").is_some(), "expected camelCase keys");
    }

    #[test]
    fn vm_record_ip_serializes_as_dotted_quad() {
        let mut record = VmRecord::new(VmId::new(7), VmName::new("beta"), VmStatus::Running);
        record.ip = Some(Ipv4Addr::new(10, 0, 0, 50));
        let json = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => panic!("serialization failed: {e}"),
        };
        assert_eq!(json["ip"], "10.0.0.50");
    }

    #[test]
    fn content_hash_display_round_trips_through_from_str() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xde;
        bytes[1] = 0xad;
        bytes[31] = 0xff;
        let hash = ContentHash::new(bytes);
        let s = hash.to_string();
        assert!(s.starts_with("dead"), "expected hex starting with 'dead', got {s}");
        assert_eq!(s.len(), 64, "SHA-256 hex must be 64 chars");
        let parsed: ContentHash = match s.parse() {
            Ok(h) => h,
            Err(e) => panic!("parse failed: {e}"),
        };
        assert_eq!(parsed, hash);
    }

    #[test]
    fn content_hash_rejects_bad_hex() {
        assert!("abc".parse::<ContentHash>().is_err());
        assert!("zz".repeat(32).parse::<ContentHash>().is_err());
    }

    #[test]
    fn validate_segment_rejects_path_traversal() {
        assert!(validate_segment("name", "alpha").is_ok());
        assert!(validate_segment("name", "web-01.example").is_ok());
        assert!(validate_segment("name", "").is_err());
        assert!(validate_segment("name", "..").is_err());
        assert!(validate_segment("name", "a/b").is_err());
        assert!(validate_segment("name", "a\\b").is_err());
    }

    #[test]
    fn resource_version_expiry_follows_ttl() {
        let mut version = ResourceVersion::new(
            ResourceKind::auth_session(),
            "current".to_owned(),
            1,
            Attributes::new(),
            Some(Duration::from_secs(60)),
        );
        let now = version.created_at;
        assert!(!version.is_expired(now));
        assert!(version.is_expired(now + TimeDelta::seconds(61)));
        version.ttl = None;
        assert!(!version.is_expired(now + TimeDelta::days(365)));
    }

    #[test]
    fn version_handle_display_is_addressable() {
        let version = ResourceVersion::new(
            ResourceKind::vm(),
            "alpha".to_owned(),
            3,
            Attributes::new(),
            None,
        );
        assert_eq!(version.handle().to_string(), "vm/alpha@3");
    }

    proptest::proptest! {
        #[test]
        fn proptest_upid_node_round_trips(node in "[a-z][a-z0-9-]{0,15}", id in 100u32..100_000) {
            let upid = format!("UPID:{node}:00001234:0000ABCD:65F00000:qmstart:{id}:root@pam:");
            let handle = TaskHandle::parse(&upid);
            proptest::prop_assert!(handle.is_ok());
            if let Ok(handle) = handle {
                proptest::prop_assert_eq!(handle.node, node);
            }
        }
    }
}
