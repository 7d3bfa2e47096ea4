use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Exit status the hypervisor reports for a successful task.
pub const TASK_EXIT_OK: &str = "OK";

/// Handle to an asynchronous hypervisor task.
///
/// Transient: exists only for the duration of one poll loop and is never
/// persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskHandle {
    /// Opaque hypervisor-assigned task id.
    pub upid: String,
    /// Node the task runs on.
    pub node: String,
}

impl TaskHandle {
    /// Creates a handle from a UPID and the node it belongs to.
    pub fn new(upid: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            upid: upid.into(),
            node: node.into(),
        }
    }

    /// Parse a UPID of the form `UPID:<node>:<pid>:<pstart>:<start>:<type>:<id>:<user>:`
    /// and take the node from its second field.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidTaskHandle`] if the prefix is missing or the
    /// node field is empty.
    pub fn parse(upid: &str) -> Result<Self, CoreError> {
        let mut fields = upid.split(':');
        if fields.next() != Some("UPID") {
            return Err(CoreError::InvalidTaskHandle {
                upid: upid.to_owned(),
                reason: "missing 'UPID:' prefix".to_owned(),
            });
        }
        match fields.next() {
            Some(node) if !node.is_empty() => Ok(Self::new(upid, node)),
            _ => Err(CoreError::InvalidTaskHandle {
                upid: upid.to_owned(),
                reason: "empty node field".to_owned(),
            }),
        }
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.upid)
    }
}

/// Terminal result of polling one hypervisor task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TaskOutcome {
    /// `true` iff `exit_status` is exactly [`TASK_EXIT_OK`].
    pub success: bool,
    /// Raw exit status string reported by the hypervisor.
    pub exit_status: String,
    /// Number of status queries issued, including the terminal one.
    pub poll_count: u32,
}

impl TaskOutcome {
    /// Build an outcome from the terminal exit status.
    pub fn from_exit_status(exit_status: impl Into<String>, poll_count: u32) -> Self {
        let exit_status = exit_status.into();
        Self {
            success: exit_status == TASK_EXIT_OK,
            exit_status,
            poll_count,
        }
    }
}
