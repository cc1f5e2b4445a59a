//! Consumer identity and flow-control identifiers.

use std::sync::{RwLock, RwLockReadGuard};

use tracing::trace;

use crate::constants::INVALID_VALUE;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionInfo {
    consumer_id: String,
    group_name: String,
    under_group_ctrl: bool,
    def_flow_ctrl_id: i64,
    group_flow_ctrl_id: i64,
    qry_priority_id: i32,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            consumer_id: String::new(),
            group_name: String::new(),
            under_group_ctrl: false,
            def_flow_ctrl_id: INVALID_VALUE,
            group_flow_ctrl_id: INVALID_VALUE,
            qry_priority_id: INVALID_VALUE as i32,
        }
    }
}

/// Read-mostly session state.
///
/// Flow-control identifiers are stored for the protocol layer; their payloads
/// are interpreted by the flow-control policy outside this crate, so the
/// update hooks accept and ignore them.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: RwLock<SessionInfo>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInfo> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_consumer_info(&self, consumer_id: impl Into<String>, group: impl Into<String>) {
        let mut info = self.inner.write().unwrap_or_else(|e| e.into_inner());
        info.consumer_id = consumer_id.into();
        info.group_name = group.into();
    }

    pub fn consumer_id(&self) -> String {
        self.read().consumer_id.clone()
    }

    pub fn group_name(&self) -> String {
        self.read().group_name.clone()
    }

    /// Consumer id and group read together.
    pub fn identity(&self) -> (String, String) {
        let info = self.read();
        (info.consumer_id.clone(), info.group_name.clone())
    }

    pub fn under_group_ctrl(&self) -> bool {
        self.read().under_group_ctrl
    }

    pub fn def_flow_ctrl_id(&self) -> i64 {
        self.read().def_flow_ctrl_id
    }

    pub fn group_flow_ctrl_id(&self) -> i64 {
        self.read().group_flow_ctrl_id
    }

    pub fn qry_priority_id(&self) -> i32 {
        self.read().qry_priority_id
    }

    /// Hook for default flow-control rules pushed by the master. Ignored here.
    pub fn update_def_flow_ctrl_info(&self, flow_ctrl_id: i64, flow_ctrl_info: &str) {
        trace!(
            flow_ctrl_id,
            info_len = flow_ctrl_info.len(),
            "Ignoring default flow-control update"
        );
    }

    /// Hook for group flow-control rules pushed by the master. Ignored here.
    pub fn update_group_flow_ctrl_info(
        &self,
        qry_priority_id: i32,
        flow_ctrl_id: i64,
        flow_ctrl_info: &str,
    ) {
        trace!(
            qry_priority_id,
            flow_ctrl_id,
            info_len = flow_ctrl_info.len(),
            "Ignoring group flow-control update"
        );
    }
}
