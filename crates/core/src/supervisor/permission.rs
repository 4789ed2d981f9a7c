// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-permission registry: one single-capacity rendezvous channel per
//! request, surviving client reconnects.

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::OpError;
use crate::event::PermissionResponse;

struct PendingEntry {
    tx: mpsc::Sender<PermissionResponse>,
    created_at: SystemTime,
}

/// Registry of permissions awaiting a human answer.
#[derive(Default)]
pub struct PendingPermissions {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending id and return the response receiver.
    ///
    /// Capacity 1: exactly one response is ever delivered; a second respond
    /// call observes a full channel.
    pub fn register(&self, pending_id: &str) -> mpsc::Receiver<PermissionResponse> {
        let (tx, rx) = mpsc::channel(1);
        self.entries
            .lock()
            .insert(pending_id.to_owned(), PendingEntry { tx, created_at: SystemTime::now() });
        rx
    }

    /// Drop a pending entry once resolved or cancelled.
    pub fn remove(&self, pending_id: &str) {
        self.entries.lock().remove(pending_id);
    }

    /// Non-blocking response delivery.
    pub fn respond(&self, pending_id: &str, response: PermissionResponse) -> Result<(), OpError> {
        let entries = self.entries.lock();
        let entry = entries.get(pending_id).ok_or(OpError::NotFound)?;
        entry.tx.try_send(response).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OpError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => OpError::NotFound,
        })
    }

    /// Ids currently awaiting an answer, oldest first.
    pub fn pending_ids(&self) -> Vec<String> {
        let entries = self.entries.lock();
        let mut ids: Vec<(&String, &PendingEntry)> = entries.iter().collect();
        ids.sort_by_key(|(_, e)| e.created_at);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Mint a pending id when the adapter did not supply one.
pub fn mint_id(session: &str, tool_call_id: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{session}-{tool_call_id}-{nanos}")
}

#[cfg(test)]
#[path = "permission_tests.rs"]
mod tests;
