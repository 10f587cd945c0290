// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background supervisor loop.
//!
//! Each tick runs under the coordinator lock, so periodic hooks never
//! overlap an in-flight transition:
//!
//! 1. terminal state reached -> flip the machine-done flag;
//! 2. running and end of stream not yet signaled -> drive the periodic
//!    running hook; end of data publishes `END_OF_STREAM` once, a failure
//!    moves the machine to error;
//! 3. outside error -> drive the health check; a failure moves the machine
//!    to error and publishes `TASK_INTERNAL_ERROR`.
//!
//! The loop then sleeps for a short tick and repeats until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::Coordinator;
use crate::registry::{DeviceEvent, StateNotice};
use crate::state::TaskState;
use crate::task::RunPolicy;

const TICK: Duration = Duration::from_millis(1);

pub(crate) async fn run(coordinator: Arc<Coordinator>, cancel: CancellationToken) {
    // Once end of data is reported the flag stays set for the life of the
    // machine; a later STOP/START cycle does not re-arm it.
    let mut end_of_stream = false;

    while !cancel.is_cancelled() {
        tick(&coordinator, &mut end_of_stream).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(TICK) => {}
        }
    }
}

async fn tick(coordinator: &Coordinator, end_of_stream: &mut bool) {
    let mut adapter = coordinator.lock_adapter().await;

    if adapter.is_done() {
        coordinator.set_machine_done();
        return;
    }

    let state = adapter.current_state();

    if state == TaskState::Running.to_string() && !*end_of_stream {
        match adapter.periodic_running().await {
            Ok(RunPolicy::Continue) => {}
            Ok(RunPolicy::EndOfData) => {
                info!("task reported end of data");
                *end_of_stream = true;
                coordinator.publish_event(DeviceEvent::EndOfStream);
            }
            Err(e) => {
                warn!("periodic running hook failed: {e}");
                adapter.set_error();
                coordinator.publish_state(StateNotice::stable(TaskState::Error.to_string()));
            }
        }
    }

    let state = adapter.current_state();
    if state != TaskState::Error.to_string()
        && let Err(e) = adapter.periodic_check().await
    {
        warn!("health check failed: {e}");
        // Publish the event before the state: an event-stream handler that
        // closes on the error state must still see the event.
        coordinator.publish_event(DeviceEvent::TaskInternalError);
        adapter.set_error();
        coordinator.publish_state(StateNotice::stable(TaskState::Error.to_string()));
    }
}
