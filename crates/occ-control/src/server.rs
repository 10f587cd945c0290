// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RPC façade over the coordinator.
//!
//! Accepts orchestrator connections and routes the four control methods.
//! Each call runs in its own task, so the streaming subscriptions never
//! block GetState or Transition.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use occ_protocol::control_proto::{
    ControlRequest, ControlResponse, DeviceEvent as ProtoDeviceEvent, DeviceEventType,
    EventStreamReply, GetStateReply, RpcError, StateStreamReply, StateType, TransitionReply,
    control_request::Request, control_response::Response,
};
use occ_protocol::server::{CallStream, ControlConnection, ControlListener, ServerError};

use crate::coordinator::Coordinator;
use crate::state::is_terminal_state;

/// Run the control server until cancelled.
#[instrument(skip_all)]
pub(crate) async fn run_control_server(
    listener: ControlListener,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    info!("control server running");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                listener.close();
                break;
            }
            conn = listener.accept() => {
                let Some(conn) = conn else { break };
                tokio::spawn(serve_connection(conn, coordinator.clone(), cancel.clone()));
            }
        }
    }

    Ok(())
}

/// Serve every call the orchestrator opens on one connection
async fn serve_connection(
    conn: ControlConnection,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
) {
    while let Some(call) = conn.next_call().await {
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_call(call, coordinator, cancel).await {
                error!("control call failed: {e}");
            }
        });
    }

    debug!("connection closed");
}

/// Route a single control call
async fn handle_call(
    mut call: CallStream,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let control_request: ControlRequest = call.request().await?;

    let Some(request) = control_request.request else {
        warn!("received empty ControlRequest");
        return call
            .reply(&ControlResponse {
                response: Some(Response::Error(RpcError {
                    status: "INVALID_ARGUMENT".to_string(),
                    code: "EMPTY_REQUEST".to_string(),
                    message: "ControlRequest contained no request".to_string(),
                })),
            })
            .await;
    };

    match request {
        Request::GetState(_) => {
            let state = coordinator.state().await;
            call.reply(&ControlResponse {
                response: Some(Response::GetState(GetStateReply {
                    state,
                    pid: std::process::id() as i32,
                })),
            })
            .await?;
        }

        Request::Transition(req) => {
            let response = match coordinator
                .transition(&req.src_state, &req.transition_event, &req.arguments)
                .await
            {
                Ok(outcome) => Response::Transition(TransitionReply {
                    state: outcome.state,
                    transition_event: outcome.event,
                    ok: outcome.ok,
                    trigger: outcome.trigger as i32,
                }),
                Err(e) => {
                    warn!("transition rejected: {e}");
                    Response::Error(e.to_rpc_error())
                }
            };
            call.reply(&ControlResponse {
                response: Some(response),
            })
            .await?;
        }

        Request::StateStream(_) => {
            stream_states(call, coordinator, cancel).await?;
        }

        Request::EventStream(_) => {
            stream_events(call, coordinator, cancel).await?;
        }
    }

    Ok(())
}

/// Push every state change to the subscriber until a terminal state.
///
/// The current state is replayed as the first reply; the snapshot is taken
/// atomically with the registration, so no transition can slip between.
async fn stream_states(
    mut call: CallStream,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let (subscription, snapshot) = coordinator.subscribe_states("StateStream").await;
    debug!(id = subscription.id(), "state stream subscribed");

    let mut replay = Some(snapshot);
    loop {
        let notice = match replay.take() {
            Some(notice) => notice,
            None => tokio::select! {
                _ = cancel.cancelled() => break,
                notice = subscription.recv() => notice,
            },
        };

        call.push(&StateStreamReply {
            r#type: if notice.intermediate {
                StateType::StateIntermediate
            } else {
                StateType::StateStable
            } as i32,
            state: notice.state.clone(),
        })
        .await?;

        // The machine is about to shut down; close the call.
        if is_terminal_state(&notice.state) {
            return call.end_stream().await;
        }
    }

    call.finish()
}

/// Push device events; close with a null event once the machine reaches a
/// terminal or error state.
async fn stream_events(
    mut call: CallStream,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    fn closes_stream(state: &str) -> bool {
        is_terminal_state(state) || state == "ERROR"
    }

    let events = coordinator.subscribe_events("EventStream");
    let (states, snapshot) = coordinator.subscribe_states("EventStream").await;
    debug!(id = events.id(), "event stream subscribed");

    let mut open = !closes_stream(&snapshot.state);
    while open {
        tokio::select! {
            // Drain events ahead of state notices so an error state does
            // not close the call past an already-published event.
            biased;

            event = events.recv() => {
                call.push(&EventStreamReply {
                    event: Some(ProtoDeviceEvent {
                        r#type: event.proto() as i32,
                    }),
                })
                .await?;
            }

            notice = states.recv() => {
                if closes_stream(&notice.state) {
                    open = false;
                }
            }

            _ = cancel.cancelled() => {
                return call.finish();
            }
        }
    }

    call.push(&EventStreamReply {
        event: Some(ProtoDeviceEvent {
            r#type: DeviceEventType::NullDeviceEvent as i32,
        }),
    })
    .await?;
    call.end_stream().await
}
