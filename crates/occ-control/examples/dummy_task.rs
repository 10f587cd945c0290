// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! A minimal controlled task for exercising the control endpoint.
//!
//! Run it, then drive it with any orchestrator speaking the occ protocol:
//!
//! ```text
//! OCC_CONTROL_PORT=47100 cargo run --example dummy_task
//! ```

use async_trait::async_trait;
use tracing::info;

use occ_control::{
    ControlConfig, ControlledTask, HookResult, Instance, PropertyTree, RunPolicy, TaskError,
};

struct DummyTask {
    ticks: u64,
}

#[async_trait]
impl ControlledTask for DummyTask {
    fn name(&self) -> &str {
        "dummy-task"
    }

    async fn execute_configure(&mut self, properties: &PropertyTree) -> HookResult {
        info!("received runtime configuration:\n{properties:#}");
        Ok(())
    }

    async fn execute_start(&mut self, run_number: u32) -> HookResult {
        info!(run_number, "starting data taking");
        self.ticks = 0;
        Ok(())
    }

    async fn execute_stop(&mut self) -> HookResult {
        info!(ticks = self.ticks, "stopping data taking");
        Ok(())
    }

    async fn iterate_running(&mut self) -> Result<RunPolicy, TaskError> {
        self.ticks += 1;
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        info!(ticks = self.ticks, "processing");
        Ok(RunPolicy::Continue)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("occ_control=debug".parse()?),
        )
        .init();

    let instance = Instance::embedded(DummyTask { ticks: 0 }, ControlConfig::default()).await?;
    info!(addr = %instance.local_addr(), role = instance.role(), "dummy task ready");

    instance.wait().await;
    info!("machine done, exiting");
    instance.shutdown().await;

    Ok(())
}
