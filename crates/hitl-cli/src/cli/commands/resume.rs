//! Resume command handler.

use anyhow::Result;
use hitl_core::core::{Decision, RunState};

use crate::cli::SessionContext;
use crate::cli::follow::{finish, follow};
use crate::render;

pub async fn run(ctx: &SessionContext, decision: Decision) -> Result<()> {
    let (mut orch, mut inbox) = ctx.open();

    if !orch.rehydrate() {
        anyhow::bail!("No saved thread to resume; start one with `hitl run`");
    }
    if follow(&mut orch, &mut inbox).await {
        return Err(hitl_core::core::interrupt::InterruptedError.into());
    }
    if orch.state() != RunState::WaitingApproval {
        anyhow::bail!("The saved thread is not waiting for approval");
    }

    render::events(&orch.resume(decision)?, false);
    let interrupted = follow(&mut orch, &mut inbox).await;
    finish(&orch, interrupted)
}
