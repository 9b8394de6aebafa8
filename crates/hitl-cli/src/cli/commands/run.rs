//! Run command handler.

use anyhow::Result;
use hitl_core::core::{Decision, RunState};

use crate::cli::SessionContext;
use crate::cli::follow::{finish, follow};
use crate::render;

pub async fn run(ctx: &SessionContext, topic: Option<&str>, decision: Option<Decision>) -> Result<()> {
    let (mut orch, mut inbox) = ctx.open();

    render::events(&orch.start(topic)?, false);
    let mut interrupted = follow(&mut orch, &mut inbox).await;

    if let Some(decision) = decision
        && !interrupted
        && orch.state() == RunState::WaitingApproval
    {
        render::events(&orch.resume(decision)?, false);
        interrupted = follow(&mut orch, &mut inbox).await;
    }

    finish(&orch, interrupted)
}
