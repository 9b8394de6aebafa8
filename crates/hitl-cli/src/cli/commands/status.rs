//! Status command handler.

use anyhow::Result;

use crate::cli::SessionContext;
use crate::cli::follow::follow;
use crate::render;

/// Checks the saved thread against the server, then prints the session.
pub async fn run(ctx: &SessionContext) -> Result<()> {
    let (mut orch, mut inbox) = ctx.open();

    if orch.rehydrate() {
        follow(&mut orch, &mut inbox).await;
    }
    render::status(&orch);
    Ok(())
}
