//! Reset command handler.

use anyhow::Result;

use crate::cli::SessionContext;
use crate::render;

pub fn run(ctx: &SessionContext) -> Result<()> {
    let (mut orch, _inbox) = ctx.open();
    render::events(&orch.reset()?, false);
    println!("Session cleared");
    Ok(())
}
