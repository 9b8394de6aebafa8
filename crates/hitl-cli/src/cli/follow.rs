//! Drives the current operation to completion for one-shot commands.

use anyhow::Result;
use hitl_core::core::{OpInbox, Orchestrator, RunState, interrupt};
use hitl_core::transport::CancelReason;

use crate::render;

/// Renders operation messages until nothing is in flight.
///
/// The first Ctrl+C cancels the run; a second one exits the process.
/// Returns true if the user interrupted.
pub async fn follow(orch: &mut Orchestrator, inbox: &mut OpInbox) -> bool {
    let mut interrupted = false;
    while orch.is_busy() {
        tokio::select! {
            () = interrupt::wait_for_interrupt(), if !interrupted => {
                interrupted = true;
                if orch.cancel().is_ok() {
                    eprintln!("Cancelling... (Ctrl+C again to quit)");
                }
            }
            tagged = inbox.recv() => {
                let Some(tagged) = tagged else { break };
                render::events(&orch.handle(tagged), false);
            }
        }
    }
    interrupt::reset();
    interrupted
}

/// Maps the session outcome onto the command result.
pub fn finish(orch: &Orchestrator, interrupted: bool) -> Result<()> {
    let session = orch.session();
    match session.state() {
        RunState::Error => {
            let user_cancelled = session
                .error()
                .and_then(|err| err.cancel_reason())
                .is_some_and(|reason| reason == CancelReason::User);
            if interrupted || user_cancelled {
                return Err(interrupt::InterruptedError.into());
            }
            match session.error() {
                Some(err) => Err(err.clone().into()),
                None => anyhow::bail!("Run failed"),
            }
        }
        RunState::WaitingApproval => {
            println!();
            println!("Waiting for approval. Answer with: hitl resume <accept|retry|reject>");
            Ok(())
        }
        _ => Ok(()),
    }
}
