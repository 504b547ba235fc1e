//! Entry point shared by operator-driven descriptors.

use super::{ManualSteps, TestEnv, TestFailure, TestFuture, render_title};

/// Walks the operator through the descriptor's [`ManualSteps`].
///
/// Every step is acknowledged before the first confirmation is asked. A
/// single "no" fails the test with [`TestFailure::Declined`].
pub fn run_manual(env: TestEnv<'_>) -> TestFuture<'_> {
    Box::pin(async move {
        let steps = env
            .case
            .manual
            .ok_or(TestFailure::MissingContext("operator procedure"))?;
        walk(env, steps).await
    })
}

async fn walk(env: TestEnv<'_>, procedure: ManualSteps) -> Result<(), TestFailure> {
    for step in procedure.steps {
        let message = render_title(step, env.config);
        env.operator.instruct(&message).await?;
    }
    for assertion in procedure.assertions {
        let question = render_title(assertion, env.config);
        if !env.operator.confirm(&question).await? {
            return Err(TestFailure::Declined(question));
        }
    }
    Ok(())
}
