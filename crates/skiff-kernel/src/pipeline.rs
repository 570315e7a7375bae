//! The pipeline engine: stage wiring, concurrent execution, and error
//! stash semantics.
//!
//! Each stage of a multi-stage pipeline runs as its own task with its own
//! stream triad; the predecessor's `out` is piped to the successor's `in`
//! and `err` is inherited from the enclosing triad. Stages are joined in
//! construction order; if a stage fails to join, the remaining stages are
//! cancelled and the pipeline fails with `Interrupted`.
//!
//! The pipeline's value is the last stage's result. Errors in non-last
//! stages are not raised: they are logged to the current error stream with
//! the stored error location (or `pipe: `) and the last one is stashed in
//! the session variable `pipe-exception`.
//!
//! The session's triad is snapshotted on entry and restored before control
//! returns, so a thread reused for another client never sees leaked
//! redirections.

use std::sync::Arc;

use crate::ast;
use crate::closure::Closure;
use crate::error::{Result, ShellError};
use crate::session::LOCATION;
use crate::stream::{pipe_default, InStream, OutStream, Streams};
use crate::value::Value;

tokio::task_local! {
    /// The stream triad of the pipeline stage running on this task.
    static STAGE_STREAMS: Streams;
}

/// The triad of the stage enclosing the current task, if any.
pub(crate) fn stage_streams() -> Option<Streams> {
    STAGE_STREAMS.try_with(|streams| streams.clone()).ok()
}

/// Run one pipeline of the program, restoring the session triad on exit.
pub(crate) async fn run_pipeline(
    closure: &Arc<Closure>,
    pipeline: &ast::Pipeline,
) -> Result<Value> {
    let session = Arc::clone(closure.session());
    let snapshot = session.streams();
    let result = run_stages(closure, pipeline).await;
    session.set_streams(snapshot);
    result
}

async fn run_stages(closure: &Arc<Closure>, pipeline: &ast::Pipeline) -> Result<Value> {
    let session = Arc::clone(closure.session());
    let base = session.current_streams();
    let count = pipeline.statements.len();

    if count == 0 {
        return Ok(Value::Null);
    }
    if count == 1 {
        // A singleton pipeline runs inline on the calling task.
        return closure.execute_statement(&pipeline.statements[0]).await;
    }

    // Wire the triads: stage i's out feeds stage i+1's in; err is
    // inherited independently.
    let mut triads = Vec::with_capacity(count);
    let mut next_input = base.input.clone();
    for i in 0..count {
        let input = std::mem::replace(&mut next_input, InStream::Null);
        let out = if i + 1 < count {
            let (writer, reader) = pipe_default();
            next_input = InStream::Pipe(reader);
            OutStream::Pipe(writer)
        } else {
            base.out.clone()
        };
        triads.push(Streams {
            input,
            out,
            err: base.err.clone(),
        });
    }

    let mut handles = Vec::with_capacity(count);
    for (i, (statement, streams)) in pipeline.statements.iter().zip(triads).enumerate() {
        let closure = Arc::clone(closure);
        let statement = statement.clone();
        let stage = streams.clone();
        // Only stages whose out is a pipe created here may close it; the
        // last stage's out belongs to the enclosing triad.
        let owns_out = i + 1 < count;
        handles.push(tokio::spawn(STAGE_STREAMS.scope(streams, async move {
            let result = closure.execute_statement(&statement).await;
            if owns_out {
                // EOF to the next stage regardless of outcome.
                stage.out.close();
            }
            result
        })));
    }

    // Join in construction order.
    let mut outcomes: Vec<Result<Value>> = Vec::with_capacity(count);
    let mut remaining = handles.into_iter();
    while let Some(handle) = remaining.next() {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_error) => {
                tracing::warn!(error = %join_error, "pipeline stage did not complete; cancelling remaining stages");
                let rest: Vec<_> = remaining.collect();
                for handle in &rest {
                    handle.abort();
                }
                for handle in rest {
                    let _ = handle.await;
                }
                return Err(ShellError::Interrupted);
            }
        }
    }

    let last = match outcomes.pop() {
        Some(last) => last,
        None => return Ok(Value::Null),
    };

    // Non-last stage errors are stashed, not raised: the pipeline's value
    // is defined by the last stage.
    for (i, outcome) in outcomes.into_iter().enumerate() {
        if let Err(error) = outcome {
            let prefix = match session.variable(LOCATION) {
                Some(location) if location.to_string().contains(':') => format!("{location}: "),
                _ => "pipe: ".to_string(),
            };
            tracing::debug!(stage = i, error = %error, "pipeline stage failed");
            base.err
                .write_line(&format!("{prefix}{error}"))
                .await
                .ok();
            session.put("pipe-exception", Value::Opaque(Arc::new(error)));
        }
    }

    last
}
