/// guarded execution of a unit of work inside the admin delivery loop
///
use log::*;
use std::future::Future;

/// Runs a mutation and contains its failure.  The context names what was
/// being attempted; on error it is logged together with the error and the
/// caller sees `None`, never the error itself.
#[derive(Debug, Clone)]
pub struct TransactedAction {
    context: String,
}

impl TransactedAction {
    pub fn new<S: Into<String>>(context: S) -> TransactedAction {
        TransactedAction {
            context: context.into(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub async fn execute<F, T>(self, work: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match work.await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("{}: {:#}", self.context, e);
                None
            }
        }
    }
}
