use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::RequestContext;
use super::error::ChainError;
use super::repository::MiddlewareRepository;
use super::traits::{Contributions, Flow, Link, Step};
use crate::error::ApiError;
use crate::managers::ManagerRegistry;
use crate::middleware::response::ResponseHandle;

/// Everything the completion callback receives once every link passed.
pub struct Completion {
    pub ctx: RequestContext,
    pub res: ResponseHandle,
    pub results: Contributions,
}

pub type OnDone = Box<dyn FnOnce(Completion) -> BoxFuture<'static, ()> + Send>;
pub type OnError = Box<dyn FnOnce(ApiError, ResponseHandle) + Send>;

/// How a chain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoltOutcome {
    /// Every middleware continued and the completion callback ran
    Completed,
    /// A middleware sent a response and stopped the chain
    Halted,
    /// A middleware failed and the error callback handled it
    Failed,
}

/// Sequential middleware chain for one request.
///
/// Links run strictly in order, each seeing what earlier links attached to
/// the context. `run` consumes the chain, so it executes at most once.
pub struct Bolt {
    managers: Arc<ManagerRegistry>,
    links: Vec<Link>,
    ctx: RequestContext,
    res: ResponseHandle,
    on_done: OnDone,
    on_error: Option<OnError>,
}

fn boxed_done<F, Fut>(on_done: F) -> OnDone
where
    F: FnOnce(Completion) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |done| Box::pin(on_done(done)))
}

impl Bolt {
    /// Resolves `stack` against the repository.
    pub fn new<F, Fut>(
        repository: &MiddlewareRepository,
        managers: Arc<ManagerRegistry>,
        stack: &[String],
        ctx: RequestContext,
        res: ResponseHandle,
        on_done: F,
    ) -> Result<Self, ChainError>
    where
        F: FnOnce(Completion) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let links = stack
            .iter()
            .map(|identifier| {
                repository
                    .resolve(identifier)
                    .map(|mw| Link::new(identifier.clone(), mw))
                    .ok_or_else(|| ChainError::UnknownMiddleware(identifier.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_links(managers, links, ctx, res, on_done))
    }

    /// Builds a chain from already resolved links.
    pub fn from_links<F, Fut>(
        managers: Arc<ManagerRegistry>,
        links: Vec<Link>,
        ctx: RequestContext,
        res: ResponseHandle,
        on_done: F,
    ) -> Self
    where
        F: FnOnce(Completion) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            managers,
            links,
            ctx,
            res,
            on_done: boxed_done(on_done),
            on_error: None,
        }
    }

    /// Appends a link after the resolved stack.
    pub fn push(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub fn on_error<E>(mut self, on_error: E) -> Self
    where
        E: FnOnce(ApiError, ResponseHandle) + Send + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Without an error callback, a failing middleware surfaces as `Err`.
    pub async fn run(self) -> Result<BoltOutcome, ChainError> {
        let Bolt {
            managers,
            links,
            mut ctx,
            res,
            on_done,
            on_error,
        } = self;
        let mut results = Contributions::new();

        for link in &links {
            debug!("Running middleware {}", link.name);
            let step = Step {
                ctx: &mut ctx,
                res: &res,
                results: &results,
                managers: managers.as_ref(),
            };
            let outcome = link.middleware.handle(step).await;

            match outcome {
                Ok(Flow::Next(Some(value))) => {
                    results.insert(link.name.clone(), value);
                }
                Ok(Flow::Next(None)) => {}
                Ok(Flow::Halt) => {
                    debug!("Middleware {} halted the chain", link.name);
                    return Ok(BoltOutcome::Halted);
                }
                Err(err) => {
                    warn!("Middleware {} failed: {}", link.name, err);
                    return match on_error {
                        Some(on_error) => {
                            on_error(err, res);
                            Ok(BoltOutcome::Failed)
                        }
                        None => Err(ChainError::Middleware {
                            name: link.name.clone(),
                            source: err,
                        }),
                    };
                }
            }
        }

        on_done(Completion { ctx, res, results }).await;
        Ok(BoltOutcome::Completed)
    }
}
